use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server-wide configuration, consumed once at construction.
///
/// Loaded from a JSON file and/or assembled from CLI arguments by the
/// binary; the core treats it as read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListerConfig {
    /// Root directory served by the index
    pub root: PathBuf,

    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Page template markup (the embedded default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Stylesheet served at /?css
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,

    /// Script served at /?js
    #[serde(skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,

    /// strftime-style format for the date columns
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Use binary (1024) unit prefixes instead of decimal (1000)
    #[serde(default)]
    pub binary_prefix: bool,

    /// UNIX glob patterns for entries to hide (directories are matched
    /// with a trailing slash appended to their name)
    #[serde(default)]
    pub hidden: Vec<String>,

    /// Allow listing and direct access to hidden entries
    #[serde(default)]
    pub allow_hidden: bool,

    /// Suppress the ".." parent row
    #[serde(default)]
    pub hide_parent: bool,

    /// Serve MD5/SHA-1 digests on `?hashes` requests
    #[serde(default = "default_true")]
    pub hashing: bool,

    /// Largest file size the hash endpoint will read, in bytes
    #[serde(default = "default_max_hash_size")]
    pub max_hash_size: u64,

    /// Keep computed digests in a store that survives restarts
    #[serde(default)]
    pub store_hashes: bool,

    /// Location of the durable digest store (ignored unless
    /// `store_hashes` is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Directory of extra page assets served via `/?get=FILENAME`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_directory: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_hash_size() -> u64 {
    250_000_000
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: default_host(),
            port: default_port(),
            body: None,
            css: None,
            js: None,
            date_format: default_date_format(),
            binary_prefix: false,
            hidden: Vec::new(),
            allow_hidden: false,
            hide_parent: false,
            hashing: true,
            max_hash_size: default_max_hash_size(),
            store_hashes: false,
            database: None,
            resources_directory: None,
        }
    }
}

impl ListerConfig {
    /// Default location for the durable digest store on this platform
    pub fn default_database_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("dev", "dirlister", "dirlister") {
            dirs.data_dir().join("hashes.json")
        } else {
            PathBuf::from("dirlister-hashes.json")
        }
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }
}
