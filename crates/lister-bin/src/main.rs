use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use lister_core::config::ListerConfig;
use lister_core::render::DirectoryLister;

mod server;

#[derive(Parser, Debug)]
#[command(name = "dirlister")]
#[command(about = "Browsable HTML directory index server")]
#[command(version)]
struct Cli {
    /// Directory to serve (default: current directory)
    directory: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "DIRLISTER_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "DIRLISTER_PORT")]
    port: Option<u16>,

    /// Path to a custom page template
    #[arg(long)]
    body: Option<PathBuf>,

    /// Path to a custom stylesheet served at /?css
    #[arg(long)]
    style: Option<PathBuf>,

    /// Path to a custom script served at /?js
    #[arg(long)]
    js: Option<PathBuf>,

    /// strftime-style format for the date columns
    #[arg(long)]
    date: Option<String>,

    /// Use binary (1024) size prefixes instead of decimal (1000)
    #[arg(long)]
    binary: bool,

    /// Disable the ?hashes endpoint
    #[arg(long)]
    no_hashing: bool,

    /// Largest file size the hash endpoint will read, in bytes
    #[arg(long)]
    max_hash_size: Option<u64>,

    /// Keep computed digests in a store that survives restarts
    #[arg(long)]
    store_hashes: bool,

    /// Location of the durable digest store
    #[arg(long, env = "DIRLISTER_DATABASE")]
    database: Option<PathBuf>,

    /// Glob pattern for entries to hide (repeatable; append / to
    /// match directories)
    #[arg(long = "hidden")]
    hidden: Vec<String>,

    /// List and serve entries matching hidden patterns anyway
    #[arg(long)]
    allow_hidden: bool,

    /// Suppress the ".." parent row
    #[arg(long)]
    hide_parent: bool,

    /// Directory of extra page assets served via /?get=FILENAME
    #[arg(long)]
    resources_directory: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, env = "DIRLISTER_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DIRLISTER_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = build_config(cli)?;

    info!(
        "dirlister v{} serving {} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.root.display(),
        config.host,
        config.port,
    );

    let bind = format!("{}:{}", config.host, config.port);
    let lister = DirectoryLister::new(config)?;
    let mut server = server::Server::start(lister, &bind).await?;
    info!("listening on http://{}", server.addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutting down");
    server.shutdown();
    Ok(())
}

/// Config file first, then CLI arguments override field by field.
fn build_config(cli: Cli) -> Result<ListerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("loading config from {}", path.display());
            ListerConfig::load(path)?
        }
        None => ListerConfig::default(),
    };

    if let Some(directory) = cli.directory {
        config.root = directory;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.body {
        config.body = Some(read_override(&path, "template")?);
    }
    if let Some(path) = cli.style {
        config.css = Some(read_override(&path, "stylesheet")?);
    }
    if let Some(path) = cli.js {
        config.js = Some(read_override(&path, "script")?);
    }
    if let Some(date) = cli.date {
        config.date_format = date;
    }
    if cli.binary {
        config.binary_prefix = true;
    }
    if cli.no_hashing {
        config.hashing = false;
    }
    if let Some(max) = cli.max_hash_size {
        config.max_hash_size = max;
    }
    if cli.store_hashes {
        config.store_hashes = true;
    }
    if let Some(database) = cli.database {
        config.database = Some(database);
    }
    if let Some(resources) = cli.resources_directory {
        config.resources_directory = Some(resources);
    }
    config.hidden.extend(cli.hidden);
    if cli.allow_hidden {
        config.allow_hidden = true;
    }
    if cli.hide_parent {
        config.hide_parent = true;
    }
    Ok(config)
}

fn read_override(path: &PathBuf, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} from {}", what, path.display()))
}
