use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ListerConfig;
use crate::defaults;
use crate::entries::{self, Entry, HiddenPatterns, SortKey, SortSpec};
use crate::error::ListerError;
use crate::hashcache::{FileDigests, HashCache};
use crate::size::format_size;
use crate::template::{Context, Row, RowKind, TemplateDocument};

/// Request-scoped values the HTTP layer feeds into a render.
#[derive(Debug, Clone, Copy)]
pub struct PageVars<'a> {
    /// Display path of the page, e.g. `/music/`
    pub current_directory: &'a str,
    /// Query-string suffix replayed on links when cookies are off
    /// (`?sort=...&no-cookies`), empty otherwise
    pub end_url: &'a str,
    /// Whether toggle links may rely on the sort cookie
    pub cookies_allowed: bool,
}

/// Renders directory index and error pages from the shared template.
#[derive(Debug)]
pub struct IndexRenderer {
    template: TemplateDocument,
    date_format: String,
    binary_prefix: bool,
    hide_parent: bool,
}

impl IndexRenderer {
    pub fn new(
        template: TemplateDocument,
        date_format: String,
        binary_prefix: bool,
        hide_parent: bool,
    ) -> Self {
        Self {
            template,
            date_format,
            binary_prefix,
            hide_parent,
        }
    }

    /// Render the index page for an already-enumerated listing.
    pub fn render_listing(
        &self,
        listing: &entries::Listing,
        sort: SortSpec,
        vars: &PageVars<'_>,
    ) -> String {
        let mut rows = Vec::with_capacity(listing.dirs.len() + listing.files.len() + 1);
        if !self.hide_parent {
            rows.push(self.parent_row(vars.end_url));
        }
        for entry in &listing.dirs {
            rows.push(self.entry_row(entry, vars.end_url));
        }
        for entry in &listing.files {
            rows.push(self.entry_row(entry, vars.end_url));
        }
        self.template.render_listing(&self.page_context(sort, vars), &rows)
    }

    /// Render the error page with `message` substituted into the
    /// error block.
    pub fn render_error(&self, message: &str, sort: SortSpec, vars: &PageVars<'_>) -> String {
        let mut ctx = self.page_context(sort, vars);
        ctx.set("ERROR_MESSAGE", message);
        self.template.render_error(&ctx)
    }

    /// Page-level variables: title, asset links, and the per-column
    /// sorting toggles. Every column links to its canonical
    /// ascending sort; the active column's link flips its current
    /// direction instead.
    fn page_context(&self, sort: SortSpec, vars: &PageVars<'_>) -> Context {
        let suffix = if vars.cookies_allowed { "" } else { "&no-cookies" };
        let mut ctx = Context::new();
        ctx.set("CURRENT_DIRECTORY", vars.current_directory);
        ctx.set("CSS", r#"<link rel="stylesheet" href="/?css" type="text/css">"#);
        ctx.set("JS", r#"<script type="text/javascript" src="/?js"></script>"#);
        ctx.set("END_URL", vars.end_url);

        for key in [SortKey::Name, SortKey::Mtime, SortKey::Ctime, SortKey::Size] {
            let canonical = SortSpec {
                key,
                descending: false,
            };
            let link = if key == sort.key {
                sort.toggled()
            } else {
                canonical
            };
            ctx.set(
                toggle_var(key),
                format!("?sort={}{}", link.encode(), suffix),
            );
            let direction = if key == sort.key && sort.descending {
                "DESC"
            } else {
                "ASC"
            };
            ctx.set(sorting_var(key), direction);
        }
        ctx
    }

    fn parent_row(&self, end_url: &str) -> Row {
        let mut vars = Context::new();
        vars.set("FILE_NAME", "..");
        vars.set("FILE_LINK", format!("../{}", end_url));
        vars.set("FILE_MODIFICATION", "");
        vars.set("FILE_CREATION", "");
        vars.set("FILE_TYPE", "parent");
        vars.set("FILE_SIZE", "");
        vars.set("FILE_MIMETYPE", "");
        vars.set("DASHED_FILE_MIMETYPE", "");
        Row {
            kind: RowKind::Parent,
            vars,
        }
    }

    fn entry_row(&self, entry: &Entry, end_url: &str) -> Row {
        let mut vars = Context::new();
        vars.set("FILE_NAME", escape_html(&entry.name));
        vars.set("FILE_MODIFICATION", self.format_date(entry.modified));
        vars.set("FILE_CREATION", self.format_date(entry.created));

        let encoded = urlencoding::encode(&entry.name).into_owned();
        if entry.is_dir {
            // directory links keep the current query string
            vars.set("FILE_LINK", format!("{}/{}", encoded, end_url));
            vars.set("FILE_TYPE", "dir");
            vars.set("FILE_SIZE", "-");
            vars.set("FILE_MIMETYPE", "-");
            vars.set("DASHED_FILE_MIMETYPE", "-");
        } else {
            let mime = entry.mime.unwrap_or(crate::mime::OCTET_STREAM);
            let top_level = mime.split('/').next().unwrap_or("");
            vars.set("FILE_LINK", encoded);
            vars.set("FILE_TYPE", format!("file {}", top_level));
            vars.set(
                "FILE_SIZE",
                format_size(entry.size.unwrap_or(0), self.binary_prefix),
            );
            vars.set("FILE_MIMETYPE", mime);
            vars.set("DASHED_FILE_MIMETYPE", css_safe(mime));
        }
        Row {
            kind: if entry.is_dir {
                RowKind::Dir
            } else {
                RowKind::File
            },
            vars,
        }
    }

    fn format_date(&self, unix_secs: i64) -> String {
        DateTime::<Utc>::from_timestamp(unix_secs, 0)
            .map(|t| t.format(&self.date_format).to_string())
            .unwrap_or_default()
    }
}

fn toggle_var(key: SortKey) -> &'static str {
    match key {
        SortKey::Name => "TOGGLE_SORTING_NAME",
        SortKey::Mtime => "TOGGLE_SORTING_MODIFICATION",
        SortKey::Ctime => "TOGGLE_SORTING_CREATION",
        SortKey::Size => "TOGGLE_SORTING_SIZE",
    }
}

fn sorting_var(key: SortKey) -> &'static str {
    match key {
        SortKey::Name => "SORTING_NAME",
        SortKey::Mtime => "SORTING_MODIFICATION",
        SortKey::Ctime => "SORTING_CREATION",
        SortKey::Size => "SORTING_SIZE",
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Collapse anything a CSS class selector cannot carry into a dash,
/// e.g. `image/svg+xml` becomes `image-svg-xml`.
fn css_safe(mime: &str) -> String {
    let mut out = String::with_capacity(mime.len());
    let mut last_dash = false;
    for c in mime.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out
}

/// The assembled core: configuration, compiled template, hidden
/// patterns, and the hash cache, shared read-only across request
/// handlers.
#[derive(Debug)]
pub struct DirectoryLister {
    config: ListerConfig,
    renderer: IndexRenderer,
    hidden: HiddenPatterns,
    hash_cache: HashCache,
}

impl DirectoryLister {
    /// Build the core from configuration. Fails fast when the root
    /// directory does not exist or a hidden pattern is malformed.
    pub fn new(config: ListerConfig) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(ListerError::InvalidDirectory(config.root.clone()).into());
        }
        if let Some(resources) = &config.resources_directory {
            if !resources.is_dir() {
                return Err(ListerError::InvalidDirectory(resources.clone()).into());
            }
        }

        let hidden = HiddenPatterns::new(&config.hidden)
            .with_context(|| "invalid hidden pattern".to_string())?;

        let markup = config.body.as_deref().unwrap_or(defaults::DEFAULT_BODY);
        let renderer = IndexRenderer::new(
            TemplateDocument::parse(markup),
            config.date_format.clone(),
            config.binary_prefix,
            config.hide_parent,
        );

        let persist_path = if config.store_hashes {
            Some(
                config
                    .database
                    .clone()
                    .unwrap_or_else(ListerConfig::default_database_path),
            )
        } else {
            None
        };
        let hash_cache = HashCache::new(
            config.hashing,
            config.max_hash_size,
            config.store_hashes || config.hashing,
            persist_path,
        );

        Ok(Self {
            config,
            renderer,
            hidden,
            hash_cache,
        })
    }

    pub fn config(&self) -> &ListerConfig {
        &self.config
    }

    pub fn css(&self) -> &str {
        self.config.css.as_deref().unwrap_or(defaults::DEFAULT_CSS)
    }

    pub fn js(&self) -> &str {
        self.config.js.as_deref().unwrap_or(defaults::DEFAULT_JS)
    }

    pub fn resources_directory(&self) -> Option<&Path> {
        self.config.resources_directory.as_deref()
    }

    /// Map a decoded request path (`/sub/dir/`) onto the filesystem,
    /// refusing anything that climbs out of the root.
    pub fn resolve(&self, request_path: &str) -> Result<PathBuf, ListerError> {
        let trimmed = request_path.trim_start_matches('/');
        if trimmed
            .split('/')
            .any(|segment| segment == ".." || segment == ".")
        {
            return Err(ListerError::NotFound);
        }
        Ok(self.config.root.join(trimmed))
    }

    /// Hidden-access policy for a directly addressed path: denied
    /// when its basename matches a hidden pattern and hidden access
    /// is not globally allowed.
    pub fn access_denied(&self, path: &Path, is_dir: bool) -> bool {
        if self.config.allow_hidden {
            return false;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.hidden.is_hidden(name, is_dir),
            None => false,
        }
    }

    /// Enumerate, sort, and render the index page for a directory.
    pub fn render_directory(
        &self,
        path: &Path,
        sort: SortSpec,
        vars: &PageVars<'_>,
    ) -> Result<String, ListerError> {
        let mut listing = entries::list_dir(path, &self.hidden, self.config.allow_hidden)?;
        listing.sort(sort);
        debug!(
            "rendering {} ({} dirs, {} files)",
            path.display(),
            listing.dirs.len(),
            listing.files.len()
        );
        Ok(self.renderer.render_listing(&listing, sort, vars))
    }

    /// Render the error page for an expected failure.
    pub fn render_error_page(
        &self,
        error: &ListerError,
        sort: SortSpec,
        vars: &PageVars<'_>,
    ) -> String {
        self.renderer.render_error(&error.to_string(), sort, vars)
    }

    /// Serve the digest document for a file, via the cache.
    pub fn file_digests(&self, path: &Path) -> Result<FileDigests, ListerError> {
        let meta = std::fs::metadata(path).map_err(|_| ListerError::NotFound)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.hash_cache.digests(path, meta.len(), mtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars() -> PageVars<'static> {
        PageVars {
            current_directory: "/",
            end_url: "",
            cookies_allowed: true,
        }
    }

    fn lister_for(dir: &tempfile::TempDir) -> DirectoryLister {
        let config = ListerConfig {
            root: dir.path().to_path_buf(),
            ..ListerConfig::default()
        };
        DirectoryLister::new(config).unwrap()
    }

    fn scenario_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("readme.txt"), vec![0u8; 500]).unwrap();
        dir
    }

    #[test]
    fn test_invalid_root_fails_construction() {
        let config = ListerConfig {
            root: PathBuf::from("/definitely/not/here"),
            ..ListerConfig::default()
        };
        assert!(DirectoryLister::new(config).is_err());
    }

    #[test]
    fn test_invalid_resources_directory_fails_construction() {
        let dir = scenario_dir();
        let config = ListerConfig {
            root: dir.path().to_path_buf(),
            resources_directory: Some(PathBuf::from("/definitely/not/here")),
            ..ListerConfig::default()
        };
        assert!(DirectoryLister::new(config).is_err());
    }

    #[test]
    fn test_scenario_listing_order_and_sizes() {
        let dir = scenario_dir();
        let lister = lister_for(&dir);
        let html = lister
            .render_directory(dir.path(), SortSpec::default(), &vars())
            .unwrap();

        let parent = html.find("href=\"../\"").expect("parent row");
        let docs = html.find("docs/").expect("docs row");
        let readme = html.find("readme.txt").expect("readme row");
        assert!(parent < docs && docs < readme, "parent, dirs, then files");
        assert!(html.contains("500.00B"));
        assert!(html.contains("<td>-</td>"));
    }

    #[test]
    fn test_hide_parent_suppresses_dotdot_row() {
        let dir = scenario_dir();
        let config = ListerConfig {
            root: dir.path().to_path_buf(),
            hide_parent: true,
            ..ListerConfig::default()
        };
        let lister = DirectoryLister::new(config).unwrap();
        let html = lister
            .render_directory(dir.path(), SortSpec::default(), &vars())
            .unwrap();
        assert!(!html.contains("href=\"../\""));
    }

    #[test]
    fn test_grouping_invariant_under_every_sort() {
        let dir = scenario_dir();
        fs::create_dir(dir.path().join("zzz")).unwrap();
        fs::write(dir.path().join("aaa.txt"), b"tiny").unwrap();
        let lister = lister_for(&dir);

        for raw in ["NAME.DESC", "ST_SIZE.ASC", "ST_MTIME.DESC", "ST_CTIME.ASC"] {
            let html = lister
                .render_directory(dir.path(), SortSpec::parse(raw), &vars())
                .unwrap();
            let last_dir = ["docs/", "zzz/"]
                .iter()
                .map(|n| html.find(n).unwrap())
                .max()
                .unwrap();
            let first_file = ["aaa.txt", "readme.txt"]
                .iter()
                .map(|n| html.find(n).unwrap())
                .min()
                .unwrap();
            assert!(last_dir < first_file, "dirs before files for {}", raw);
        }
    }

    #[test]
    fn test_hidden_entries_never_rendered() {
        let dir = scenario_dir();
        fs::write(dir.path().join("private.key"), b"secret").unwrap();
        let config = ListerConfig {
            root: dir.path().to_path_buf(),
            hidden: vec!["*.key".to_string()],
            ..ListerConfig::default()
        };
        let lister = DirectoryLister::new(config).unwrap();
        let html = lister
            .render_directory(dir.path(), SortSpec::default(), &vars())
            .unwrap();
        assert!(!html.contains("private.key"));
    }

    #[test]
    fn test_error_page_round_trip() {
        let dir = scenario_dir();
        let lister = lister_for(&dir);
        let html =
            lister.render_error_page(&ListerError::NotFound, SortSpec::default(), &vars());
        assert!(html.contains("Invalid file or directory"));
        assert!(!html.contains("{{"));
        assert!(!html.contains("<tbody>"));
        assert!(!html.contains("$FILE_NAME"));
    }

    #[test]
    fn test_toggle_link_flips_active_column() {
        let dir = scenario_dir();
        let lister = lister_for(&dir);
        let html = lister
            .render_directory(dir.path(), SortSpec::parse("ST_SIZE.ASC"), &vars())
            .unwrap();
        assert!(html.contains("?sort=ST_SIZE.DESC"));
        // inactive columns stay on their canonical ascending links
        assert!(html.contains("?sort=NAME.ASC"));
        assert!(html.contains("?sort=ST_MTIME.ASC"));
    }

    #[test]
    fn test_no_cookies_suffix_carried_on_toggles() {
        let dir = scenario_dir();
        let lister = lister_for(&dir);
        let html = lister
            .render_directory(
                dir.path(),
                SortSpec::default(),
                &PageVars {
                    current_directory: "/",
                    end_url: "?sort=NAME.ASC&no-cookies",
                    cookies_allowed: false,
                },
            )
            .unwrap();
        assert!(html.contains("?sort=ST_SIZE.ASC&no-cookies"));
        assert!(html.contains("href=\"../?sort=NAME.ASC&no-cookies\""));
    }

    #[test]
    fn test_file_names_are_escaped_and_links_encoded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a <b>.txt"), b"x").unwrap();
        let lister = lister_for(&dir);
        let html = lister
            .render_directory(dir.path(), SortSpec::default(), &vars())
            .unwrap();
        assert!(html.contains("a &lt;b&gt;.txt"));
        assert!(html.contains("a%20%3Cb%3E.txt"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = scenario_dir();
        let lister = lister_for(&dir);
        assert!(lister.resolve("/fine/path").is_ok());
        assert!(matches!(
            lister.resolve("/../etc/passwd"),
            Err(ListerError::NotFound)
        ));
        assert!(matches!(
            lister.resolve("/a/../../b"),
            Err(ListerError::NotFound)
        ));
    }

    #[test]
    fn test_access_denied_for_hidden_basename() {
        let dir = scenario_dir();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let config = ListerConfig {
            root: dir.path().to_path_buf(),
            hidden: vec![".*".to_string()],
            ..ListerConfig::default()
        };
        let lister = DirectoryLister::new(config).unwrap();
        assert!(lister.access_denied(&dir.path().join(".git"), true));
        assert!(!lister.access_denied(&dir.path().join("docs"), true));
    }

    #[test]
    fn test_css_safe_mime() {
        assert_eq!(css_safe("image/svg+xml"), "image-svg-xml");
        assert_eq!(css_safe("application/octet-stream"), "application-octet-stream");
    }
}
