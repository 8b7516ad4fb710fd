use std::path::Path;
use std::time::UNIX_EPOCH;

use glob::{Pattern, PatternError};
use tracing::warn;

use crate::error::ListerError;
use crate::mime;

/// One filesystem child of the listed directory.
///
/// Built fresh from stat metadata on every listing request, never
/// persisted. `size` and `mime` are absent for directories.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: i64,
    pub created: i64,
    pub mime: Option<&'static str>,
}

/// Sort key for a listing, a closed set of stat projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Mtime,
    Ctime,
    Size,
}

/// The (key, direction) pair controlling listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            descending: false,
        }
    }
}

impl SortSpec {
    /// Parse a `KEY.DIRECTION` selector such as `ST_SIZE.DESC`.
    ///
    /// Unrecognized keys normalize to `NAME` and unrecognized or
    /// missing directions to ascending; parsing never fails.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.to_uppercase();
        let mut parts = upper.splitn(2, '.');
        let key = match parts.next().unwrap_or("") {
            "ST_MTIME" => SortKey::Mtime,
            "ST_CTIME" => SortKey::Ctime,
            "ST_SIZE" => SortKey::Size,
            "NAME" => SortKey::Name,
            _ => return SortSpec::default(),
        };
        let descending = parts.next() == Some("DESC");
        SortSpec { key, descending }
    }

    /// Wire form of this spec (`ST_SIZE.DESC` etc.), as used in
    /// toggle links and the `sort` cookie.
    pub fn encode(&self) -> String {
        let key = match self.key {
            SortKey::Name => "NAME",
            SortKey::Mtime => "ST_MTIME",
            SortKey::Ctime => "ST_CTIME",
            SortKey::Size => "ST_SIZE",
        };
        let direction = if self.descending { "DESC" } else { "ASC" };
        format!("{}.{}", key, direction)
    }

    /// The spec a column link should select: the same key with the
    /// direction flipped.
    pub fn toggled(&self) -> Self {
        Self {
            key: self.key,
            descending: !self.descending,
        }
    }
}

/// Ordered set of UNIX glob patterns for entries to hide.
///
/// Directory names are matched with a trailing `/` appended, so a
/// pattern like `secret/` hides the directory `secret` but not a
/// plain file of the same name.
#[derive(Debug, Clone, Default)]
pub struct HiddenPatterns {
    patterns: Vec<Pattern>,
}

impl HiddenPatterns {
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether an entry with this name must be hidden.
    pub fn is_hidden(&self, name: &str, is_dir: bool) -> bool {
        let decorated;
        let candidate = if is_dir {
            decorated = format!("{}/", name);
            decorated.as_str()
        } else {
            name
        };
        self.patterns.iter().any(|p| p.matches(candidate))
    }
}

/// A directory's children, split so directories always render before
/// files.
#[derive(Debug, Default)]
pub struct Listing {
    pub dirs: Vec<Entry>,
    pub files: Vec<Entry>,
}

impl Listing {
    /// Stable-sort both groups by the spec's key projection,
    /// reversed when descending. Grouping is unaffected.
    pub fn sort(&mut self, spec: SortSpec) {
        sort_entries(&mut self.dirs, spec);
        sort_entries(&mut self.files, spec);
    }
}

fn sort_entries(entries: &mut [Entry], spec: SortSpec) {
    entries.sort_by(|a, b| {
        let ordering = match spec.key {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Mtime => a.modified.cmp(&b.modified),
            SortKey::Ctime => a.created.cmp(&b.created),
            SortKey::Size => a.size.unwrap_or(0).cmp(&b.size.unwrap_or(0)),
        };
        if spec.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn unix_secs(time: std::io::Result<std::time::SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

fn entry_from_metadata(name: String, path: &Path, meta: &std::fs::Metadata) -> Entry {
    let is_dir = meta.is_dir();
    let modified = unix_secs(meta.modified()).unwrap_or(0);
    // std::fs has no portable ctime; fall back to mtime where the
    // filesystem does not report a creation time
    let created = unix_secs(meta.created()).unwrap_or(modified);
    Entry {
        is_dir,
        size: if is_dir { None } else { Some(meta.len()) },
        modified,
        created,
        mime: if is_dir {
            None
        } else {
            Some(mime::mime_for_path(path))
        },
        name,
    }
}

/// Enumerate the direct children of `path`, excluding hidden entries
/// unless `allow_hidden` is set.
///
/// An unreadable directory maps to `NotFound`; children whose
/// metadata cannot be read are skipped. Each group comes back
/// name-sorted; callers apply the requested order with
/// [`Listing::sort`].
pub fn list_dir(
    path: &Path,
    hidden: &HiddenPatterns,
    allow_hidden: bool,
) -> Result<Listing, ListerError> {
    let read_dir = std::fs::read_dir(path).map_err(|_| ListerError::NotFound)?;

    let mut listing = Listing::default();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping dir entry: {}", e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        if !allow_hidden && hidden.is_hidden(&name, meta.is_dir()) {
            continue;
        }

        let record = entry_from_metadata(name, &entry.path(), &meta);
        if record.is_dir {
            listing.dirs.push(record);
        } else {
            listing.files.push(record);
        }
    }

    // read_dir order is platform-dependent; normalize so equal sort
    // keys tie-break by name
    listing.dirs.sort_by(|a, b| a.name.cmp(&b.name));
    listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::create_dir(dir.path().join("secret")).unwrap();
        fs::write(dir.path().join("readme.txt"), vec![0u8; 500]).unwrap();
        fs::write(dir.path().join("big.bin"), vec![0u8; 2000]).unwrap();
        fs::write(dir.path().join("notes.secret"), b"x").unwrap();
        dir
    }

    #[test]
    fn test_sort_spec_parsing() {
        assert_eq!(
            SortSpec::parse("ST_SIZE.DESC"),
            SortSpec {
                key: SortKey::Size,
                descending: true
            }
        );
        assert_eq!(
            SortSpec::parse("st_mtime.desc"),
            SortSpec {
                key: SortKey::Mtime,
                descending: true
            }
        );
        // bare key defaults to ascending
        assert_eq!(
            SortSpec::parse("ST_SIZE"),
            SortSpec {
                key: SortKey::Size,
                descending: false
            }
        );
        // junk normalizes to name ascending
        assert_eq!(SortSpec::parse("junk"), SortSpec::default());
        assert_eq!(SortSpec::parse(""), SortSpec::default());
        assert_eq!(SortSpec::parse("NAME.sideways"), {
            SortSpec {
                key: SortKey::Name,
                descending: false,
            }
        });
    }

    #[test]
    fn test_sort_spec_toggle() {
        let spec = SortSpec::parse("ST_SIZE.ASC");
        assert_eq!(spec.toggled().encode(), "ST_SIZE.DESC");
        assert_eq!(spec.toggled().toggled().encode(), "ST_SIZE.ASC");
    }

    #[test]
    fn test_listing_splits_dirs_and_files() {
        let dir = fixture();
        let listing = list_dir(dir.path(), &HiddenPatterns::default(), false).unwrap();
        assert_eq!(listing.dirs.len(), 2);
        assert_eq!(listing.files.len(), 3);
        assert!(listing.dirs.iter().all(|e| e.size.is_none()));
        assert!(listing.files.iter().all(|e| e.size.is_some()));
    }

    #[test]
    fn test_hidden_pattern_filters_entries() {
        let dir = fixture();
        let hidden = HiddenPatterns::new(&["*.secret".to_string()]).unwrap();
        let listing = list_dir(dir.path(), &hidden, false).unwrap();
        assert!(listing.files.iter().all(|e| e.name != "notes.secret"));
        // directory `secret` has no trailing slash in the pattern, so
        // it survives
        assert!(listing.dirs.iter().any(|e| e.name == "secret"));
    }

    #[test]
    fn test_hidden_dir_pattern_needs_trailing_slash() {
        let dir = fixture();
        let hidden = HiddenPatterns::new(&["secret/".to_string()]).unwrap();
        let listing = list_dir(dir.path(), &hidden, false).unwrap();
        assert!(listing.dirs.iter().all(|e| e.name != "secret"));

        // same pattern does not hide a plain file called "secret"
        fs::write(dir.path().join("secret2"), b"x").unwrap();
        assert!(!hidden.is_hidden("secret", false));
    }

    #[test]
    fn test_allow_hidden_bypasses_patterns() {
        let dir = fixture();
        let hidden = HiddenPatterns::new(&["*.secret".to_string()]).unwrap();
        let listing = list_dir(dir.path(), &hidden, true).unwrap();
        assert!(listing.files.iter().any(|e| e.name == "notes.secret"));
    }

    #[test]
    fn test_size_sort_orders_files() {
        let dir = fixture();
        let mut listing = list_dir(dir.path(), &HiddenPatterns::default(), false).unwrap();
        listing.sort(SortSpec::parse("ST_SIZE.DESC"));
        let sizes: Vec<u64> = listing.files.iter().map(|e| e.size.unwrap()).collect();
        let mut expected = sizes.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(sizes, expected);
    }

    #[test]
    fn test_sort_is_stable_across_runs() {
        let dir = fixture();
        for spec in ["NAME.ASC", "ST_SIZE.DESC", "ST_MTIME.ASC"] {
            let mut first = list_dir(dir.path(), &HiddenPatterns::default(), false).unwrap();
            let mut second = list_dir(dir.path(), &HiddenPatterns::default(), false).unwrap();
            first.sort(SortSpec::parse(spec));
            second.sort(SortSpec::parse(spec));
            let names = |l: &Listing| {
                l.dirs
                    .iter()
                    .chain(l.files.iter())
                    .map(|e| e.name.clone())
                    .collect::<Vec<_>>()
            };
            assert_eq!(names(&first), names(&second), "spec {}", spec);
        }
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let err = list_dir(
            Path::new("/does/not/exist"),
            &HiddenPatterns::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ListerError::NotFound));
    }
}
