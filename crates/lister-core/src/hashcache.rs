use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::{debug, warn};

use crate::error::ListerError;

/// Read granularity when streaming a file through the hashers (64 KB)
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// The digest document served for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigests {
    pub md5: String,
    pub sha1: String,
}

/// One cached digest computation, valid only while the file's
/// modification time still matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    mtime: i64,
    digests: FileDigests,
}

#[derive(Debug, Default)]
struct Store {
    records: HashMap<PathBuf, CacheRecord>,
}

/// Memoized MD5/SHA-1 content hashing, keyed by path + mtime.
///
/// The record map is the only shared mutable state in the core; a
/// single mutex serializes access. Digests are computed outside the
/// lock, so two requests racing on a never-hashed path may both read
/// the file — the later insert wins, which is harmless.
#[derive(Debug)]
pub struct HashCache {
    enabled: bool,
    max_size: u64,
    store: Option<Mutex<Store>>,
    persist_path: Option<PathBuf>,
}

impl HashCache {
    /// `persist_path` enables the durable store; `None` keeps records
    /// in memory for the process lifetime only. Pass `cache: false`
    /// to disable memoization entirely (every request recomputes).
    pub fn new(enabled: bool, max_size: u64, cache: bool, persist_path: Option<PathBuf>) -> Self {
        let store = cache.then(|| {
            let mut store = Store::default();
            if let Some(path) = &persist_path {
                store.records = load_records(path);
            }
            Mutex::new(store)
        });
        Self {
            enabled,
            max_size,
            store,
            persist_path: if cache { persist_path } else { None },
        }
    }

    /// Return the digest document for `path`, reading the file only
    /// on a cache miss. `size` and `mtime` come from the caller's
    /// stat so an oversized file is rejected without any read.
    pub fn digests(&self, path: &Path, size: u64, mtime: i64) -> Result<FileDigests, ListerError> {
        if !self.enabled {
            return Err(ListerError::HashingDisabled);
        }
        if size > self.max_size {
            return Err(ListerError::FileTooLarge);
        }

        if let Some(store) = &self.store {
            let store = store.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = store.records.get(path) {
                if record.mtime == mtime {
                    debug!("hash cache hit for {}", path.display());
                    return Ok(record.digests.clone());
                }
            }
        }

        let digests = compute_digests(path)?;

        if let Some(store) = &self.store {
            let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
            store.records.insert(
                path.to_path_buf(),
                CacheRecord {
                    mtime,
                    digests: digests.clone(),
                },
            );
            if let Some(persist) = &self.persist_path {
                // persistence failures degrade to in-memory caching
                if let Err(e) = save_records(persist, &store.records) {
                    warn!("failed to persist hash store to {}: {}", persist.display(), e);
                }
            }
        }

        Ok(digests)
    }
}

fn compute_digests(path: &Path) -> Result<FileDigests, ListerError> {
    let mut file = std::fs::File::open(path).map_err(|_| ListerError::NotFound)?;
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|_| ListerError::NotFound)?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
    }
    Ok(FileDigests {
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
    })
}

fn load_records(path: &Path) -> HashMap<PathBuf, CacheRecord> {
    match std::fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(records) => records,
            Err(e) => {
                warn!("ignoring unreadable hash store {}: {}", path.display(), e);
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}

fn save_records(path: &Path, records: &HashMap<PathBuf, CacheRecord>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec(records)?;
    // write through a temp file so a crash never truncates the store
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
