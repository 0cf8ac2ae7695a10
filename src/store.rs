use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::types::{parse_timestamp, CacheFile, Item, Snapshot, StampedRef};

/// Layout used when writing a collection. Both layouts are accepted on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    /// A bare JSON array of records.
    Bare,
    /// `{ "data": [...], "timestamp": "<rfc3339>" }`
    #[default]
    Stamped,
}

/// Locks for one file. `io` covers a single read or write; `run` covers a
/// whole load-merge-save cycle and is only taken through [`JsonStore::lock`].
#[derive(Clone, Default)]
struct PathLocks {
    io: Arc<AsyncMutex<()>>,
    run: Arc<AsyncMutex<()>>,
}

/// JSON file store with locks scoped per file.
///
/// Unrelated collections never wait on each other. Every read and write of the
/// same path is serialized, and at most one read-modify-write cycle per path
/// is in progress at a time.
pub struct JsonStore {
    format: CacheFormat,
    locks: Mutex<HashMap<PathBuf, PathLocks>>,
}

impl JsonStore {
    pub fn new(format: CacheFormat) -> Self {
        Self { format, locks: Mutex::new(HashMap::new()) }
    }

    async fn path_locks(&self, path: &Path) -> PathLocks {
        let key = lock_key(path).await;
        // A poisoned map only means another thread panicked mid-insert; the map itself is still valid.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Start a read-modify-write cycle on `path`. Other cycles on the same
    /// path wait until the guard is dropped; plain [`load`](Self::load) and
    /// [`save`](Self::save) calls do not.
    pub async fn lock(&self, path: &Path) -> CollectionGuard {
        let locks = self.path_locks(path).await;
        let run = locks.run.clone().lock_owned().await;
        CollectionGuard { _run: run, io: locks.io, path: path.to_path_buf(), format: self.format }
    }

    /// Load a collection. Missing or malformed files yield an empty snapshot.
    pub async fn load(&self, path: &Path) -> Snapshot {
        let io = self.path_locks(path).await.io;
        let _io = io.lock().await;
        read_snapshot(path).await
    }

    /// Overwrite a collection. Returns false (after logging) when the write failed.
    pub async fn save(&self, path: &Path, items: &[Item]) -> bool {
        let io = self.path_locks(path).await.io;
        let _io = io.lock().await;
        write_collection(path, items, self.format).await
    }

    /// Read an arbitrary JSON document under the path's io lock.
    pub async fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let io = self.path_locks(path).await.io;
        let _io = io.lock().await;
        let bytes = read_file(path).await?;
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed json file");
                None
            }
        }
    }

    /// Write an arbitrary JSON document under the path's io lock.
    pub async fn save_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> bool {
        let io = self.path_locks(path).await.io;
        let _io = io.lock().await;
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => write_atomic(path, &bytes).await,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to serialize json");
                false
            }
        }
    }
}

impl Default for JsonStore {
    fn default() -> Self { Self::new(CacheFormat::default()) }
}

/// Exclusive right to rewrite one collection file until dropped.
pub struct CollectionGuard {
    _run: OwnedMutexGuard<()>,
    io: Arc<AsyncMutex<()>>,
    path: PathBuf,
    format: CacheFormat,
}

impl CollectionGuard {
    pub async fn load(&self) -> Snapshot {
        let _io = self.io.lock().await;
        read_snapshot(&self.path).await
    }

    pub async fn save(&self, items: &[Item]) -> bool {
        let _io = self.io.lock().await;
        write_collection(&self.path, items, self.format).await
    }
}

async fn read_snapshot(path: &Path) -> Snapshot {
    let Some(bytes) = read_file(path).await else { return Snapshot::empty() };
    decode_snapshot(path, &bytes)
}

async fn write_collection(path: &Path, items: &[Item], format: CacheFormat) -> bool {
    let encoded = match format {
        CacheFormat::Bare => serde_json::to_vec_pretty(items),
        CacheFormat::Stamped => serde_json::to_vec_pretty(&StampedRef { data: items, timestamp: Utc::now() }),
    };
    let bytes = match encoded {
        Ok(b) => b,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to serialize collection");
            return false;
        }
    };
    let ok = write_atomic(path, &bytes).await;
    if ok {
        info!(path = %path.display(), records = items.len(), "collection saved");
    }
    ok
}

/// True when the snapshot carries a timestamp younger than `ttl`. A timestamp
/// in the future is treated as stale.
pub fn is_fresh(snapshot: &Snapshot, ttl: Duration) -> bool {
    let Some(saved_at) = snapshot.saved_at else { return false };
    let Ok(ttl) = chrono::Duration::from_std(ttl) else { return false };
    let age = Utc::now().signed_duration_since(saved_at);
    age >= chrono::Duration::zero() && age < ttl
}

/// Canonical parent directory joined with the file name, so every spelling of
/// one file maps to the same locks. The parent is created first since
/// canonicalization needs it to exist; it would be created by the first save anyway.
async fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
        return normalize(&absolute);
    };
    if let Err(e) = tokio::fs::create_dir_all(parent).await {
        debug!(path = %parent.display(), error = %e, "cannot create cache directory, keying lock lexically");
        return normalize(&absolute);
    }
    match tokio::fs::canonicalize(parent).await {
        Ok(dir) => dir.join(name),
        Err(_) => normalize(&absolute),
    }
}

/// Drop `.` and resolve `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

async fn read_file(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "cache file not found, starting empty");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file unreadable, starting empty");
            None
        }
    }
}

fn decode_snapshot(path: &Path, bytes: &[u8]) -> Snapshot {
    let file: CacheFile = match serde_json::from_slice(bytes) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file is not a valid collection, starting empty");
            return Snapshot::empty();
        }
    };
    let (raw, saved_at) = match file {
        CacheFile::Stamped { data, timestamp } => (data, timestamp.as_deref().and_then(parse_timestamp)),
        CacheFile::Bare(data) => (data, None),
    };

    let mut items = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for value in raw {
        match serde_json::from_value::<Item>(value) {
            Ok(item) if !item.id.trim().is_empty() && !item.titulo.trim().is_empty() => items.push(item),
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "skipped records without id or titulo");
    }
    Snapshot { items, saved_at }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> bool {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!(path = %parent.display(), error = %e, "failed to create cache directory");
            return false;
        }
    }
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "cache".into());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        error!(path = %tmp.display(), error = %e, "failed to write cache file");
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        error!(path = %path.display(), error = %e, "failed to replace cache file");
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }
    true
}
