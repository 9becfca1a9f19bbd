//! # Cache Persistence
//!
//! Snapshot of the cache store written at shutdown and read back at startup,
//! so a restarted resolver does not begin cold. The file is a versioned JSON
//! document; anything that does not match [`FORMAT_VERSION`] is discarded.

use crate::cache::{CacheEntry, CacheKey, CacheStore, Interface};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Version written into every snapshot
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cache snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode cache snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("incompatible cache snapshot version {found} (expected {expected})")]
    Incompatible { found: u32, expected: u32 },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    sampler: IpAddr,
    if_index: u32,
    sampler_name: String,
    interface: Interface,
    last_updated: DateTime<Utc>,
}

impl From<(CacheKey, CacheEntry)> for SnapshotEntry {
    fn from((key, entry): (CacheKey, CacheEntry)) -> Self {
        Self {
            sampler: key.sampler,
            if_index: key.if_index,
            sampler_name: entry.sampler_name,
            interface: entry.interface,
            last_updated: entry.last_updated,
        }
    }
}

impl From<SnapshotEntry> for (CacheKey, CacheEntry) {
    fn from(entry: SnapshotEntry) -> Self {
        (
            CacheKey::new(entry.sampler, entry.if_index),
            CacheEntry {
                sampler_name: entry.sampler_name,
                interface: entry.interface,
                last_updated: entry.last_updated,
                poll_in_flight: false,
            },
        )
    }
}

/// Write every entry of `store` to `path`, replacing the file atomically.
///
/// Returns the number of entries written.
pub fn save(path: &Path, store: &CacheStore, now: DateTime<Utc>) -> PersistenceResult<usize> {
    let entries: Vec<SnapshotEntry> = store.snapshot().into_iter().map(Into::into).collect();
    let count = entries.len();
    let snapshot = Snapshot {
        version: FORMAT_VERSION,
        saved_at: now,
        entries,
    };
    let encoded = serde_json::to_vec(&snapshot).map_err(PersistenceError::Encode)?;

    let staging = staging_path(path);
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&staging)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        std::fs::rename(&staging, path)
    };
    if let Err(error) = write() {
        let _ = std::fs::remove_file(&staging);
        return Err(PersistenceError::io(path, error));
    }

    debug!(path = %path.display(), entries = count, "Cache snapshot written");
    Ok(count)
}

/// Restore entries from `path` into `store`, skipping those older than `duration`.
///
/// A missing file is a cold start and restores nothing.
pub fn load(
    path: &Path,
    store: &CacheStore,
    now: DateTime<Utc>,
    duration: Duration,
) -> PersistenceResult<usize> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No cache snapshot found, starting cold");
            return Ok(0);
        }
        Err(error) => return Err(PersistenceError::io(path, error)),
    };

    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    if snapshot.version != FORMAT_VERSION {
        return Err(PersistenceError::Incompatible {
            found: snapshot.version,
            expected: FORMAT_VERSION,
        });
    }

    let total = snapshot.entries.len();
    let restored = store.restore(snapshot.entries.into_iter().map(Into::into), now, duration);
    info!(
        path = %path.display(),
        saved_at = %snapshot.saved_at,
        restored,
        discarded = total - restored,
        "Cache snapshot loaded"
    );
    Ok(restored)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
