//! Quota tracking and oldest-first eviction.
//!
//! `used_bytes` counts bytes reserved for in-flight and persisted
//! attachments. Every reservation is matched by exactly one release: the
//! upload abort path releases directly, while expiry and eviction release
//! only after their own `remove_file` succeeds, so racing deleters of the
//! same attachment can never release it twice.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::disk;
use crate::error::{Result, StoreError};

/// Read-only view of the quota state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaSnapshot {
    pub used_bytes: u64,
    pub limit: u64,
    pub available_space: u64,
}

/// Process-wide byte accounting for the storage directory.
pub struct QuotaTracker {
    root: PathBuf,
    limit: u64,
    eviction_floor: Duration,
    used: Mutex<u64>,
}

impl QuotaTracker {
    /// Create a tracker over `root` with a byte budget and eviction floor.
    ///
    /// Accounting starts at zero; attachments left over from a previous
    /// process are not counted, only the live free-disk bound sees them.
    pub fn new(root: PathBuf, limit: u64, eviction_floor: Duration) -> Self {
        Self {
            root,
            limit,
            eviction_floor,
            used: Mutex::new(0),
        }
    }

    /// Space uploads may still be admitted into: the configured limit capped
    /// by what the disk actually has left.
    ///
    /// A failed disk query counts as no space rather than unlimited space.
    pub fn available_space(&self) -> u64 {
        let free = match disk::query(&self.root) {
            Ok(usage) => usage.free_bytes,
            Err(e) => {
                warn!("disk usage query failed for {}: {}", self.root.display(), e);
                0
            }
        };
        self.limit.min(free)
    }

    /// Reserve `bytes` against the quota.
    ///
    /// The disk query happens before the lock; the critical section is only
    /// the compare-and-add on the counter.
    pub fn try_reserve(&self, bytes: u64) -> Result<()> {
        let available = self.available_space();
        let mut used = self.used.lock();
        if used.saturating_add(bytes) > available {
            return Err(StoreError::InsufficientSpace {
                needed: bytes,
                available: available.saturating_sub(*used),
            });
        }
        *used += bytes;
        Ok(())
    }

    /// Return `bytes` to the quota.
    ///
    /// Saturating: evicting an attachment that predates this process would
    /// otherwise underflow the counter.
    pub fn release(&self, bytes: u64) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(bytes);
    }

    /// Currently reserved bytes.
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// Snapshot for the statistics endpoint.
    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            used_bytes: self.used(),
            limit: self.limit,
            available_space: self.available_space(),
        }
    }

    /// Delete the single oldest stored attachment to relieve space pressure.
    ///
    /// Frees at most one attachment per call; a reservation retries once
    /// after this, not in a loop, so a single oversized request cannot purge
    /// the whole store. Attachments younger than the retention floor are
    /// never evicted.
    pub async fn evict_oldest(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut oldest: Option<(PathBuf, u64, SystemTime)> = None;

        while let Some(entry) = entries.next_entry().await? {
            // An entry can vanish between listing and stat if a TTL deletion
            // wins the race; skip it rather than fail the scan.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let is_older = oldest
                .as_ref()
                .map_or(true, |(_, _, current)| modified < *current);
            if is_older {
                oldest = Some((entry.path(), meta.len(), modified));
            }
        }

        let (path, size, modified) = oldest.ok_or(StoreError::NoEvictableBlob)?;

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < self.eviction_floor {
            return Err(StoreError::RetentionFloor {
                age_secs: age.as_secs(),
            });
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.release(size);
                info!(
                    "evicted {} ({} bytes, {}s old)",
                    path.display(),
                    size,
                    age.as_secs()
                );
                Ok(())
            }
            // Lost the race with another deleter; the winner released.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("eviction victim {} already gone", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

}
