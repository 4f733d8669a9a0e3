//! Attachment store: the upload pipeline.
//!
//! An upload flows: declared-length ceiling → rate admission → quota
//! reservation (with a single eviction retry) → identifier assignment →
//! capped streaming write → commit or abort. The declared length from the
//! request is authoritative everywhere; the body is never trusted past it.
//!
//! The quota is reserved exactly once per attempt, before the first byte is
//! written, so concurrent uploads cannot jointly overcommit the budget.
//! Every abort path releases that reservation exactly once; committed
//! attachments hand the release off to whichever deleter (TTL expiry or
//! eviction) actually removes the file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{Result, StoreError};
use crate::quota::{QuotaSnapshot, QuotaTracker};
use crate::ratelimit::RateLimiter;
use crate::MAX_ID_ATTEMPTS;

/// Filesystem-backed attachment store with quota, eviction, rate limiting,
/// and TTL expiry. The storage directory itself is the only blob index.
pub struct AttachmentStore {
    root: PathBuf,
    quota: Arc<QuotaTracker>,
    limiter: Arc<RateLimiter>,
    max_upload: u64,
    ttl: Duration,
}

impl AttachmentStore {
    /// Open the store, creating the storage directory and starting the rate
    /// sweeper. Failure to create the directory is startup-fatal for the
    /// caller.
    pub async fn open(config: &RelayConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage_dir).await?;

        let quota = Arc::new(QuotaTracker::new(
            config.storage_dir.clone(),
            config.storage_limit,
            config.limits.eviction_floor(),
        ));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        RateLimiter::spawn_sweeper(Arc::clone(&limiter));

        info!(
            "attachment store opened at {} ({} byte limit)",
            config.storage_dir.display(),
            config.storage_limit
        );

        Ok(Self {
            root: config.storage_dir.clone(),
            quota,
            limiter,
            max_upload: config.limits.max_upload_bytes,
            ttl: config.limits.attachment_ttl(),
        })
    }

    /// Run one upload through the pipeline and return its identifier.
    ///
    /// `declared` is the client-asserted byte count; the body is read up to
    /// exactly that many bytes. A body that ends (or errors) short of the
    /// declared length aborts the upload.
    pub async fn store<S, E>(&self, identity: &str, declared: u64, body: S) -> Result<Uuid>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        if declared > self.max_upload {
            return Err(StoreError::TooLarge {
                declared,
                max: self.max_upload,
            });
        }

        if !self.limiter.admit(identity, declared) {
            return Err(StoreError::RateLimited {
                identity: identity.to_string(),
            });
        }

        if self.quota.try_reserve(declared).is_err() {
            // Single-shot relief: free at most one attachment, then retry the
            // reservation exactly once.
            self.quota.evict_oldest().await?;
            self.quota.try_reserve(declared)?;
        }

        // The reservation is held from here on; every exit below either
        // commits it to a stored attachment or releases it exactly once.
        let (id, path, file) = match self.create_blob().await {
            Ok(created) => created,
            Err(e) => {
                self.quota.release(declared);
                return Err(e);
            }
        };

        let written = match write_capped(file, declared, body).await {
            Ok(written) => written,
            Err(e) => {
                self.discard(&path).await;
                self.quota.release(declared);
                return Err(e);
            }
        };

        if written != declared {
            self.discard(&path).await;
            self.quota.release(declared);
            warn!(
                "aborted upload {} from {}: declared {} bytes, received {}",
                id, identity, declared, written
            );
            return Err(StoreError::LengthMismatch {
                declared,
                received: written,
            });
        }

        self.limiter.record(identity, declared);
        self.schedule_expiry(id, declared);
        info!("stored attachment {} ({} bytes) from {}", id, declared, identity);
        Ok(id)
    }

    /// Quota state for the statistics endpoint.
    pub fn snapshot(&self) -> QuotaSnapshot {
        self.quota.snapshot()
    }

    /// Draw a random identifier and atomically create its file.
    ///
    /// `create_new` makes the existence check and the creation one
    /// operation, so two uploads can never claim the same identifier.
    async fn create_blob(&self) -> Result<(Uuid, PathBuf, File)> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4();
            let path = self.root.join(id.to_string());
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((id, path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("identifier collision on {}, retrying", id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::IdExhausted)
    }

    /// Remove a partial blob after an aborted upload.
    async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to discard partial {}: {}", path.display(), e),
        }
    }

    /// Spawn the detached deletion task for a committed attachment.
    ///
    /// The release is gated on this task's own `remove_file` succeeding: if
    /// eviction got there first it already released, and the expiry becomes
    /// a no-op.
    fn schedule_expiry(&self, id: Uuid, size: u64) {
        let path = self.root.join(id.to_string());
        let quota = Arc::clone(&self.quota);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    quota.release(size);
                    debug!("expired attachment {}", id);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("attachment {} already gone at expiry", id);
                }
                Err(e) => warn!("failed to expire attachment {}: {}", id, e),
            }
        });
    }
}

/// Stream the body into `file`, hard-capped at `declared` bytes.
///
/// Excess body bytes are left unread. A stream error is treated the same as
/// the body ending early: the caller sees a short count.
async fn write_capped<S, E>(mut file: File, declared: u64, mut body: S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut written = 0u64;
    while written < declared {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                debug!("upload body failed after {} bytes: {}", written, e);
                break;
            }
            None => break,
        };
        if chunk.is_empty() {
            continue;
        }
        let take = chunk.len().min((declared - written) as usize);
        file.write_all(&chunk[..take]).await?;
        written += take as u64;
    }
    file.flush().await?;
    Ok(written)
}
