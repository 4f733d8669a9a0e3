//! Per-source upload rate limiting.
//!
//! Each identity (peer address, or the forwarded address behind a trusted
//! proxy) accumulates admitted bytes against a fixed ceiling. The counter
//! only ever grows while the record lives; crossing the ceiling denies every
//! following request until the tracking window lapses. Each admitted upload
//! extends the window, so an active abuser stays tracked longer.
//!
//! A single sweeper task drops lapsed records for all identities; there is
//! deliberately no per-identity timer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::RateLimitConfig;

struct RateEntry {
    bytes: u64,
    deadline: Instant,
}

/// Byte-budget rate limiter keyed by source identity.
pub struct RateLimiter {
    entries: DashMap<String, RateEntry>,
    ceiling: u64,
    window: Duration,
    extension: Duration,
    sweep_interval: Duration,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ceiling: config.max_bytes,
            window: config.window(),
            extension: config.extension(),
            sweep_interval: config.sweep_interval(),
        }
    }

    /// Decide whether an upload from `identity` may proceed.
    ///
    /// The record is created atomically on first contact, so two racing
    /// first requests share one tracker. Denial is based on bytes already
    /// admitted; `intended` is informational. Denied requests neither grow
    /// the counter nor extend the window.
    pub fn admit(&self, identity: &str, intended: u64) -> bool {
        let entry = self
            .entries
            .entry(identity.to_string())
            .or_insert_with(|| RateEntry {
                bytes: 0,
                deadline: Instant::now() + self.window,
            });

        if entry.bytes > self.ceiling {
            debug!(
                "denied upload of {} bytes from {}: {} bytes already admitted",
                intended, identity, entry.bytes
            );
            return false;
        }
        true
    }

    /// Account a committed upload and extend the identity's window.
    pub fn record(&self, identity: &str, bytes: u64) {
        if let Some(mut entry) = self.entries.get_mut(identity) {
            entry.bytes = entry.bytes.saturating_add(bytes);
            entry.deadline += self.extension;
            trace!("{} at {} admitted bytes", identity, entry.bytes);
        }
    }

    /// Drop records whose window has lapsed. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.deadline > now);
        before - self.entries.len()
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Start the shared background sweeper.
    pub fn spawn_sweeper(limiter: Arc<RateLimiter>) {
        let interval = limiter.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let dropped = limiter.sweep();
                if dropped > 0 {
                    debug!("dropped {} idle rate records", dropped);
                }
            }
        });
    }
}
