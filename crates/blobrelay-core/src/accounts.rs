//! Account table for the TURN credential handshake.
//!
//! Loaded once from configuration and never mutated afterwards. The relay's
//! long-term-credential authentication callback is the only consumer; the
//! upload path never touches it.

use std::collections::HashMap;

/// Immutable username → shared-secret mapping.
#[derive(Debug, Clone)]
pub struct AccountTable {
    entries: HashMap<String, String>,
}

impl AccountTable {
    /// Build the table from configured account pairs.
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Look up the shared secret for a username.
    pub fn lookup(&self, username: &str) -> Option<&str> {
        self.entries.get(username).map(String::as_str)
    }

    /// Number of configured accounts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no accounts are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
