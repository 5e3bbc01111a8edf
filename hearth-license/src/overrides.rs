//! Panic unlock: a time-boxed override that forces enforcement to allow.
//!
//! The lifetime is fixed by deployment configuration. Whoever invokes
//! [`PanicUnlock::create`] cannot choose it.

use crate::error::OverrideResult;
use crate::host::{current_actor, machine_hostname};
use crate::persist::{remove_if_present, write_atomic};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Override artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideToken {
    pub expires_at: DateTime<Utc>,
}

impl OverrideToken {
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Reads and writes the override artifact.
#[derive(Debug, Clone)]
pub struct OverrideStore {
    path: PathBuf,
}

impl OverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current token, if one exists and parses. Unreadable tokens count as absent.
    pub fn load(&self) -> Option<OverrideToken> {
        let raw = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ignoring unparseable override token");
                None
            }
        }
    }

    fn write(&self, token: &OverrideToken) -> OverrideResult<()> {
        let json = serde_json::to_vec(&serde_json::json!({
            "expires_at": token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }))?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    fn remove(&self) -> OverrideResult<bool> {
        Ok(remove_if_present(&self.path)?)
    }
}

/// Result of removing the override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    AlreadyAbsent,
}

/// Creates and removes the override token.
#[derive(Debug, Clone)]
pub struct PanicUnlock {
    store: OverrideStore,
    ttl: Duration,
    audit: bool,
}

impl PanicUnlock {
    pub fn new(store: OverrideStore, ttl: Duration, audit: bool) -> Self {
        Self { store, ttl, audit }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Writes a token expiring `ttl` after `now`, replacing any existing one.
    pub fn create(&self, now: DateTime<Utc>) -> OverrideResult<OverrideToken> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let token = OverrideToken {
            expires_at: expires_at.trunc_subsecs(0),
        };
        self.store.write(&token)?;

        if self.audit {
            info!(
                method = "cli",
                command = "create-override",
                ttl_applied = self.ttl.as_secs(),
                expires_at = %token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                actor = %current_actor(),
                host = %machine_hostname(),
                at = %now.to_rfc3339_opts(SecondsFormat::Secs, true),
                "license panic unlock created"
            );
        }
        Ok(token)
    }

    /// Deletes the token. Succeeds when there is nothing to delete.
    pub fn remove(&self, now: DateTime<Utc>) -> OverrideResult<RemoveOutcome> {
        if !self.store.remove()? {
            debug!(path = %self.store.path().display(), "no override token present");
            return Ok(RemoveOutcome::AlreadyAbsent);
        }

        if self.audit {
            info!(
                method = "cli",
                command = "remove-override",
                actor = %current_actor(),
                host = %machine_hostname(),
                at = %now.to_rfc3339_opts(SecondsFormat::Secs, true),
                "license panic unlock removed"
            );
        }
        Ok(RemoveOutcome::Removed)
    }
}
