//! Commit-time identity quota enforcement.
//!
//! Creations are tallied per transaction; the pre-commit hook recounts the
//! total through the privileged usage collaborator and fails the commit when
//! the configured ceiling is exceeded. The tally exists only for the error
//! message; the count that matters is always the collaborator's.

use crate::error::{IdentityError, Result};
use crate::model::TxnId;
use crate::store::{QuotaUsage, TxnBoundary, TxnHandle, TxnObserver};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// At most this many identifiers are named in the quota error; the rest
/// collapse into a trailing marker.
const REPORTED_IDENTIFIERS: usize = 5;
const MORE_MARKER: &str = "... more";

pub struct QuotaEnforcer {
    usage: Arc<dyn QuotaUsage>,
    boundary: Arc<dyn TxnBoundary>,
    tally: DashMap<TxnId, Vec<String>>,
}

impl QuotaEnforcer {
    pub(crate) fn new(usage: Arc<dyn QuotaUsage>, boundary: Arc<dyn TxnBoundary>) -> Self {
        Self {
            usage,
            boundary,
            tally: DashMap::new(),
        }
    }

    /// Record an identifier created (or recounted) in this transaction and
    /// make sure the pre-commit check will run. Idempotent per identifier
    /// and per registration.
    pub fn track(enforcer: &Arc<Self>, txn: &TxnHandle, identifier: &str) {
        enforcer.boundary.bind(txn, enforcer.clone());
        let mut created = enforcer.tally.entry(txn.id()).or_default();
        if !created.iter().any(|existing| existing == identifier) {
            created.push(identifier.to_owned());
        }
    }

    /// Make sure the commit-time recount runs without tallying anything;
    /// used on deletion, which changes the total but created nothing.
    pub fn register(enforcer: &Arc<Self>, txn: &TxnHandle) {
        enforcer.boundary.bind(txn, enforcer.clone());
        enforcer.tally.entry(txn.id()).or_default();
    }
}

impl TxnObserver for QuotaEnforcer {
    fn before_commit(&self, txn: &TxnHandle) -> Result<()> {
        let Some(max) = self.usage.max_identities() else {
            return Ok(());
        };

        // Privileged recount: the total spans all tenants and identities.
        let total = self.usage.refresh_identity_count()?;
        debug!(total, max, "identity count refreshed before commit");

        if total > max {
            let created = self
                .tally
                .get(&txn.id())
                .map(|entry| entry.clone())
                .unwrap_or_default();
            let mut identifiers: Vec<String> =
                created.iter().take(REPORTED_IDENTIFIERS).cloned().collect();
            if created.len() > REPORTED_IDENTIFIERS {
                identifiers.push(MORE_MARKER.to_owned());
            }
            warn!(total, max, "maximum identity count exceeded");
            return Err(IdentityError::QuotaExceeded { max, identifiers });
        }

        Ok(())
    }

    fn after_commit(&self, txn: TxnId) {
        self.tally.remove(&txn);
    }

    fn after_rollback(&self, txn: TxnId) {
        self.tally.remove(&txn);
    }
}
