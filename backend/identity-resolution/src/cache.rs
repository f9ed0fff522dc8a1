//! Identifier-to-candidate-set cache.
//!
//! A secondary index over the backing store: folded identifier → the record
//! references last seen matching it. Coherence is best-effort by design.
//! Readers re-validate every cached reference against the store and the
//! matcher; writers invalidate their own entries and rely on other
//! transactions correcting staleness lazily on their next read. Entries are
//! only ever written for lookups that resolved to a single, non-duplicate
//! match, so the cache never memorizes a decision that still needs
//! reconciliation.

use crate::model::{NodeRef, Tenant};
use dashmap::DashMap;
use std::collections::HashSet;

pub struct IdentityCache {
    entries: DashMap<(Tenant, String), Vec<NodeRef>>,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, tenant: &Tenant, key: &str) -> Option<Vec<NodeRef>> {
        self.entries
            .get(&(tenant.clone(), key.to_owned()))
            .map(|entry| entry.clone())
    }

    pub fn put(&self, tenant: &Tenant, key: &str, refs: Vec<NodeRef>) {
        self.entries.insert((tenant.clone(), key.to_owned()), refs);
    }

    pub fn invalidate(&self, tenant: &Tenant, key: &str) {
        self.entries.remove(&(tenant.clone(), key.to_owned()));
    }

    /// Drop references the store no longer knows from an existing entry,
    /// without creating the entry when absent. Mirrors the read path's lazy
    /// correction: a deleted record disappears from the index the first time
    /// any reader notices.
    pub fn prune(&self, tenant: &Tenant, key: &str, dead: &HashSet<NodeRef>) {
        if dead.is_empty() {
            return;
        }
        if let Some(mut entry) = self.entries.get_mut(&(tenant.clone(), key.to_owned())) {
            entry.retain(|node| !dead.contains(node));
        }
    }
}
