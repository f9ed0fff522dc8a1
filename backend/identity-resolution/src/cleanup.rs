//! Deferred duplicate cleanup.
//!
//! Losers of the duplicate tie-break are flagged inside the transaction that
//! noticed them and reconciled only after that transaction commits, in one
//! fresh retrying transaction. The pending work is an explicit queue keyed
//! by transaction id, drained by the commit-boundary observer; nothing is
//! held in global mutable state beyond that queue.
//!
//! Identifier writes are normally refused (see [`rewrite_identifier`]); the
//! merge mode suspends that rule for its own transaction through a scoped
//! [`RenameWindow`] and restores it whether or not the job succeeds.

use crate::cache::IdentityCache;
use crate::config::DuplicateMode;
use crate::error::{IdentityError, Result};
use crate::matcher::UsernameMatcher;
use crate::model::{AttrMap, AttrValue, NodeRef, ProfileAttr, Tenant, TxnId};
use crate::store::{ContentStore, TxnBoundary, TxnHandle, TxnObserver, TxnRunner, ZoneAuthority};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Transactions currently allowed to rewrite canonical identifiers.
pub(crate) struct RenameWindow {
    open: DashMap<TxnId, ()>,
}

impl RenameWindow {
    pub(crate) fn new() -> Self {
        Self {
            open: DashMap::new(),
        }
    }

    fn open(&self, txn: TxnId) {
        self.open.insert(txn, ());
    }

    fn close(&self, txn: TxnId) {
        self.open.remove(&txn);
    }

    fn is_open(&self, txn: TxnId) -> bool {
        self.open.contains_key(&txn)
    }
}

/// Rewrite a record's canonical identifier, keeping the store association,
/// zone authority name and cache in step.
///
/// Refused with [`IdentityError::IdentifierImmutable`] unless the change is
/// case-only (external synchronizers correcting case drift) or the writing
/// transaction holds the rename window (the merge-mode cleanup job).
#[allow(clippy::too_many_arguments)]
pub(crate) fn rewrite_identifier(
    store: &dyn ContentStore,
    zones: &dyn ZoneAuthority,
    cache: &IdentityCache,
    matcher: &UsernameMatcher,
    window: &RenameWindow,
    txn: &TxnHandle,
    tenant: &Tenant,
    node: NodeRef,
    new_identifier: &str,
) -> Result<()> {
    let stored = store
        .get_attr(txn, node, ProfileAttr::Username)?
        .and_then(AttrValue::into_text)
        .ok_or_else(|| IdentityError::Store(format!("record {node} has no identifier")))?;

    if stored == new_identifier {
        return Ok(());
    }

    let case_only = matcher.cache_key(&stored) == matcher.cache_key(new_identifier);
    if !case_only && !window.is_open(txn.id()) {
        return Err(IdentityError::IdentifierImmutable);
    }

    // Keep permissions attached to the record under its new name.
    zones.rename_authority(&stored, new_identifier)?;

    let mut attrs = AttrMap::new();
    attrs.insert(
        ProfileAttr::Username,
        AttrValue::Text(new_identifier.to_owned()),
    );
    store.set_attrs(txn, node, attrs)?;
    store.rename_child(txn, node, &matcher.cache_key(new_identifier))?;

    cache.invalidate(tenant, &matcher.cache_key(&stored));
    Ok(())
}

/// Collects duplicate losers during a transaction and reconciles them after
/// it commits.
pub struct DuplicateJanitor {
    mode: DuplicateMode,
    pending: DashMap<TxnId, Vec<(Tenant, NodeRef)>>,
    store: Arc<dyn ContentStore>,
    boundary: Arc<dyn TxnBoundary>,
    runner: Arc<dyn TxnRunner>,
    zones: Arc<dyn ZoneAuthority>,
    cache: Arc<IdentityCache>,
    matcher: Arc<UsernameMatcher>,
    window: Arc<RenameWindow>,
}

impl DuplicateJanitor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mode: DuplicateMode,
        store: Arc<dyn ContentStore>,
        boundary: Arc<dyn TxnBoundary>,
        runner: Arc<dyn TxnRunner>,
        zones: Arc<dyn ZoneAuthority>,
        cache: Arc<IdentityCache>,
        matcher: Arc<UsernameMatcher>,
        window: Arc<RenameWindow>,
    ) -> Self {
        Self {
            mode,
            pending: DashMap::new(),
            store,
            boundary,
            runner,
            zones,
            cache,
            matcher,
            window,
        }
    }

    /// Flag duplicate losers for post-commit reconciliation. Binds the
    /// janitor to the transaction boundary on first call; repeated calls
    /// within the same transaction only extend the queue.
    pub fn flag(
        janitor: &Arc<Self>,
        txn: &TxnHandle,
        tenant: &Tenant,
        losers: impl IntoIterator<Item = NodeRef>,
    ) {
        janitor.boundary.bind(txn, janitor.clone());
        let mut queue = janitor.pending.entry(txn.id()).or_default();
        for node in losers {
            let item = (tenant.clone(), node);
            if !queue.contains(&item) {
                queue.push(item);
            }
        }
    }

    fn reconcile(&self, job: &TxnHandle, flagged: &[(Tenant, NodeRef)]) -> Result<()> {
        match self.mode {
            DuplicateMode::Leave => {
                debug!(count = flagged.len(), "duplicate identity records left in place");
                Ok(())
            }
            DuplicateMode::Delete => {
                for (tenant, node) in flagged {
                    if !self.store.exists(job, *node)? {
                        continue;
                    }
                    let identifier = self
                        .store
                        .get_attr(job, *node, ProfileAttr::Username)?
                        .and_then(AttrValue::into_text);
                    self.store.delete_node(job, *node)?;
                    if let Some(identifier) = identifier {
                        self.cache.invalidate(tenant, &self.matcher.cache_key(&identifier));
                    }
                }
                info!(count = flagged.len(), "deleted duplicate identity records");
                Ok(())
            }
            DuplicateMode::Merge => {
                for (tenant, node) in flagged {
                    if !self.store.exists(job, *node)? {
                        continue;
                    }
                    let Some(identifier) = self
                        .store
                        .get_attr(job, *node, ProfileAttr::Username)?
                        .and_then(AttrValue::into_text)
                    else {
                        continue;
                    };
                    let renamed = format!("{identifier}-{}", Uuid::new_v4().simple());
                    rewrite_identifier(
                        self.store.as_ref(),
                        self.zones.as_ref(),
                        self.cache.as_ref(),
                        &self.matcher,
                        &self.window,
                        job,
                        tenant,
                        *node,
                        &renamed,
                    )?;
                    info!(old = %identifier, new = %renamed, "split duplicate identity record");
                }
                Ok(())
            }
        }
    }
}

impl TxnObserver for DuplicateJanitor {
    fn after_commit(&self, txn: TxnId) {
        let Some((_, flagged)) = self.pending.remove(&txn) else {
            return;
        };
        if flagged.is_empty() {
            return;
        }

        info!(count = flagged.len(), mode = ?self.mode, "running duplicate cleanup job");

        // A fresh read-write transaction, retried on conflict by the runner.
        // The rename window must be restored no matter how the attempt ends.
        let result = self.runner.run(false, &mut |job| {
            self.window.open(job.id());
            let outcome = self.reconcile(job, &flagged);
            self.window.close(job.id());
            outcome
        });

        // The originating transaction has already committed; a cleanup
        // failure can only be logged.
        if let Err(e) = result {
            error!(error = %e, "duplicate cleanup job failed");
        }
    }

    fn after_rollback(&self, txn: TxnId) {
        self.pending.remove(&txn);
    }
}
