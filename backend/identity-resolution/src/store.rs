//! Collaborator interfaces.
//!
//! The subsystem consumes its surroundings through these narrow traits: a
//! transactional hierarchical store, the transaction boundary it runs
//! inside, and the quota, zone, credential, and home-provisioning services
//! it touches on the side. Nothing here starts transactions; the ambient
//! [`TxnHandle`] is supplied by the caller and threaded through explicitly.

use crate::error::Result;
use crate::model::{AttrMap, AttrValue, NodeRef, ProfileAttr, Tenant, TxnId};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

/// Descriptor of the ambient transaction a call executes in.
#[derive(Debug, Clone)]
pub struct TxnHandle {
    id: TxnId,
    mode: TxnMode,
}

impl TxnHandle {
    pub fn new(id: TxnId, mode: TxnMode) -> Self {
        Self { id, mode }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn is_read_write(&self) -> bool {
        self.mode == TxnMode::ReadWrite
    }
}

/// Record CRUD and structural navigation in the backing store.
///
/// Child names are pre-folded by the caller (see
/// `UsernameMatcher::cache_key`); the store treats them as opaque keys and
/// may map several records to the same name.
pub trait ContentStore: Send + Sync {
    /// Root record of a tenant partition, if the partition exists.
    fn root_node(&self, txn: &TxnHandle, tenant: &Tenant) -> Result<Option<NodeRef>>;

    /// All child records of `parent`, in creation order.
    fn children(&self, txn: &TxnHandle, parent: NodeRef) -> Result<Vec<NodeRef>>;

    /// Child records of `parent` carrying the given folded name, in creation
    /// order. More than one result is legal (case drift, migration
    /// artifacts); disambiguation is this subsystem's job, not the store's.
    fn children_named(
        &self,
        txn: &TxnHandle,
        parent: NodeRef,
        folded_name: &str,
    ) -> Result<Vec<NodeRef>>;

    fn exists(&self, txn: &TxnHandle, node: NodeRef) -> Result<bool>;

    /// Store-assigned creation sequence number, strictly increasing across
    /// record creations.
    fn sequence(&self, txn: &TxnHandle, node: NodeRef) -> Result<u64>;

    fn get_attr(&self, txn: &TxnHandle, node: NodeRef, attr: ProfileAttr)
        -> Result<Option<AttrValue>>;

    fn get_attrs(&self, txn: &TxnHandle, node: NodeRef) -> Result<AttrMap>;

    /// Upsert the given attributes, leaving others untouched.
    fn set_attrs(&self, txn: &TxnHandle, node: NodeRef, attrs: AttrMap) -> Result<()>;

    fn create_node(
        &self,
        txn: &TxnHandle,
        parent: NodeRef,
        folded_name: &str,
        attrs: AttrMap,
    ) -> Result<NodeRef>;

    /// Re-key a record's parent association after an identifier change.
    fn rename_child(&self, txn: &TxnHandle, node: NodeRef, folded_name: &str) -> Result<()>;

    fn delete_node(&self, txn: &TxnHandle, node: NodeRef) -> Result<()>;
}

/// Commit-boundary hooks. Implemented by the subsystem's janitor and quota
/// enforcer, dispatched by the transaction boundary.
pub trait TxnObserver: Send + Sync {
    /// Runs before the commit; an error aborts it.
    fn before_commit(&self, _txn: &TxnHandle) -> Result<()> {
        Ok(())
    }

    /// Runs after a successful commit.
    fn after_commit(&self, _txn: TxnId) {}

    /// Runs after a rollback, including a rollback caused by a
    /// `before_commit` failure.
    fn after_rollback(&self, _txn: TxnId) {}
}

/// The transaction boundary the ambient transactions pass through.
pub trait TxnBoundary: Send + Sync {
    /// Bind an observer to a transaction. Idempotent: binding the same
    /// observer twice registers it once.
    fn bind(&self, txn: &TxnHandle, observer: Arc<dyn TxnObserver>);
}

/// Retrying unit-of-work executor. Runs `work` in a fresh transaction and
/// re-runs the whole closure when the store reports an
/// optimistic-concurrency conflict at commit.
pub trait TxnRunner: Send + Sync {
    fn run(&self, read_only: bool, work: &mut dyn FnMut(&TxnHandle) -> Result<()>) -> Result<()>;
}

/// Identity-count accounting. Implementations execute the recount with
/// system privileges internally; counting across tenants may be restricted
/// for the calling user.
pub trait QuotaUsage: Send + Sync {
    /// The configured ceiling. `None` disables quota enforcement entirely.
    fn max_identities(&self) -> Option<u64>;

    /// Recompute and return the current total identity count.
    fn refresh_identity_count(&self) -> Result<u64>;
}

/// Authentication-zone membership and access-control bookkeeping.
pub trait ZoneAuthority: Send + Sync {
    /// Zones a new identity joins when the caller supplies none.
    fn default_zones(&self) -> HashSet<String>;

    /// Attach a record to a named zone. The child name preserves the
    /// identifier's original case.
    fn attach(&self, txn: &TxnHandle, zone: &str, node: NodeRef, child_name: &str) -> Result<()>;

    /// Follow an identifier change so permissions stay attached.
    fn rename_authority(&self, old: &str, new: &str) -> Result<()>;

    /// Drop access-control entries held by an identifier.
    fn remove_access_entries(&self, identifier: &str) -> Result<()>;
}

/// Credential and session storage. Failures from both operations are
/// ignorable by contract; externally authenticated identities have nothing
/// stored here.
pub trait CredentialStore: Send + Sync {
    fn delete_credentials(&self, identifier: &str) -> Result<()>;

    fn invalidate_sessions(&self, identifier: &str) -> Result<()>;
}

/// Home-location provisioning, invoked lazily for records without one.
pub trait HomeProvisioner: Send + Sync {
    fn ensure_home(&self, txn: &TxnHandle, node: NodeRef) -> Result<()>;
}
