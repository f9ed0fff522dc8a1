//! In-memory reference implementations of the collaborator interfaces.
//!
//! One [`MemoryBackend`] plays the backing store, the transaction boundary
//! and the retrying transaction runner; the small `Memory*` types cover the
//! remaining collaborators. The integration tests run against these, and
//! downstream crates can use them to test their own wiring without a real
//! storage engine.
//!
//! Transactions are snapshot-on-begin / restore-on-rollback and execute
//! serially; this is deliberately not a production concurrency model.

use crate::error::{IdentityError, Result};
use crate::model::{AttrMap, AttrValue, NodeRef, ProfileAttr, Tenant, TxnId};
use crate::store::{
    ContentStore, CredentialStore, HomeProvisioner, QuotaUsage, TxnBoundary, TxnHandle,
    TxnMode, TxnObserver, TxnRunner, ZoneAuthority,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone)]
struct NodeRecord {
    parent: Option<NodeRef>,
    child_name: String,
    attrs: AttrMap,
    sequence: u64,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
struct State {
    nodes: HashMap<NodeRef, NodeRecord>,
    roots: HashMap<Tenant, NodeRef>,
    next_sequence: u64,
}

impl State {
    fn record(&self, node: NodeRef) -> Result<&NodeRecord> {
        self.nodes
            .get(&node)
            .ok_or_else(|| IdentityError::Store(format!("no such record: {node}")))
    }

    fn record_mut(&mut self, node: NodeRef) -> Result<&mut NodeRecord> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| IdentityError::Store(format!("no such record: {node}")))
    }

    fn insert_node(
        &mut self,
        parent: Option<NodeRef>,
        child_name: &str,
        attrs: AttrMap,
    ) -> NodeRef {
        let node = NodeRef::new();
        self.next_sequence += 1;
        self.nodes.insert(
            node,
            NodeRecord {
                parent,
                child_name: child_name.to_owned(),
                attrs,
                sequence: self.next_sequence,
                created_at: Utc::now(),
            },
        );
        node
    }

    fn children_of(&self, parent: NodeRef, name: Option<&str>) -> Vec<NodeRef> {
        let mut children: Vec<(u64, NodeRef)> = self
            .nodes
            .iter()
            .filter(|(_, record)| {
                record.parent == Some(parent)
                    && name.map_or(true, |name| record.child_name == name)
            })
            .map(|(node, record)| (record.sequence, *node))
            .collect();
        children.sort_by_key(|(sequence, _)| *sequence);
        children.into_iter().map(|(_, node)| node).collect()
    }
}

/// In-memory store, transaction boundary and retrying runner in one.
pub struct MemoryBackend {
    state: RwLock<State>,
    observers: Mutex<HashMap<TxnId, Vec<Arc<dyn TxnObserver>>>>,
    store_lookups: AtomicU64,
    fail_commits: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            observers: Mutex::new(HashMap::new()),
            store_lookups: AtomicU64::new(0),
            fail_commits: AtomicU32::new(0),
        }
    }

    /// Create the structural containers for a tenant (root → system →
    /// people) and return the people container.
    pub fn bootstrap_tenant(&self, tenant: &Tenant) -> NodeRef {
        let mut state = self.state.write();
        let root = state.insert_node(None, "root", AttrMap::new());
        state.roots.insert(tenant.clone(), root);
        let system = state.insert_node(Some(root), crate::tenant::SYSTEM_CONTAINER, AttrMap::new());
        state.insert_node(Some(system), crate::tenant::PEOPLE_CONTAINER, AttrMap::new())
    }

    /// Create a tenant root with an incomplete structural path, for
    /// misconfiguration tests. `with_system` controls whether the system
    /// container exists (the people container never does).
    pub fn bootstrap_broken_tenant(&self, tenant: &Tenant, with_system: bool) {
        let mut state = self.state.write();
        let root = state.insert_node(None, "root", AttrMap::new());
        state.roots.insert(tenant.clone(), root);
        if with_system {
            state.insert_node(Some(root), crate::tenant::SYSTEM_CONTAINER, AttrMap::new());
        }
    }

    /// Make the next `n` commits fail with a conflict, to exercise the
    /// retrying runner.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Number of named child lookups served by the store (not the cache).
    pub fn store_lookups(&self) -> u64 {
        self.store_lookups.load(Ordering::SeqCst)
    }

    /// Creation timestamp of a record, if it exists.
    pub fn created_at(&self, node: NodeRef) -> Option<DateTime<Utc>> {
        self.state.read().nodes.get(&node).map(|record| record.created_at)
    }

    /// Run `work` inside a new transaction. On success the boundary
    /// observers fire (`before_commit` may abort, rolling everything back);
    /// on failure the state is restored to the snapshot taken at begin.
    pub fn in_txn<T>(
        &self,
        mode: TxnMode,
        work: impl FnOnce(&TxnHandle) -> Result<T>,
    ) -> Result<T> {
        let txn = TxnHandle::new(TxnId::new(), mode);
        let snapshot = self.state.read().clone();

        let value = match work(&txn) {
            Ok(value) => value,
            Err(e) => {
                self.roll_back(&txn, snapshot);
                return Err(e);
            }
        };

        let observers = self
            .observers
            .lock()
            .get(&txn.id())
            .cloned()
            .unwrap_or_default();

        for observer in &observers {
            if let Err(e) = observer.before_commit(&txn) {
                self.roll_back(&txn, snapshot);
                return Err(e);
            }
        }

        // Injected optimistic-concurrency failure.
        let conflicted = self
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            self.roll_back(&txn, snapshot);
            return Err(IdentityError::Conflict);
        }

        self.observers.lock().remove(&txn.id());
        for observer in &observers {
            observer.after_commit(txn.id());
        }
        Ok(value)
    }

    fn roll_back(&self, txn: &TxnHandle, snapshot: State) {
        *self.state.write() = snapshot;
        let observers = self.observers.lock().remove(&txn.id()).unwrap_or_default();
        for observer in &observers {
            observer.after_rollback(txn.id());
        }
    }

    fn require_write(&self, txn: &TxnHandle) -> Result<()> {
        if txn.is_read_write() {
            Ok(())
        } else {
            Err(IdentityError::Store(
                "write attempted in a read-only transaction".to_owned(),
            ))
        }
    }
}

impl ContentStore for MemoryBackend {
    fn root_node(&self, _txn: &TxnHandle, tenant: &Tenant) -> Result<Option<NodeRef>> {
        Ok(self.state.read().roots.get(tenant).copied())
    }

    fn children(&self, _txn: &TxnHandle, parent: NodeRef) -> Result<Vec<NodeRef>> {
        Ok(self.state.read().children_of(parent, None))
    }

    fn children_named(
        &self,
        _txn: &TxnHandle,
        parent: NodeRef,
        folded_name: &str,
    ) -> Result<Vec<NodeRef>> {
        self.store_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.read().children_of(parent, Some(folded_name)))
    }

    fn exists(&self, _txn: &TxnHandle, node: NodeRef) -> Result<bool> {
        Ok(self.state.read().nodes.contains_key(&node))
    }

    fn sequence(&self, _txn: &TxnHandle, node: NodeRef) -> Result<u64> {
        Ok(self.state.read().record(node)?.sequence)
    }

    fn get_attr(
        &self,
        _txn: &TxnHandle,
        node: NodeRef,
        attr: ProfileAttr,
    ) -> Result<Option<AttrValue>> {
        Ok(self.state.read().record(node)?.attrs.get(&attr).cloned())
    }

    fn get_attrs(&self, _txn: &TxnHandle, node: NodeRef) -> Result<AttrMap> {
        Ok(self.state.read().record(node)?.attrs.clone())
    }

    fn set_attrs(&self, txn: &TxnHandle, node: NodeRef, attrs: AttrMap) -> Result<()> {
        self.require_write(txn)?;
        let mut state = self.state.write();
        state.record_mut(node)?.attrs.extend(attrs);
        Ok(())
    }

    fn create_node(
        &self,
        txn: &TxnHandle,
        parent: NodeRef,
        folded_name: &str,
        attrs: AttrMap,
    ) -> Result<NodeRef> {
        self.require_write(txn)?;
        let mut state = self.state.write();
        state.record(parent)?;
        Ok(state.insert_node(Some(parent), folded_name, attrs))
    }

    fn rename_child(&self, txn: &TxnHandle, node: NodeRef, folded_name: &str) -> Result<()> {
        self.require_write(txn)?;
        let mut state = self.state.write();
        state.record_mut(node)?.child_name = folded_name.to_owned();
        Ok(())
    }

    fn delete_node(&self, txn: &TxnHandle, node: NodeRef) -> Result<()> {
        self.require_write(txn)?;
        let mut state = self.state.write();
        state.record(node)?;

        // Remove the whole subtree, the way a hierarchical store would.
        let mut doomed = vec![node];
        let mut index = 0;
        while index < doomed.len() {
            let parent = doomed[index];
            index += 1;
            doomed.extend(state.children_of(parent, None));
        }
        for node in doomed {
            state.nodes.remove(&node);
        }
        Ok(())
    }
}

impl TxnBoundary for MemoryBackend {
    fn bind(&self, txn: &TxnHandle, observer: Arc<dyn TxnObserver>) {
        let mut observers = self.observers.lock();
        let bound = observers.entry(txn.id()).or_default();
        if !bound.iter().any(|existing| Arc::ptr_eq(existing, &observer)) {
            bound.push(observer);
        }
    }
}

impl TxnRunner for MemoryBackend {
    fn run(&self, read_only: bool, work: &mut dyn FnMut(&TxnHandle) -> Result<()>) -> Result<()> {
        let mode = if read_only {
            TxnMode::ReadOnly
        } else {
            TxnMode::ReadWrite
        };
        let mut attempt = 0;
        loop {
            match self.in_txn(mode, &mut *work) {
                Err(e) if e.is_retryable() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "transaction conflicted, retrying");
                }
                outcome => return outcome,
            }
        }
    }
}

/// Quota collaborator counting identity records in a [`MemoryBackend`].
/// The recount is "privileged" trivially: the backend has no access control.
pub struct MemoryQuota {
    backend: Arc<MemoryBackend>,
    max: Mutex<Option<u64>>,
}

impl MemoryQuota {
    pub fn new(backend: Arc<MemoryBackend>, max: Option<u64>) -> Self {
        Self {
            backend,
            max: Mutex::new(max),
        }
    }

    pub fn set_max(&self, max: Option<u64>) {
        *self.max.lock() = max;
    }
}

impl QuotaUsage for MemoryQuota {
    fn max_identities(&self) -> Option<u64> {
        *self.max.lock()
    }

    fn refresh_identity_count(&self) -> Result<u64> {
        let count = self
            .backend
            .state
            .read()
            .nodes
            .values()
            .filter(|record| record.attrs.contains_key(&ProfileAttr::Username))
            .count();
        Ok(count as u64)
    }
}

/// Recording zone/authorization collaborator.
#[derive(Default)]
pub struct MemoryZones {
    defaults: Mutex<HashSet<String>>,
    attached: Mutex<Vec<(String, String)>>,
    renamed: Mutex<Vec<(String, String)>>,
    removed: Mutex<Vec<String>>,
}

impl MemoryZones {
    pub fn new(defaults: impl IntoIterator<Item = String>) -> Self {
        Self {
            defaults: Mutex::new(defaults.into_iter().collect()),
            ..Default::default()
        }
    }

    /// `(zone, child_name)` pairs attached so far.
    pub fn attachments(&self) -> Vec<(String, String)> {
        self.attached.lock().clone()
    }

    pub fn renames(&self) -> Vec<(String, String)> {
        self.renamed.lock().clone()
    }

    pub fn removed_entries(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

impl ZoneAuthority for MemoryZones {
    fn default_zones(&self) -> HashSet<String> {
        self.defaults.lock().clone()
    }

    fn attach(
        &self,
        _txn: &TxnHandle,
        zone: &str,
        _node: NodeRef,
        child_name: &str,
    ) -> Result<()> {
        self.attached
            .lock()
            .push((zone.to_owned(), child_name.to_owned()));
        Ok(())
    }

    fn rename_authority(&self, old: &str, new: &str) -> Result<()> {
        self.renamed.lock().push((old.to_owned(), new.to_owned()));
        Ok(())
    }

    fn remove_access_entries(&self, identifier: &str) -> Result<()> {
        self.removed.lock().push(identifier.to_owned());
        Ok(())
    }
}

/// Recording credential store with switchable failure, to exercise the
/// best-effort deletion path.
#[derive(Default)]
pub struct MemoryCredentials {
    deleted: Mutex<Vec<String>>,
    invalidated: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(IdentityError::Store("credential store unavailable".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn delete_credentials(&self, identifier: &str) -> Result<()> {
        self.check()?;
        self.deleted.lock().push(identifier.to_owned());
        Ok(())
    }

    fn invalidate_sessions(&self, identifier: &str) -> Result<()> {
        self.check()?;
        self.invalidated.lock().push(identifier.to_owned());
        Ok(())
    }
}

/// Home provisioner that stamps the record itself as its home location.
pub struct MemoryHomes {
    backend: Arc<MemoryBackend>,
    provisioned: Mutex<Vec<NodeRef>>,
}

impl MemoryHomes {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            provisioned: Mutex::new(Vec::new()),
        }
    }

    pub fn provisioned(&self) -> Vec<NodeRef> {
        self.provisioned.lock().clone()
    }
}

impl HomeProvisioner for MemoryHomes {
    fn ensure_home(&self, txn: &TxnHandle, node: NodeRef) -> Result<()> {
        let mut attrs = AttrMap::new();
        attrs.insert(ProfileAttr::HomeFolder, AttrValue::Ref(node));
        self.backend.set_attrs(txn, node, attrs)?;
        self.provisioned.lock().push(node);
        Ok(())
    }
}
