//! Identity resolution façade.
//!
//! Composes the matcher, cache, container resolver, duplicate tie-break,
//! cleanup janitor and quota enforcer behind the public operations: resolve,
//! exists, create, set attributes, delete. Every operation takes the ambient
//! transaction and the tenant explicitly; the subsystem holds no per-request
//! state of its own.

use crate::cache::IdentityCache;
use crate::cleanup::{rewrite_identifier, DuplicateJanitor, RenameWindow};
use crate::config::Settings;
use crate::duplicates::{select_canonical, Resolution, TieBreakPolicy};
use crate::error::{IdentityError, Result};
use crate::matcher::UsernameMatcher;
use crate::model::{
    default_attributes, AttrMap, AttrValue, CandidateSnapshot, IdentifierClass, NodeRef,
    ProfileAttr, Tenant, MUTABLE_ATTRIBUTES,
};
use crate::quota::QuotaEnforcer;
use crate::store::{
    ContentStore, CredentialStore, HomeProvisioner, QuotaUsage, TxnBoundary, TxnHandle, TxnRunner,
    ZoneAuthority,
};
use crate::tenant::{qualify_for_tenant, ContainerResolver};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// The external services the subsystem is wired to.
pub struct Collaborators {
    pub store: Arc<dyn ContentStore>,
    pub boundary: Arc<dyn TxnBoundary>,
    pub runner: Arc<dyn TxnRunner>,
    pub usage: Arc<dyn QuotaUsage>,
    pub zones: Arc<dyn ZoneAuthority>,
    pub credentials: Arc<dyn CredentialStore>,
    pub homes: Arc<dyn HomeProvisioner>,
}

pub struct IdentityService {
    settings: Settings,
    matcher: Arc<UsernameMatcher>,
    cache: Arc<IdentityCache>,
    containers: ContainerResolver,
    janitor: Arc<DuplicateJanitor>,
    quota: Arc<QuotaEnforcer>,
    window: Arc<RenameWindow>,
    store: Arc<dyn ContentStore>,
    usage: Arc<dyn QuotaUsage>,
    zones: Arc<dyn ZoneAuthority>,
    credentials: Arc<dyn CredentialStore>,
    homes: Arc<dyn HomeProvisioner>,
}

impl IdentityService {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            boundary,
            runner,
            usage,
            zones,
            credentials,
            homes,
        } = collaborators;

        let matcher = Arc::new(UsernameMatcher::from_settings(&settings));
        let cache = Arc::new(IdentityCache::new());
        let window = Arc::new(RenameWindow::new());
        let janitor = Arc::new(DuplicateJanitor::new(
            settings.duplicate_mode,
            store.clone(),
            boundary.clone(),
            runner,
            zones.clone(),
            cache.clone(),
            matcher.clone(),
            window.clone(),
        ));
        let quota = Arc::new(QuotaEnforcer::new(usage.clone(), boundary));

        Self {
            matcher,
            cache: cache.clone(),
            containers: ContainerResolver::new(store.clone()),
            janitor,
            quota,
            window,
            store,
            usage,
            zones,
            credentials,
            homes,
            settings,
        }
    }

    pub fn matcher(&self) -> &UsernameMatcher {
        &self.matcher
    }

    /// Whether resolution auto-creates missing identities when asked to.
    pub fn create_missing_enabled(&self) -> bool {
        self.settings.create_missing
    }

    /// The profile attributes external synchronizers may write.
    pub fn mutable_attributes(&self) -> &'static [ProfileAttr] {
        MUTABLE_ATTRIBUTES
    }

    /// Resolve an identifier to its canonical identity record.
    ///
    /// Zero matches create a new record when `auto_create` is set, creation
    /// is enabled and the ambient transaction is read-write, and fail with
    /// `NotFound` otherwise. A single match gets its home location
    /// provisioned lazily. Multiple matches are tie-broken; the losers are
    /// flagged for post-commit cleanup.
    pub fn resolve(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
        auto_create: bool,
    ) -> Result<NodeRef> {
        if identifier.is_empty() {
            return Err(IdentityError::NotFound(identifier.to_owned()));
        }

        match self.lookup(txn, tenant, identifier)? {
            Some(node) => {
                if auto_create {
                    self.ensure_home(txn, node)?;
                }
                Ok(node)
            }
            None => {
                if auto_create && self.settings.create_missing && txn.is_read_write() {
                    self.create_missing_identity(txn, tenant, identifier)
                } else {
                    Err(IdentityError::NotFound(identifier.to_owned()))
                }
            }
        }
    }

    /// `resolve` with no side effects and no failure on a miss.
    pub fn exists(&self, txn: &TxnHandle, tenant: &Tenant, identifier: &str) -> Result<bool> {
        Ok(self.lookup(txn, tenant, identifier)?.is_some())
    }

    /// Create a new identity record from the supplied attributes.
    ///
    /// `zones` of `None` joins the collaborator's default zone set; an empty
    /// set joins nothing.
    pub fn create(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        mut attributes: AttrMap,
        zones: Option<HashSet<String>>,
    ) -> Result<NodeRef> {
        let supplied = attributes
            .get(&ProfileAttr::Username)
            .and_then(AttrValue::as_text)
            .ok_or_else(|| {
                IdentityError::InvalidIdentifier("no canonical identifier supplied".to_owned())
            })?
            .to_owned();

        // Tally before any validation so a failed commit can still name the
        // identifiers this transaction touched.
        if self.usage.max_identities().is_some() {
            QuotaEnforcer::track(&self.quota, txn, &supplied);
        }

        if IdentifierClass::of(&supplied) != IdentifierClass::Identity {
            return Err(IdentityError::InvalidIdentifier(format!(
                "'{supplied}' is an authority name, not an identity"
            )));
        }

        let identifier = qualify_for_tenant(&supplied, tenant, &self.matcher)?;

        if self.exists(txn, tenant, &identifier)? {
            return Err(IdentityError::AlreadyExists(identifier));
        }

        attributes.insert(ProfileAttr::Username, AttrValue::Text(identifier.clone()));
        attributes
            .entry(ProfileAttr::SizeCurrent)
            .or_insert(AttrValue::Long(0));

        let container = self.containers.resolve(txn, tenant)?;
        let node = self.store.create_node(
            txn,
            container,
            &self.matcher.cache_key(&identifier),
            attributes,
        )?;

        let zones = zones.unwrap_or_else(|| self.zones.default_zones());
        for zone in &zones {
            // Zone membership preserves the identifier's original case.
            self.zones.attach(txn, zone, node, &identifier)?;
        }

        self.cache
            .invalidate(tenant, &self.matcher.cache_key(&identifier));

        debug!(identifier = %identifier, %node, "created identity record");
        Ok(node)
    }

    /// Merge the supplied attributes into an existing record, creating one
    /// first when missing and creation is enabled.
    ///
    /// The canonical identifier is overwritten back to its stored value; the
    /// one sanctioned exception is a case-only respelling under
    /// case-insensitive matching, which is applied as a full identifier
    /// change (association, zone authority and cache follow it).
    pub fn set_attributes(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
        mut attributes: AttrMap,
        auto_create: bool,
    ) -> Result<()> {
        let node = match self.lookup(txn, tenant, identifier)? {
            Some(node) => {
                if auto_create {
                    self.ensure_home(txn, node)?;
                }
                node
            }
            None => {
                if self.settings.create_missing {
                    self.create_missing_identity(txn, tenant, identifier)?
                } else {
                    return Err(IdentityError::NotFound(identifier.to_owned()));
                }
            }
        };

        let stored = self.stored_identifier(txn, node)?;
        let suggested = attributes
            .get(&ProfileAttr::Username)
            .and_then(AttrValue::as_text)
            .map(str::to_owned);

        let respelling = match suggested {
            Some(s)
                if !self.matcher.usernames_case_sensitive()
                    && s != stored
                    && self.matcher.cache_key(&s) == self.matcher.cache_key(&stored) =>
            {
                Some(s)
            }
            _ => None,
        };

        if let Some(respelled) = respelling {
            rewrite_identifier(
                self.store.as_ref(),
                self.zones.as_ref(),
                self.cache.as_ref(),
                &self.matcher,
                &self.window,
                txn,
                tenant,
                node,
                &respelled,
            )?;
            attributes.insert(ProfileAttr::Username, AttrValue::Text(respelled));
        } else {
            attributes.insert(ProfileAttr::Username, AttrValue::Text(stored));
        }

        self.store.set_attrs(txn, node, attributes)
    }

    /// Change a record's canonical identifier spelling. Only case-only
    /// changes are sanctioned outside the cleanup job's merge window.
    pub fn rename_identifier(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
        new_identifier: &str,
    ) -> Result<()> {
        let node = self
            .lookup(txn, tenant, identifier)?
            .ok_or_else(|| IdentityError::NotFound(identifier.to_owned()))?;
        rewrite_identifier(
            self.store.as_ref(),
            self.zones.as_ref(),
            self.cache.as_ref(),
            &self.matcher,
            &self.window,
            txn,
            tenant,
            node,
            new_identifier,
        )
    }

    /// Delete the identity the identifier resolves to. A miss is not an
    /// error; there is nothing to delete.
    pub fn delete(&self, txn: &TxnHandle, tenant: &Tenant, identifier: &str) -> Result<()> {
        let Some(canonical) = self.canonical_identifier(txn, tenant, identifier)? else {
            return Ok(());
        };
        let node = self.lookup(txn, tenant, &canonical)?;
        self.delete_impl(txn, tenant, Some(&canonical), node)
    }

    /// Delete by record reference.
    pub fn delete_record(&self, txn: &TxnHandle, tenant: &Tenant, node: NodeRef) -> Result<()> {
        let identifier = self
            .store
            .get_attr(txn, node, ProfileAttr::Username)?
            .and_then(AttrValue::into_text)
            .ok_or_else(|| IdentityError::Store(format!("{node} is not an identity record")))?;
        self.delete_impl(txn, tenant, Some(&identifier), Some(node))
    }

    /// The stored canonical spelling for a caller-supplied identifier.
    pub fn canonical_identifier(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
    ) -> Result<Option<String>> {
        let Some(node) = self.lookup(txn, tenant, identifier)? else {
            return Ok(None);
        };
        if !self.store.exists(txn, node)? {
            return Ok(None);
        }
        Ok(self
            .store
            .get_attr(txn, node, ProfileAttr::Username)?
            .and_then(AttrValue::into_text))
    }

    /// Every identity record under the tenant's people container.
    pub fn all_identities(&self, txn: &TxnHandle, tenant: &Tenant) -> Result<Vec<NodeRef>> {
        let container = self.containers.resolve(txn, tenant)?;
        self.store.children(txn, container)
    }

    // ------------------------------------------------------------------
    // Lookup path
    // ------------------------------------------------------------------

    /// Core lookup: cache → store, candidate validation, duplicate handling.
    /// Returns the single canonical record or `None`.
    fn lookup(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
    ) -> Result<Option<NodeRef>> {
        let key = self.matcher.cache_key(identifier);

        let (all_refs, fresh) = match self.cache.get(tenant, &key) {
            Some(refs) => (refs, false),
            None => {
                let container = self.containers.resolve(txn, tenant)?;
                (self.store.children_named(txn, container, &key)?, true)
            }
        };

        // Validate every candidate against the store: gone records are
        // pruned, records whose identifier no longer satisfies the matcher
        // are excluded from this lookup but stay indexed under the folded
        // key.
        let mut matching = Vec::with_capacity(all_refs.len());
        let mut dead = HashSet::new();
        for &node in &all_refs {
            if !self.store.exists(txn, node)? {
                dead.insert(node);
                continue;
            }
            let stored = self.store.get_attr(txn, node, ProfileAttr::Username)?;
            if let Some(stored) = stored.as_ref().and_then(|v| v.as_text()) {
                if self.matcher.matches(identifier, stored) {
                    matching.push(node);
                }
            }
        }

        self.cache.prune(tenant, &key, &dead);

        match matching.len() {
            0 => Ok(None),
            1 => {
                if fresh {
                    // Cache only unambiguous results; a candidate set that
                    // needed duplicate processing is left uncached so the
                    // next reader re-examines it.
                    let mut live: Vec<NodeRef> = all_refs;
                    live.retain(|node| !dead.contains(node));
                    self.cache.put(tenant, &key, live);
                }
                Ok(Some(matching[0]))
            }
            _ => self
                .handle_duplicates(txn, tenant, identifier, matching)
                .map(Some),
        }
    }

    fn handle_duplicates(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
        candidates: Vec<NodeRef>,
    ) -> Result<NodeRef> {
        if !self.settings.process_duplicates {
            return Err(IdentityError::Ambiguous {
                identifier: identifier.to_owned(),
                detail: self.matcher.sensitivity_note(),
            });
        }

        let mut snapshots = Vec::with_capacity(candidates.len());
        for node in candidates {
            snapshots.push(self.snapshot(txn, node)?);
        }

        let policy = TieBreakPolicy {
            last_is_best: self.settings.last_is_best,
            include_auto_created: self.settings.include_auto_created,
            default_home_provider: self.settings.default_home_provider.clone(),
        };
        let Some(Resolution { winner, losers }) = select_canonical(snapshots, &policy) else {
            return Err(IdentityError::Store(
                "duplicate handling invoked with no candidates".to_owned(),
            ));
        };

        warn!(
            identifier = %identifier,
            winner = %winner.node,
            losers = losers.len(),
            "resolved duplicate identity records"
        );

        DuplicateJanitor::flag(
            &self.janitor,
            txn,
            tenant,
            losers.into_iter().map(|snapshot| snapshot.node),
        );

        Ok(winner.node)
    }

    fn snapshot(&self, txn: &TxnHandle, node: NodeRef) -> Result<CandidateSnapshot> {
        let attrs = self.store.get_attrs(txn, node)?;
        let text = |attr: ProfileAttr| {
            attrs
                .get(&attr)
                .and_then(AttrValue::as_text)
                .map(str::to_owned)
        };
        Ok(CandidateSnapshot {
            node,
            sequence: self.store.sequence(txn, node)?,
            identifier: text(ProfileAttr::Username).unwrap_or_default(),
            first_name: text(ProfileAttr::FirstName),
            last_name: text(ProfileAttr::LastName),
            email: text(ProfileAttr::Email),
            org_id: text(ProfileAttr::OrgId),
            home_provider: text(ProfileAttr::HomeFolderProvider),
        })
    }

    // ------------------------------------------------------------------
    // Creation / deletion internals
    // ------------------------------------------------------------------

    fn create_missing_identity(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: &str,
    ) -> Result<NodeRef> {
        let attributes = default_attributes(
            identifier,
            self.matcher.base_name(identifier),
            &self.settings.default_home_provider,
        );
        debug!(identifier = %identifier, "auto-creating missing identity");
        self.create(txn, tenant, attributes, None)
    }

    fn ensure_home(&self, txn: &TxnHandle, node: NodeRef) -> Result<()> {
        // Provisioning writes; it has to wait for a read-write transaction.
        if !txn.is_read_write() {
            return Ok(());
        }
        let home = self.store.get_attr(txn, node, ProfileAttr::HomeFolder)?;
        if home.is_none() {
            self.homes.ensure_home(txn, node)?;
        }
        Ok(())
    }

    fn stored_identifier(&self, txn: &TxnHandle, node: NodeRef) -> Result<String> {
        self.store
            .get_attr(txn, node, ProfileAttr::Username)?
            .and_then(AttrValue::into_text)
            .ok_or_else(|| IdentityError::Store(format!("record {node} has no identifier")))
    }

    fn delete_impl(
        &self,
        txn: &TxnHandle,
        tenant: &Tenant,
        identifier: Option<&str>,
        node: Option<NodeRef>,
    ) -> Result<()> {
        if let Some(identifier) = identifier {
            // Credential and session removal are best-effort: externally
            // authenticated identities have nothing stored here.
            if let Err(e) = self.credentials.delete_credentials(identifier) {
                warn!(identifier = %identifier, error = %e, "failed to delete credentials");
            }
            if let Err(e) = self.credentials.invalidate_sessions(identifier) {
                warn!(identifier = %identifier, error = %e, "failed to invalidate sessions");
            }

            self.zones.remove_access_entries(identifier)?;
        }

        if let Some(node) = node {
            self.store.delete_node(txn, node)?;
        }

        if let Some(identifier) = identifier {
            self.cache
                .invalidate(tenant, &self.matcher.cache_key(identifier));
        }

        // Deletion changes the total, so the commit-time recount must run
        // even though nothing was created.
        if self.usage.max_identities().is_some() {
            QuotaEnforcer::register(&self.quota, txn);
        }

        Ok(())
    }
}
