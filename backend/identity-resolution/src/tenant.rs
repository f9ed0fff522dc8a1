//! Tenant container resolution.
//!
//! Every tenant keeps its identity records under a fixed two-level
//! structural path: tenant root → `system` → `people`. Resolution is a pure
//! memoized lookup; a missing level is a fatal misconfiguration, never
//! retried and never cached.

use crate::error::{IdentityError, Result};
use crate::matcher::UsernameMatcher;
use crate::model::{NodeRef, Tenant};
use crate::store::{ContentStore, TxnHandle};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

pub const SYSTEM_CONTAINER: &str = "system";
pub const PEOPLE_CONTAINER: &str = "people";

pub struct ContainerResolver {
    store: Arc<dyn ContentStore>,
    containers: DashMap<Tenant, NodeRef>,
}

impl ContainerResolver {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            containers: DashMap::new(),
        }
    }

    /// The people container for `tenant`, resolving and caching it on first
    /// use. Entries are never evicted during normal operation.
    pub fn resolve(&self, txn: &TxnHandle, tenant: &Tenant) -> Result<NodeRef> {
        if let Some(cached) = self.containers.get(tenant) {
            return Ok(*cached);
        }

        let root = self
            .store
            .root_node(txn, tenant)?
            .ok_or_else(|| {
                IdentityError::Configuration(format!("no store root for tenant {tenant}"))
            })?;

        let system = self.level(txn, root, SYSTEM_CONTAINER)?;
        let people = self.level(txn, system, PEOPLE_CONTAINER)?;

        self.containers.insert(tenant.clone(), people);
        Ok(people)
    }

    /// Administrative reset; normal operation never evicts.
    pub fn invalidate(&self, tenant: &Tenant) {
        self.containers.remove(tenant);
    }

    fn level(&self, txn: &TxnHandle, parent: NodeRef, name: &str) -> Result<NodeRef> {
        self.store
            .children_named(txn, parent, name)?
            .first()
            .copied()
            .ok_or_else(|| {
                IdentityError::Configuration(format!(
                    "required people system path not found: {name}"
                ))
            })
    }
}

/// Bring a caller-supplied identifier in line with the tenant it is being
/// used in: unqualified identifiers get the tenant domain forced onto them,
/// identifiers qualified with a different domain are rejected. A no-op for
/// the default tenant and for deployments without a domain separator.
pub fn qualify_for_tenant(
    identifier: &str,
    tenant: &Tenant,
    matcher: &UsernameMatcher,
) -> Result<String> {
    if tenant.is_default() || matcher.domain_separator().is_empty() {
        return Ok(identifier.to_owned());
    }

    match identifier.split_once(matcher.domain_separator()) {
        None => {
            let qualified = format!(
                "{identifier}{}{}",
                matcher.domain_separator(),
                tenant.as_str()
            );
            warn!(identifier = %qualified, "qualified identifier with current tenant domain");
            Ok(qualified)
        }
        Some((_, domain)) => {
            let agrees = if matcher.domains_case_sensitive() {
                domain == tenant.as_str()
            } else {
                domain.to_lowercase() == tenant.as_str()
            };
            if agrees {
                Ok(identifier.to_owned())
            } else {
                Err(IdentityError::InvalidIdentifier(format!(
                    "identifier domain '{domain}' does not match tenant '{tenant}'"
                )))
            }
        }
    }
}
