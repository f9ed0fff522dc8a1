/// Identity Resolution Library
///
/// Maps user-supplied identifiers to canonical identity records in a
/// transactional hierarchical store, tolerating stale and case-variant
/// duplicate matches. Duplicates are tie-broken deterministically at read
/// time and reconciled after commit; an optional identity-count quota is
/// enforced at the pre-commit boundary.
///
/// ## Modules
///
/// - `config`: Subsystem configuration
/// - `error`: Error types
/// - `matcher`: Identifier matching under case-sensitivity policy
/// - `model`: Record references, tenants, attributes
/// - `store`: Collaborator interfaces (store, transactions, quota, zones)
/// - `tenant`: Per-tenant people container resolution
/// - `cache`: Identifier → candidate-set cache
/// - `duplicates`: Duplicate tie-break and placeholder classification
/// - `cleanup`: Post-commit duplicate reconciliation
/// - `quota`: Commit-time identity quota enforcement
/// - `service`: The resolution façade
/// - `memory`: In-memory reference collaborators for tests
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod quota;
pub mod service;
pub mod store;
pub mod tenant;

// Re-export commonly used types
pub use config::{DuplicateMode, Settings};
pub use error::{IdentityError, Result};
pub use matcher::UsernameMatcher;
pub use model::{AttrMap, AttrValue, NodeRef, ProfileAttr, Tenant, TxnId};
pub use service::{Collaborators, IdentityService};
pub use store::{TxnHandle, TxnMode};
