//! Core data model: record references, tenants, identity attributes.
//!
//! The subsystem never owns record lifetime. A [`NodeRef`] is an opaque
//! pointer into the backing store; all attribute state lives there and is
//! re-read whenever a decision depends on it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Opaque reference to a persisted record in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(Uuid);

impl NodeRef {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Identifier of an ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// An isolated logical partition of identities sharing one container root.
///
/// Domains are folded to lowercase on construction; the empty domain is the
/// unpartitioned (single-tenant) deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant(String);

impl Tenant {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into().to_lowercase())
    }

    pub fn default_domain() -> Self {
        Self(String::new())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(default)")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Attributes stored on an identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileAttr {
    /// The canonical identifier. Immutable outside the sanctioned paths.
    Username,
    FirstName,
    LastName,
    Email,
    OrgId,
    /// Pointer to the identity's provisioned home location, if any.
    HomeFolder,
    HomeFolderProvider,
    SizeCurrent,
    SizeQuota,
}

/// Attribute value; the store only ever hands these back as snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Text(String),
    Long(i64),
    Ref(NodeRef),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            AttrValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            AttrValue::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

pub type AttrMap = HashMap<ProfileAttr, AttrValue>;

/// Syntactic class of a caller-supplied identifier. Group and role authority
/// names share the identifier namespace but are never identity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierClass {
    Identity,
    Group,
    Role,
}

impl IdentifierClass {
    pub fn of(identifier: &str) -> Self {
        if identifier.starts_with("GROUP_") {
            IdentifierClass::Group
        } else if identifier.starts_with("ROLE_") {
            IdentifierClass::Role
        } else {
            IdentifierClass::Identity
        }
    }
}

/// The profile attributes external synchronizers are allowed to write.
pub const MUTABLE_ATTRIBUTES: &[ProfileAttr] = &[
    ProfileAttr::HomeFolder,
    ProfileAttr::FirstName,
    ProfileAttr::LastName,
    ProfileAttr::Email,
    ProfileAttr::OrgId,
];

/// Defaulted attribute map for an auto-created identity.
///
/// The shape is load-bearing: the placeholder classifier recognizes records
/// whose attributes still look exactly like this (see `duplicates`).
pub fn default_attributes(identifier: &str, base_name: &str, home_provider: &str) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert(ProfileAttr::Username, AttrValue::Text(identifier.to_owned()));
    attrs.insert(ProfileAttr::FirstName, AttrValue::Text(base_name.to_owned()));
    attrs.insert(ProfileAttr::LastName, AttrValue::Text(String::new()));
    attrs.insert(ProfileAttr::Email, AttrValue::Text(String::new()));
    attrs.insert(ProfileAttr::OrgId, AttrValue::Text(String::new()));
    attrs.insert(
        ProfileAttr::HomeFolderProvider,
        AttrValue::Text(home_provider.to_owned()),
    );
    attrs.insert(ProfileAttr::SizeCurrent, AttrValue::Long(0));
    // -1 means no per-identity quota
    attrs.insert(ProfileAttr::SizeQuota, AttrValue::Long(-1));
    attrs
}

/// Attribute snapshot used by the duplicate tie-break. Pure data; taken once
/// per candidate at resolution time and never written back.
#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub node: NodeRef,
    /// Store-assigned creation sequence, strictly increasing.
    pub sequence: u64,
    pub identifier: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub home_provider: Option<String>,
}
