// Integration tests for the identity resolution façade
//
// These tests exercise the full subsystem over the in-memory backend:
// - resolution with and without auto-creation
// - cache population, staleness correction and the no-ambiguity-caching rule
// - duplicate tie-break and post-commit cleanup in all three modes
// - commit-time quota enforcement
// - attribute updates, identifier respelling and deletion

use identity_resolution::memory::{
    MemoryBackend, MemoryCredentials, MemoryHomes, MemoryQuota, MemoryZones,
};
use identity_resolution::model::default_attributes;
use identity_resolution::store::{ContentStore, TxnBoundary, TxnObserver};
use identity_resolution::{
    AttrMap, AttrValue, Collaborators, DuplicateMode, IdentityError, IdentityService, NodeRef,
    ProfileAttr, Result, Settings, Tenant, TxnHandle, TxnId, TxnMode,
};
use std::collections::HashSet;
use std::sync::Arc;

const PROVIDER: &str = "userHomesHomeFolderProvider";

/// Route subsystem logs through a subscriber; run with
/// `RUST_LOG=identity_resolution=debug` to watch the cleanup jobs.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct Harness {
    backend: Arc<MemoryBackend>,
    service: IdentityService,
    zones: Arc<MemoryZones>,
    credentials: Arc<MemoryCredentials>,
    homes: Arc<MemoryHomes>,
    tenant: Tenant,
    people: NodeRef,
}

fn harness(settings: Settings) -> Harness {
    harness_with_quota(settings, None)
}

fn harness_with_quota(settings: Settings, max_identities: Option<u64>) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let tenant = Tenant::default_domain();
    let people = backend.bootstrap_tenant(&tenant);

    let quota = Arc::new(MemoryQuota::new(backend.clone(), max_identities));
    let zones = Arc::new(MemoryZones::new(["APP.DEFAULT".to_string()]));
    let credentials = Arc::new(MemoryCredentials::new());
    let homes = Arc::new(MemoryHomes::new(backend.clone()));

    let service = IdentityService::new(
        settings,
        Collaborators {
            store: backend.clone(),
            boundary: backend.clone(),
            runner: backend.clone(),
            usage: quota.clone(),
            zones: zones.clone(),
            credentials: credentials.clone(),
            homes: homes.clone(),
        },
    );

    Harness {
        backend,
        service,
        zones,
        credentials,
        homes,
        tenant,
        people,
    }
}

impl Harness {
    fn rw<T>(&self, work: impl FnOnce(&TxnHandle) -> Result<T>) -> Result<T> {
        self.backend.in_txn(TxnMode::ReadWrite, work)
    }

    fn ro<T>(&self, work: impl FnOnce(&TxnHandle) -> Result<T>) -> Result<T> {
        self.backend.in_txn(TxnMode::ReadOnly, work)
    }

    /// Create an identity through the façade in its own transaction.
    fn create(&self, identifier: &str) -> NodeRef {
        self.rw(|txn| {
            let mut attrs = AttrMap::new();
            attrs.insert(
                ProfileAttr::Username,
                AttrValue::Text(identifier.to_owned()),
            );
            self.service.create(txn, &self.tenant, attrs, None)
        })
        .expect("create failed")
    }

    /// Plant a record directly in the store, bypassing the façade's
    /// uniqueness check, the way case drift and migrations do.
    fn seed_record(&self, username: &str, placeholder: bool) -> NodeRef {
        self.rw(|txn| {
            let attrs = if placeholder {
                default_attributes(username, username, PROVIDER)
            } else {
                let mut attrs = AttrMap::new();
                attrs.insert(ProfileAttr::Username, AttrValue::Text(username.to_owned()));
                attrs.insert(ProfileAttr::FirstName, AttrValue::Text("Real".to_owned()));
                attrs.insert(
                    ProfileAttr::Email,
                    AttrValue::Text(format!("{}@example.com", username.to_lowercase())),
                );
                attrs
            };
            self.backend
                .create_node(txn, self.people, &username.to_lowercase(), attrs)
        })
        .expect("seed failed")
    }

    fn username_of(&self, node: NodeRef) -> String {
        self.ro(|txn| {
            self.backend
                .get_attr(txn, node, ProfileAttr::Username)
                .map(|value| value.and_then(AttrValue::into_text).unwrap_or_default())
        })
        .expect("username lookup failed")
    }
}

// ============================================================================
// Resolution and auto-creation
// ============================================================================

#[test]
fn resolve_missing_identifier_fails_not_found() {
    let h = harness(Settings::default());

    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "ghost", false))
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(name) if name == "ghost"));
}

#[test]
fn resolve_auto_creates_in_read_write_transaction() {
    let h = harness(Settings::default());

    let node = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "walcott", true))
        .unwrap();

    assert_eq!(h.username_of(node), "walcott");
    // auto-created records carry the placeholder attribute shape
    let first_name = h
        .ro(|txn| h.backend.get_attr(txn, node, ProfileAttr::FirstName))
        .unwrap()
        .and_then(AttrValue::into_text);
    assert_eq!(first_name.as_deref(), Some("walcott"));
    assert!(h.backend.created_at(node).is_some());
}

#[test]
fn resolve_does_not_auto_create_in_read_only_transaction() {
    let h = harness(Settings::default());

    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "walcott", true))
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[test]
fn resolve_does_not_auto_create_when_disabled() {
    let settings = Settings {
        create_missing: false,
        ..Settings::default()
    };
    let h = harness(settings);

    let err = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "walcott", true))
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[test]
fn exists_reports_without_creating() {
    let h = harness(Settings::default());

    let found = h
        .rw(|txn| h.service.exists(txn, &h.tenant, "walcott"))
        .unwrap();

    assert!(!found);
    let all = h
        .ro(|txn| h.service.all_identities(txn, &h.tenant))
        .unwrap();
    assert!(all.is_empty());
}

#[test]
fn resolution_is_case_insensitive_by_default() {
    let h = harness(Settings::default());
    let node = h.create("Alice");

    let resolved = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "ALICE", false))
        .unwrap();

    assert_eq!(resolved, node);
    let canonical = h
        .ro(|txn| h.service.canonical_identifier(txn, &h.tenant, "aLiCe"))
        .unwrap();
    assert_eq!(canonical.as_deref(), Some("Alice"));
}

#[test]
fn case_sensitive_matching_separates_spellings() {
    let settings = Settings {
        usernames_case_sensitive: true,
        create_missing: false,
        ..Settings::default()
    };
    let h = harness(settings);
    h.create("Alice");

    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[test]
fn home_location_is_provisioned_lazily() {
    let h = harness(Settings::default());
    let node = h.create("alice");
    assert!(h.homes.provisioned().is_empty());

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", true))
        .unwrap();

    assert_eq!(h.homes.provisioned(), vec![node]);

    // already provisioned; nothing further to do
    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", true))
        .unwrap();
    assert_eq!(h.homes.provisioned().len(), 1);
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn create_rejects_existing_identifier() {
    let h = harness(Settings::default());
    h.create("alice");

    let err = h
        .rw(|txn| {
            let mut attrs = AttrMap::new();
            attrs.insert(ProfileAttr::Username, AttrValue::Text("ALICE".to_owned()));
            h.service.create(txn, &h.tenant, attrs, None)
        })
        .unwrap_err();

    assert!(matches!(err, IdentityError::AlreadyExists(_)));
}

#[test]
fn create_rejects_authority_names() {
    let h = harness(Settings::default());

    for name in ["GROUP_staff", "ROLE_admin"] {
        let err = h
            .rw(|txn| {
                let mut attrs = AttrMap::new();
                attrs.insert(ProfileAttr::Username, AttrValue::Text(name.to_owned()));
                h.service.create(txn, &h.tenant, attrs, None)
            })
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidIdentifier(_)), "{name}");
    }
}

#[test]
fn create_joins_default_zones_when_none_supplied() {
    let h = harness(Settings::default());
    h.create("Alice");

    assert_eq!(
        h.zones.attachments(),
        vec![("APP.DEFAULT".to_owned(), "Alice".to_owned())]
    );
}

#[test]
fn create_with_explicit_empty_zone_set_joins_nothing() {
    let h = harness(Settings::default());

    h.rw(|txn| {
        let mut attrs = AttrMap::new();
        attrs.insert(ProfileAttr::Username, AttrValue::Text("alice".to_owned()));
        h.service.create(txn, &h.tenant, attrs, Some(HashSet::new()))
    })
    .unwrap();

    assert!(h.zones.attachments().is_empty());
}

// ============================================================================
// Cache behavior
// ============================================================================

#[test]
fn single_match_lookup_is_cached() {
    let h = harness(Settings::default());
    h.create("alice");

    h.ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();
    let after_first = h.backend.store_lookups();

    h.ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    assert_eq!(h.backend.store_lookups(), after_first);
}

#[test]
fn container_resolution_is_cached_across_identifiers() {
    let h = harness(Settings::default());

    let before = h.backend.store_lookups();
    let _ = h.ro(|txn| h.service.resolve(txn, &h.tenant, "first", false));
    // two container levels plus the identifier itself
    assert_eq!(h.backend.store_lookups() - before, 3);

    let before = h.backend.store_lookups();
    let _ = h.ro(|txn| h.service.resolve(txn, &h.tenant, "second", false));
    // container now cached; only the identifier is looked up
    assert_eq!(h.backend.store_lookups() - before, 1);
}

#[test]
fn ambiguous_lookups_are_never_cached() {
    let h = harness(Settings::default());
    h.seed_record("alice", false);
    h.seed_record("Alice", false);

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();
    let after_first = h.backend.store_lookups();

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    // still going to the store: the duplicate set must be re-examined
    assert!(h.backend.store_lookups() > after_first);
}

#[test]
fn deleted_record_is_pruned_from_stale_cache_entries() {
    let h = harness(Settings::default());
    let node = h.create("alice");

    // populate the cache
    h.ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    // delete behind the façade's back; the cache entry goes stale
    h.rw(|txn| h.backend.delete_node(txn, node)).unwrap();

    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap_err();
    assert!(matches!(err, IdentityError::NotFound(_)));
}

// ============================================================================
// Duplicate resolution
// ============================================================================

#[test]
fn newest_duplicate_wins_by_default() {
    let h = harness(Settings::default());
    let _older = h.seed_record("alice", false);
    let newer = h.seed_record("Alice", false);

    let winner = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    assert_eq!(winner, newer);
}

#[test]
fn oldest_duplicate_wins_when_configured() {
    let settings = Settings {
        last_is_best: false,
        ..Settings::default()
    };
    let h = harness(settings);
    let older = h.seed_record("alice", false);
    let _newer = h.seed_record("Alice", false);

    let winner = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    assert_eq!(winner, older);
}

#[test]
fn placeholders_lose_to_real_records() {
    let h = harness(Settings::default());
    let real = h.seed_record("alice", false);
    let _placeholder_a = h.seed_record("Alice", true);
    let _placeholder_b = h.seed_record("ALICE", true);

    // newest-wins would pick a placeholder; the older real record is chosen
    let winner = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    assert_eq!(winner, real);
}

#[test]
fn newest_real_record_wins_under_any_placeholder_policy() {
    for include_auto_created in [false, true] {
        let settings = Settings {
            include_auto_created,
            ..Settings::default()
        };
        let h = harness(settings);
        h.seed_record("alice", true);
        h.seed_record("Alice", true);
        let real = h.seed_record("ALICE", false);

        let winner = h
            .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
            .unwrap();

        assert_eq!(winner, real, "include_auto_created={include_auto_created}");
    }
}

#[test]
fn all_placeholder_duplicates_still_resolve() {
    let h = harness(Settings::default());
    let _older = h.seed_record("alice", true);
    let newer = h.seed_record("Alice", true);

    let winner = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    // fallback is the sort-order-first candidate: newest under last-is-best
    assert_eq!(winner, newer);
}

#[test]
fn disabled_duplicate_processing_fails_with_policy_diagnostic() {
    let settings = Settings {
        process_duplicates: false,
        ..Settings::default()
    };
    let h = harness(settings);
    h.seed_record("alice", false);
    h.seed_record("Alice", false);

    let err = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, IdentityError::Ambiguous { .. }));
    assert!(message.contains("case-insensitive"), "{message}");
}

// ============================================================================
// Post-commit duplicate cleanup
// ============================================================================

#[test]
fn leave_mode_keeps_duplicate_losers() {
    let h = harness(Settings::default());
    let older = h.seed_record("alice", false);
    let newer = h.seed_record("Alice", false);

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    // both records still present and unrenamed
    assert_eq!(h.username_of(older), "alice");
    assert_eq!(h.username_of(newer), "Alice");
}

#[test]
fn merge_mode_renames_losers_after_commit() {
    init_logs();
    let settings = Settings {
        duplicate_mode: DuplicateMode::Merge,
        ..Settings::default()
    };
    let h = harness(settings);
    let loser = h.seed_record("alice", false);
    let winner = h.seed_record("Alice", false);

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    // the loser's identifier grew a uniqueness suffix, the winner's did not
    let renamed = h.username_of(loser);
    assert!(renamed.starts_with("alice-"), "{renamed}");
    assert_eq!(h.username_of(winner), "Alice");

    // permissions followed the rename
    let renames = h.zones.renames();
    assert_eq!(renames.len(), 1);
    assert_eq!(renames[0].0, "alice");

    // resolution is unambiguous from here on
    let resolved = h
        .rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();
    assert_eq!(resolved, winner);

    // the renamed record is reachable under its new identifier
    let via_new_name = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, &renamed, false))
        .unwrap();
    assert_eq!(via_new_name, loser);
}

#[test]
fn delete_mode_removes_losers_after_commit() {
    let settings = Settings {
        duplicate_mode: DuplicateMode::Delete,
        ..Settings::default()
    };
    let h = harness(settings);
    let loser = h.seed_record("alice", false);
    let winner = h.seed_record("Alice", false);

    h.rw(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap();

    let loser_exists = h.ro(|txn| h.backend.exists(txn, loser)).unwrap();
    assert!(!loser_exists);
    let winner_exists = h.ro(|txn| h.backend.exists(txn, winner)).unwrap();
    assert!(winner_exists);
}

#[test]
fn rolled_back_transactions_trigger_no_cleanup() {
    let settings = Settings {
        duplicate_mode: DuplicateMode::Delete,
        ..Settings::default()
    };
    let h = harness(settings);
    let loser = h.seed_record("alice", false);
    h.seed_record("Alice", false);

    let result: Result<()> = h.rw(|txn| {
        h.service.resolve(txn, &h.tenant, "alice", false)?;
        Err(IdentityError::Store("forced rollback".to_owned()))
    });
    assert!(result.is_err());

    let loser_exists = h.ro(|txn| h.backend.exists(txn, loser)).unwrap();
    assert!(loser_exists);
}

/// Arms an injected commit conflict once the observed transaction commits,
/// so that the next transaction (the cleanup job) conflicts and retries.
struct ConflictArmer {
    backend: Arc<MemoryBackend>,
}

impl TxnObserver for ConflictArmer {
    fn after_commit(&self, _txn: TxnId) {
        self.backend.fail_next_commits(1);
    }
}

#[test]
fn cleanup_job_retries_after_conflict() {
    init_logs();
    let settings = Settings {
        duplicate_mode: DuplicateMode::Merge,
        ..Settings::default()
    };
    let h = harness(settings);
    let loser = h.seed_record("alice", false);
    h.seed_record("Alice", false);

    let armer = Arc::new(ConflictArmer {
        backend: h.backend.clone(),
    });
    h.rw(|txn| {
        // bound before the janitor so its after-commit hook fires first
        h.backend.bind(txn, armer.clone());
        h.service.resolve(txn, &h.tenant, "alice", false)
    })
    .unwrap();

    // the first cleanup attempt conflicted; the retry still got it done
    assert!(h.username_of(loser).starts_with("alice-"));
}

#[test]
fn identifier_rename_is_refused_outside_the_merge_window() {
    let h = harness(Settings::default());
    h.create("alice");

    let err = h
        .rw(|txn| h.service.rename_identifier(txn, &h.tenant, "alice", "bob"))
        .unwrap_err();

    assert!(matches!(err, IdentityError::IdentifierImmutable));
}

// ============================================================================
// Quota enforcement
// ============================================================================

#[test]
fn quota_blocks_commit_over_the_ceiling() {
    let h = harness_with_quota(Settings::default(), Some(2));
    h.create("alice");
    h.create("bob");

    let err = h
        .rw(|txn| {
            let mut attrs = AttrMap::new();
            attrs.insert(ProfileAttr::Username, AttrValue::Text("carol".to_owned()));
            h.service.create(txn, &h.tenant, attrs, None)
        })
        .unwrap_err();

    match err {
        IdentityError::QuotaExceeded { max, identifiers } => {
            assert_eq!(max, 2);
            assert_eq!(identifiers, vec!["carol".to_owned()]);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }

    // the commit was aborted; the record is gone
    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "carol", false))
        .unwrap_err();
    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[test]
fn quota_error_truncates_the_identifier_list() {
    let h = harness_with_quota(Settings::default(), Some(2));

    let err = h
        .rw(|txn| {
            for name in ["u1", "u2", "u3", "u4", "u5", "u6", "u7"] {
                let mut attrs = AttrMap::new();
                attrs.insert(ProfileAttr::Username, AttrValue::Text(name.to_owned()));
                h.service.create(txn, &h.tenant, attrs, None)?;
            }
            Ok(())
        })
        .unwrap_err();

    match err {
        IdentityError::QuotaExceeded { identifiers, .. } => {
            assert_eq!(
                identifiers,
                vec!["u1", "u2", "u3", "u4", "u5", "... more"]
            );
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
}

#[test]
fn quota_is_disabled_without_a_configured_maximum() {
    let h = harness_with_quota(Settings::default(), None);

    for name in ["u1", "u2", "u3", "u4"] {
        h.create(name);
    }

    let all = h
        .ro(|txn| h.service.all_identities(txn, &h.tenant))
        .unwrap();
    assert_eq!(all.len(), 4);
}

// ============================================================================
// Attribute updates
// ============================================================================

#[test]
fn set_attributes_merges_and_preserves_the_identifier() {
    let h = harness(Settings::default());
    let node = h.create("alice");

    h.rw(|txn| {
        let mut attrs = AttrMap::new();
        attrs.insert(ProfileAttr::FirstName, AttrValue::Text("Alice".to_owned()));
        attrs.insert(ProfileAttr::Username, AttrValue::Text("mallory".to_owned()));
        h.service
            .set_attributes(txn, &h.tenant, "alice", attrs, false)
    })
    .unwrap();

    // profile merged, identifier written back to its stored value
    assert_eq!(h.username_of(node), "alice");
    let first_name = h
        .ro(|txn| h.backend.get_attr(txn, node, ProfileAttr::FirstName))
        .unwrap()
        .and_then(AttrValue::into_text);
    assert_eq!(first_name.as_deref(), Some("Alice"));
}

#[test]
fn set_attributes_allows_case_only_respelling() {
    let h = harness(Settings::default());
    let node = h.create("alice");

    h.rw(|txn| {
        let mut attrs = AttrMap::new();
        attrs.insert(ProfileAttr::Username, AttrValue::Text("Alice".to_owned()));
        h.service
            .set_attributes(txn, &h.tenant, "alice", attrs, false)
    })
    .unwrap();

    assert_eq!(h.username_of(node), "Alice");
    assert_eq!(
        h.zones.renames(),
        vec![("alice".to_owned(), "Alice".to_owned())]
    );

    // resolvable under both spellings, canonical under the new one
    let canonical = h
        .ro(|txn| h.service.canonical_identifier(txn, &h.tenant, "ALICE"))
        .unwrap();
    assert_eq!(canonical.as_deref(), Some("Alice"));
}

#[test]
fn set_attributes_creates_missing_records_when_enabled() {
    let h = harness(Settings::default());

    h.rw(|txn| {
        let mut attrs = AttrMap::new();
        attrs.insert(ProfileAttr::Email, AttrValue::Text("w@example.com".to_owned()));
        h.service
            .set_attributes(txn, &h.tenant, "walcott", attrs, false)
    })
    .unwrap();

    let found = h
        .ro(|txn| h.service.exists(txn, &h.tenant, "walcott"))
        .unwrap();
    assert!(found);
}

#[test]
fn set_attributes_fails_on_missing_record_when_creation_disabled() {
    let settings = Settings {
        create_missing: false,
        ..Settings::default()
    };
    let h = harness(settings);

    let err = h
        .rw(|txn| {
            h.service
                .set_attributes(txn, &h.tenant, "walcott", AttrMap::new(), false)
        })
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(_)));
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn delete_removes_record_credentials_and_access_entries() {
    let h = harness(Settings::default());
    h.create("alice");

    h.rw(|txn| h.service.delete(txn, &h.tenant, "alice")).unwrap();

    let err = h
        .ro(|txn| h.service.resolve(txn, &h.tenant, "alice", false))
        .unwrap_err();
    assert!(matches!(err, IdentityError::NotFound(_)));
    assert_eq!(h.credentials.deleted(), vec!["alice".to_owned()]);
    assert_eq!(h.credentials.invalidated(), vec!["alice".to_owned()]);
    assert_eq!(h.zones.removed_entries(), vec!["alice".to_owned()]);
}

#[test]
fn delete_swallows_credential_store_failures() {
    let h = harness(Settings::default());
    h.create("alice");
    h.credentials.set_failing(true);

    h.rw(|txn| h.service.delete(txn, &h.tenant, "alice")).unwrap();

    let found = h
        .ro(|txn| h.service.exists(txn, &h.tenant, "alice"))
        .unwrap();
    assert!(!found);
}

#[test]
fn delete_of_unknown_identifier_is_a_no_op() {
    let h = harness(Settings::default());

    h.rw(|txn| h.service.delete(txn, &h.tenant, "ghost")).unwrap();

    assert!(h.credentials.deleted().is_empty());
}

#[test]
fn delete_by_record_reference() {
    let h = harness(Settings::default());
    let node = h.create("Alice");

    h.rw(|txn| h.service.delete_record(txn, &h.tenant, node))
        .unwrap();

    let found = h
        .ro(|txn| h.service.exists(txn, &h.tenant, "alice"))
        .unwrap();
    assert!(!found);
    // deletion used the stored canonical spelling
    assert_eq!(h.credentials.deleted(), vec!["Alice".to_owned()]);
}

// ============================================================================
// Tenancy and structural configuration
// ============================================================================

#[test]
fn tenant_scoped_creation_qualifies_the_identifier() {
    let settings = Settings {
        domain_separator: "@".to_owned(),
        ..Settings::default()
    };
    let h = harness(settings);
    let tenant = Tenant::new("acme.com");
    h.backend.bootstrap_tenant(&tenant);

    let node = h
        .rw(|txn| {
            let mut attrs = AttrMap::new();
            attrs.insert(ProfileAttr::Username, AttrValue::Text("bob".to_owned()));
            h.service.create(txn, &tenant, attrs, None)
        })
        .unwrap();

    assert_eq!(h.username_of(node), "bob@acme.com");

    let err = h
        .rw(|txn| {
            let mut attrs = AttrMap::new();
            attrs.insert(
                ProfileAttr::Username,
                AttrValue::Text("eve@other.org".to_owned()),
            );
            h.service.create(txn, &tenant, attrs, None)
        })
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidIdentifier(_)));
}

#[test]
fn identities_are_isolated_per_tenant() {
    let settings = Settings {
        create_missing: false,
        ..Settings::default()
    };
    let h = harness(settings);
    let other = Tenant::new("acme.com");
    h.backend.bootstrap_tenant(&other);
    h.create("alice");

    let err = h
        .ro(|txn| h.service.resolve(txn, &other, "alice", false))
        .unwrap_err();

    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[test]
fn missing_structural_containers_are_configuration_errors() {
    let h = harness(Settings::default());

    let no_system = Tenant::new("broken-a.example");
    h.backend.bootstrap_broken_tenant(&no_system, false);
    let err = h
        .ro(|txn| h.service.resolve(txn, &no_system, "alice", false))
        .unwrap_err();
    assert!(
        matches!(&err, IdentityError::Configuration(msg) if msg.contains("system")),
        "{err}"
    );

    let no_people = Tenant::new("broken-b.example");
    h.backend.bootstrap_broken_tenant(&no_people, true);
    let err = h
        .ro(|txn| h.service.resolve(txn, &no_people, "alice", false))
        .unwrap_err();
    assert!(
        matches!(&err, IdentityError::Configuration(msg) if msg.contains("people")),
        "{err}"
    );
}

#[test]
fn all_identities_lists_every_record_under_the_container() {
    let h = harness(Settings::default());
    let alice = h.create("alice");
    let bob = h.create("bob");

    let all = h
        .ro(|txn| h.service.all_identities(txn, &h.tenant))
        .unwrap();

    assert_eq!(all, vec![alice, bob]);
}
