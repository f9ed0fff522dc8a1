//! Duplicate tie-break and placeholder classification.
//!
//! Both are pure functions over attribute snapshots. The tie-break never
//! fails: given at least one candidate it always produces exactly one
//! winner, preferring real profiles over auto-created placeholders but
//! falling back to a placeholder rather than resolving nothing.

use crate::model::CandidateSnapshot;

#[derive(Debug, Clone)]
pub struct TieBreakPolicy {
    /// Most-recently-created record wins when true; oldest wins otherwise.
    pub last_is_best: bool,
    /// Let placeholders win outright instead of skipping past them.
    pub include_auto_created: bool,
    /// Provider value that marks an untouched auto-created record.
    pub default_home_provider: String,
}

#[derive(Debug)]
pub struct Resolution {
    pub winner: CandidateSnapshot,
    pub losers: Vec<CandidateSnapshot>,
}

/// Pick the canonical record from a duplicate candidate set.
///
/// Candidates are ordered by store creation sequence (direction per
/// `last_is_best`); the first non-placeholder in that order wins. If every
/// candidate is a placeholder and placeholders are excluded, the order-first
/// candidate wins anyway. Returns `None` only for an empty input.
pub fn select_canonical(
    mut candidates: Vec<CandidateSnapshot>,
    policy: &TieBreakPolicy,
) -> Option<Resolution> {
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by_key(|c| c.sequence);
    if policy.last_is_best {
        candidates.reverse();
    }

    let winner_idx = candidates
        .iter()
        .position(|c| {
            policy.include_auto_created || !is_placeholder(c, &policy.default_home_provider)
        })
        .unwrap_or(0);

    let winner = candidates.remove(winner_idx);
    Some(Resolution {
        winner,
        losers: candidates,
    })
}

/// True when the record still looks exactly like an identity the system
/// created on its own because no real profile existed yet: first name equals
/// the identifier, the remaining profile fields are empty, and the home
/// provider is still the configured default. Derived from the current
/// snapshot every time; there is no stored flag.
pub fn is_placeholder(candidate: &CandidateSnapshot, default_home_provider: &str) -> bool {
    candidate.first_name.as_deref() == Some(candidate.identifier.as_str())
        && candidate.last_name.as_deref() == Some("")
        && candidate.email.as_deref() == Some("")
        && candidate.org_id.as_deref() == Some("")
        && candidate.home_provider.as_deref() == Some(default_home_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRef;

    const PROVIDER: &str = "userHomesHomeFolderProvider";

    fn placeholder(sequence: u64, identifier: &str) -> CandidateSnapshot {
        CandidateSnapshot {
            node: NodeRef::new(),
            sequence,
            identifier: identifier.to_owned(),
            first_name: Some(identifier.to_owned()),
            last_name: Some(String::new()),
            email: Some(String::new()),
            org_id: Some(String::new()),
            home_provider: Some(PROVIDER.to_owned()),
        }
    }

    fn real(sequence: u64, identifier: &str) -> CandidateSnapshot {
        CandidateSnapshot {
            first_name: Some("Alice".to_owned()),
            email: Some("alice@example.com".to_owned()),
            ..placeholder(sequence, identifier)
        }
    }

    fn policy(last_is_best: bool, include_auto_created: bool) -> TieBreakPolicy {
        TieBreakPolicy {
            last_is_best,
            include_auto_created,
            default_home_provider: PROVIDER.to_owned(),
        }
    }

    #[test]
    fn empty_input_resolves_nothing() {
        assert!(select_canonical(vec![], &policy(true, false)).is_none());
    }

    #[test]
    fn last_is_best_picks_highest_sequence() {
        let candidates = vec![real(1, "alice"), real(3, "alice"), real(2, "alice")];

        let resolution = select_canonical(candidates, &policy(true, false)).unwrap();

        assert_eq!(resolution.winner.sequence, 3);
        assert_eq!(resolution.losers.len(), 2);
    }

    #[test]
    fn first_is_best_picks_lowest_sequence() {
        let candidates = vec![real(2, "alice"), real(1, "alice"), real(3, "alice")];

        let resolution = select_canonical(candidates, &policy(false, false)).unwrap();

        assert_eq!(resolution.winner.sequence, 1);
    }

    #[test]
    fn placeholders_are_skipped_for_real_records() {
        // newest two are placeholders; the older real record still wins
        let candidates = vec![
            real(1, "alice"),
            placeholder(2, "alice"),
            placeholder(3, "alice"),
        ];

        let resolution = select_canonical(candidates, &policy(true, false)).unwrap();

        assert_eq!(resolution.winner.sequence, 1);
        assert_eq!(resolution.losers.len(), 2);
    }

    #[test]
    fn real_newest_wins_under_any_placeholder_policy() {
        for include in [true, false] {
            let candidates = vec![
                placeholder(1, "alice"),
                placeholder(2, "alice"),
                real(3, "alice"),
            ];
            let resolution = select_canonical(candidates, &policy(true, include)).unwrap();
            assert_eq!(resolution.winner.sequence, 3);
        }
    }

    #[test]
    fn all_placeholders_fall_back_to_sort_order_first() {
        let candidates = vec![placeholder(1, "alice"), placeholder(2, "alice")];

        let resolution = select_canonical(candidates, &policy(true, false)).unwrap();

        // descending order, so the fallback is the newest
        assert_eq!(resolution.winner.sequence, 2);
        assert_eq!(resolution.losers.len(), 1);
        assert_eq!(resolution.losers[0].sequence, 1);
    }

    #[test]
    fn include_auto_created_lets_placeholders_win() {
        let candidates = vec![real(1, "alice"), placeholder(2, "alice")];

        let resolution = select_canonical(candidates, &policy(true, true)).unwrap();

        assert_eq!(resolution.winner.sequence, 2);
    }

    #[test]
    fn placeholder_requires_every_attribute_to_match() {
        let base = placeholder(1, "alice");
        assert!(is_placeholder(&base, PROVIDER));

        let mut named = base.clone();
        named.first_name = Some("Alice".to_owned());
        assert!(!is_placeholder(&named, PROVIDER));

        let mut contact = base.clone();
        contact.email = Some("alice@example.com".to_owned());
        assert!(!is_placeholder(&contact, PROVIDER));

        let mut surname = base.clone();
        surname.last_name = Some("Smith".to_owned());
        assert!(!is_placeholder(&surname, PROVIDER));

        let mut org = base.clone();
        org.org_id = Some("eng".to_owned());
        assert!(!is_placeholder(&org, PROVIDER));

        let mut provider = base.clone();
        provider.home_provider = Some("customProvider".to_owned());
        assert!(!is_placeholder(&provider, PROVIDER));

        let mut missing = base.clone();
        missing.last_name = None;
        assert!(!is_placeholder(&missing, PROVIDER));
    }
}
