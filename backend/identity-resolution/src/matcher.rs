//! Username matching.
//!
//! Decides whether two identifiers denote the same identity under the
//! configured case-sensitivity policy. Qualified identifiers
//! (`local<sep>domain`) compare the local part and the domain part under
//! independent case rules. Pure; no store access, no failure modes.

use crate::config::Settings;

#[derive(Debug, Clone)]
pub struct UsernameMatcher {
    usernames_case_sensitive: bool,
    domains_case_sensitive: bool,
    domain_separator: String,
}

impl UsernameMatcher {
    pub fn new(
        usernames_case_sensitive: bool,
        domains_case_sensitive: bool,
        domain_separator: impl Into<String>,
    ) -> Self {
        Self {
            usernames_case_sensitive,
            domains_case_sensitive,
            domain_separator: domain_separator.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.usernames_case_sensitive,
            settings.domains_case_sensitive,
            settings.domain_separator.clone(),
        )
    }

    pub fn usernames_case_sensitive(&self) -> bool {
        self.usernames_case_sensitive
    }

    pub fn domains_case_sensitive(&self) -> bool {
        self.domains_case_sensitive
    }

    pub fn domain_separator(&self) -> &str {
        &self.domain_separator
    }

    /// True when `query` and `candidate` denote the same identity.
    pub fn matches(&self, query: &str, candidate: &str) -> bool {
        if self.domain_separator.is_empty() {
            return compare(query, candidate, self.usernames_case_sensitive);
        }

        let (q_local, q_domain) = self.split(query);
        let (c_local, c_domain) = self.split(candidate);

        if !compare(q_local, c_local, self.usernames_case_sensitive) {
            return false;
        }
        match (q_domain, c_domain) {
            (None, None) => true,
            (Some(q), Some(c)) => compare(q, c, self.domains_case_sensitive),
            _ => false,
        }
    }

    /// Key used for cache entries and structural child names. Folded
    /// unconditionally, independent of the sensitivity policy, so that
    /// case-variant duplicates land in the same bucket and can be seen
    /// together at resolution time.
    pub fn cache_key(&self, identifier: &str) -> String {
        identifier.to_lowercase()
    }

    /// The part of a qualified identifier before the domain separator.
    pub fn base_name<'a>(&self, identifier: &'a str) -> &'a str {
        if self.domain_separator.is_empty() {
            return identifier;
        }
        self.split(identifier).0
    }

    /// Diagnostic suffix describing the active policy, appended to the
    /// ambiguity error so operators can tell whether case drift explains the
    /// duplicate set.
    pub fn sensitivity_note(&self) -> String {
        let mut note = format!(
            " (user name is case-{})",
            if self.usernames_case_sensitive { "sensitive" } else { "insensitive" }
        );
        if !self.domain_separator.is_empty() {
            note.push_str(&format!(
                " (domain name is case-{})",
                if self.domains_case_sensitive { "sensitive" } else { "insensitive" }
            ));
        }
        note
    }

    fn split<'a>(&self, identifier: &'a str) -> (&'a str, Option<&'a str>) {
        match identifier.split_once(&self.domain_separator) {
            Some((local, domain)) => (local, Some(domain)),
            None => (identifier, None),
        }
    }
}

fn compare(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}
