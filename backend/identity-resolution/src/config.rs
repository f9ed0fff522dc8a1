//! Configuration for the identity resolution subsystem.
//!
//! Loads settings from environment variables with sensible defaults, so the
//! subsystem can be embedded without a configuration framework. Every knob
//! maps to one behavior described in the module that consumes it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// What the post-commit cleanup job does with duplicate losers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateMode {
    /// Rewrite the loser's identifier with a uniqueness suffix, preserving
    /// the record and anything attached to it.
    Merge,
    /// Delete the loser record outright.
    Delete,
    /// Leave losers in place; audit-only deployments.
    Leave,
}

impl FromStr for DuplicateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(DuplicateMode::Merge),
            "delete" => Ok(DuplicateMode::Delete),
            "leave" => Ok(DuplicateMode::Leave),
            other => Err(format!("unknown duplicate mode '{other}'")),
        }
    }
}

/// Subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Auto-create an identity record when resolution misses and the caller
    /// allows it.
    pub create_missing: bool,
    /// When false, multi-candidate resolution fails instead of tie-breaking.
    pub process_duplicates: bool,
    pub duplicate_mode: DuplicateMode,
    /// Tie-break direction: true means the most recently created record wins.
    pub last_is_best: bool,
    /// Allow auto-created placeholder records to win the tie-break.
    pub include_auto_created: bool,
    /// Home-location provider stamped onto auto-created identities; also the
    /// value the placeholder classifier compares against.
    pub default_home_provider: String,
    pub usernames_case_sensitive: bool,
    pub domains_case_sensitive: bool,
    /// Separator between local part and tenant domain in qualified
    /// identifiers; empty disables domain handling.
    pub domain_separator: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            create_missing: true,
            process_duplicates: true,
            duplicate_mode: DuplicateMode::Leave,
            last_is_best: true,
            include_auto_created: false,
            default_home_provider: "userHomesHomeFolderProvider".to_string(),
            usernames_case_sensitive: false,
            domains_case_sensitive: false,
            domain_separator: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        Ok(Self {
            create_missing: env_bool("IDENTITY_CREATE_MISSING", defaults.create_missing)?,
            process_duplicates: env_bool(
                "IDENTITY_PROCESS_DUPLICATES",
                defaults.process_duplicates,
            )?,
            duplicate_mode: match env::var("IDENTITY_DUPLICATE_MODE") {
                Ok(raw) => raw
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid IDENTITY_DUPLICATE_MODE")?,
                Err(_) => defaults.duplicate_mode,
            },
            last_is_best: env_bool("IDENTITY_DUPLICATE_LAST_IS_BEST", defaults.last_is_best)?,
            include_auto_created: env_bool(
                "IDENTITY_INCLUDE_AUTO_CREATED",
                defaults.include_auto_created,
            )?,
            default_home_provider: env::var("IDENTITY_DEFAULT_HOME_PROVIDER")
                .unwrap_or(defaults.default_home_provider),
            usernames_case_sensitive: env_bool(
                "IDENTITY_USERNAMES_CASE_SENSITIVE",
                defaults.usernames_case_sensitive,
            )?,
            domains_case_sensitive: env_bool(
                "IDENTITY_DOMAINS_CASE_SENSITIVE",
                defaults.domains_case_sensitive,
            )?,
            domain_separator: env::var("IDENTITY_DOMAIN_SEPARATOR")
                .unwrap_or(defaults.domain_separator),
        })
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {name}: expected true or false")),
        Err(_) => Ok(default),
    }
}
