use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No identity found for '{0}'")]
    NotFound(String),

    #[error("Found more than one identity for '{identifier}'{detail}")]
    Ambiguous { identifier: String, detail: String },

    #[error("Identity '{0}' already exists")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Maximum identity count of {max} exceeded; created in this transaction: {identifiers:?}")]
    QuotaExceeded { max: u64, identifiers: Vec<String> },

    #[error("The canonical identifier of an identity can not be changed")]
    IdentifierImmutable,

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Optimistic-concurrency failure raised by the backing store at commit
    /// time. Retried by the transaction runner, never surfaced to callers
    /// unless the retry budget is exhausted.
    #[error("Transaction conflict")]
    Conflict,

    #[error("Store error: {0}")]
    Store(String),
}

impl IdentityError {
    /// Conflicts are the only errors the retrying transaction runner
    /// re-attempts; everything else fails the unit of work immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::Conflict)
    }
}
