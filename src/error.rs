// Error types for the broker and its collaborators

use thiserror::Error;

/// Errors that escape the broker. Everything else collapses to `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Target resource identifier is malformed; raised before any network call
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// Why a broker flow produced no credential
#[derive(Error, Debug)]
pub enum FailureKind {
    /// Authority returned no token pair (user cancelled the prompt)
    #[error("No tokens were acquired")]
    NoTokens,

    /// Nothing stored to refresh with; an interactive login is required
    #[error("No refresh token stored for target")]
    NoRefreshToken,

    /// Identity or resource authority refused the request
    #[error("Authority denied the request: {0}")]
    AuthorityDenied(String),

    /// Network, timeout or unexpected authority failure
    #[error("Transient failure: {0}")]
    TransientFailure(String),

    /// Token store could not be read or written
    #[error("Token store error: {0}")]
    Store(#[source] anyhow::Error),

    /// Operation is not supported for this credential class
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Errors reported by identity and resource authorities
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Denied: {0}")]
    Denied(String),

    #[error("Transient: {0}")]
    Transient(#[from] anyhow::Error),
}

impl AuthorityError {
    pub fn denied(message: impl Into<String>) -> Self {
        AuthorityError::Denied(message.into())
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AuthorityError::Denied(_))
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        AuthorityError::Transient(err.into())
    }
}

impl From<AuthorityError> for FailureKind {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Denied(msg) => FailureKind::AuthorityDenied(msg),
            // {:#} keeps the anyhow context chain on one line
            AuthorityError::Transient(e) => FailureKind::TransientFailure(format!("{:#}", e)),
        }
    }
}

/// Internal outcome of a broker flow; projected to `bool` at the public boundary
pub type Outcome = std::result::Result<(), FailureKind>;
