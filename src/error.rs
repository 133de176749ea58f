use std::time::Duration;

/// Failures reported by a credentials provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Other(String),

    /// The provider dropped its completion closure without running it.
    #[error("credentials provider dropped the request without completing it")]
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("pollset is shutting down")]
    Shutdown,
}

/// Outcome of a single blocking token fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetching token failed: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("expected exactly one metadata entry, got {count}")]
    MalformedMetadata { count: usize },

    #[error("polling failed: {0}")]
    Poll(#[from] PollError),

    #[error("no token after {0:?}")]
    DeadlineExceeded(Duration),
}
