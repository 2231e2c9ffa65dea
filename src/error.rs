//! Error types for the cache

use thiserror::Error;

/// Main error type for the cache.
///
/// The enum is `Clone` because a coalesced load hands the leader's exact
/// result, errors included, to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument or state (empty key, unset sink, duplicate group)
    #[error("validation error: {0}")]
    Validation(String),

    /// The key is unavailable at its authoritative source; never retried
    /// against another source
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote loader itself failed; never retried locally
    #[error("remote call error: {0}")]
    RemoteCall(String),

    /// Transient peer failure; the load falls back to the local loader
    /// while the context is still live
    #[error("peer error: {0}")]
    Peer(String),

    /// The operation's context was cancelled or timed out
    #[error("operation cancelled")]
    Cancelled,

    /// Message encode/decode failure in a sink
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Terminal errors are returned as-is from a peer load, with no local
    /// fallback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::RemoteCall(_) | Error::Cancelled
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(Error::NotFound("k".into()).is_terminal());
        assert!(Error::RemoteCall("boom".into()).is_terminal());
        assert!(Error::Cancelled.is_terminal());

        assert!(!Error::Peer("connection reset".into()).is_terminal());
        assert!(!Error::Validation("empty key".into()).is_terminal());
        assert!(!Error::Codec("truncated".into()).is_terminal());
    }

    #[test]
    fn test_display() {
        let err = Error::NotFound("user:42".into());
        assert_eq!(err.to_string(), "not found: user:42");
    }
}
