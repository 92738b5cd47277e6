use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Prompter's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Prompter's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so hosts embedding the engine aren't forced to
/// adopt `anyhow` in their own public APIs.
///
/// Only configuration errors (and session plumbing errors) reach callers. The remaining variants
/// describe input anomalies and consistency violations the engine logs and drops.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration for `{field}`: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    #[error("out-of-order transcript update: received {received:?} after {previous:?}")]
    OutOfOrderUpdate {
        previous: Duration,
        received: Duration,
    },

    #[error("commit to line {target} rejected (current line {current}): {reason}")]
    CommitRejected {
        target: usize,
        current: usize,
        reason: &'static str,
    },

    #[error("stale confirmation deadline (generation {generation})")]
    StaleDeadline { generation: u64 },

    #[error("session is closed")]
    SessionClosed,

    #[error("replay line {line}: {message}")]
    Replay { line: usize, message: String },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_names_the_field() {
        let err = Error::invalid_config("minScore", "must be within [0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid configuration for `minScore`: must be within [0, 1]"
        );
    }

    #[test]
    fn io_errors_are_wrapped() {
        let err: Error = std::io::Error::other("boom").into();
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
