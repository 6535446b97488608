//! Error types for the team coordination stores

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while operating on team state files.
#[derive(Error, Debug)]
pub enum TeamsError {
    /// Failed to acquire a file lock within the configured timeout.
    ///
    /// The message prefix is load-bearing: callers classify transient lock
    /// contention by matching on it (the mailbox poll swallows this variant).
    #[error("Timeout acquiring lock: {path}")]
    LockTimeout { path: PathBuf },

    /// Addressed task, member, or team does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller passed an argument the operation rejects (e.g. a self-dependency).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse JSON
    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Cleanup or clear target resolves outside its expected root.
    #[error("Refusing to operate on path outside teams root: {path}")]
    PathEscape { path: PathBuf },
}

impl TeamsError {
    /// True when this error is transient lock contention rather than a real fault.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, TeamsError::LockTimeout { .. })
    }
}

/// Convenience alias used throughout the store modules.
pub type Result<T> = std::result::Result<T, TeamsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_message_has_classifiable_prefix() {
        let err = TeamsError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
        };
        assert!(err.to_string().starts_with("Timeout acquiring lock:"));
        assert!(err.is_lock_timeout());
    }

    #[test]
    fn path_escape_message() {
        let err = TeamsError::PathEscape {
            path: PathBuf::from("/etc"),
        };
        assert!(
            err.to_string()
                .starts_with("Refusing to operate on path outside teams root")
        );
        assert!(!err.is_lock_timeout());
    }
}
