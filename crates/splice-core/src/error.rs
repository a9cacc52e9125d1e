//! Shared error types for Splice core contracts.

/// The result type used throughout splice-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by core capabilities.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier string could not be parsed.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// A path escaped the scope of a [`crate::fs::FileStore`].
    #[error("path escapes store scope: {path}")]
    PathOutOfScope {
        /// The offending path.
        path: String,
    },

    /// A file was not found in the store.
    #[error("file not found: {path}")]
    FileNotFound {
        /// The missing path.
        path: String,
    },

    /// An I/O operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A command could not be spawned.
    #[error("failed to spawn command '{command}': {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A command exceeded its configured timeout.
    #[error("command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command that timed out.
        command: String,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "bad ulid".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn timeout_display_includes_command() {
        let err = Error::CommandTimeout {
            command: "npm".into(),
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("npm"));
        assert!(msg.contains("5000"));
    }

    #[test]
    fn io_error_preserves_source() {
        use std::error::Error as StdError;
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::Io {
            path: "config.json".into(),
            source,
        };
        assert!(StdError::source(&err).is_some());
    }
}
