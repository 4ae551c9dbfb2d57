//! Error types for sasswire.

use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::CompileFailure;

/// Main error type for all sasswire operations.
#[derive(Debug, Error)]
pub enum SasswireError {
    /// I/O error on the engine's stdin/stdout.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// An argument or option has no valid engine mapping.
    ///
    /// Raised before a request identifier is allocated.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// The engine executable could not be launched.
    #[error("Failed to spawn {}: {source}", path.display())]
    SpawnFailed {
        /// Executable that was attempted.
        path: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// A frame is structurally invalid (truncated, oversized, undecodable).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The stream ended cleanly before a new frame started.
    #[error("Stream closed")]
    StreamClosed,

    /// Protocol violation (unknown identifier, engine-reported error, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine rejected the stylesheet. Scoped to a single call.
    #[error("Compile error: {0}")]
    Compile(CompileFailure),

    /// The connection to the engine is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The caller stopped waiting for a response.
    ///
    /// The identifier stays reserved until the engine answers or the
    /// connection closes.
    #[error("Timed out waiting for response to request {id}")]
    Timeout {
        /// Identifier of the abandoned request.
        id: u32,
    },
}

impl SasswireError {
    /// True for errors that end the connection for every caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SasswireError::Io(_)
                | SasswireError::MsgPackDecode(_)
                | SasswireError::MalformedFrame(_)
                | SasswireError::StreamClosed
                | SasswireError::Protocol(_)
                | SasswireError::ConnectionClosed
        )
    }
}

/// Result type alias using SasswireError.
pub type Result<T> = std::result::Result<T, SasswireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_is_not_fatal() {
        let err = SasswireError::Compile(CompileFailure {
            message: "expected \";\"".to_string(),
            span: None,
            stack_trace: None,
        });
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("expected"));
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        assert!(SasswireError::StreamClosed.is_fatal());
        assert!(SasswireError::MalformedFrame("short".into()).is_fatal());
        assert!(SasswireError::Protocol("unknown id 7".into()).is_fatal());
        assert!(!SasswireError::InvalidOption("x".into()).is_fatal());
        assert!(!SasswireError::Timeout { id: 3 }.is_fatal());
    }

    #[test]
    fn test_spawn_failed_mentions_path() {
        let err = SasswireError::SpawnFailed {
            path: PathBuf::from("/nope/dart-sass-embedded"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("/nope/dart-sass-embedded"));
    }
}
