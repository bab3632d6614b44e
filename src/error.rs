//! Error types
//!
//! Each layer has its own error enum; [`Error`] wraps them for callers of the
//! top-level server API.

use std::io;

use thiserror::Error;

/// Result alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or pipe I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame Source failure
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Relay failure
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors reported by a Frame Source engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input could not be opened
    #[error("unable to open input {url}: {reason}")]
    OpenInput { url: String, reason: String },

    /// The output could not be opened
    #[error("unable to open output: {0}")]
    OpenOutput(String),

    /// The transcode context could not be initialized
    #[error("unable to initialize transcoder: {0}")]
    InitTranscode(String),

    /// Decoding or encoding a unit failed
    #[error("failure decoding/encoding: {0}")]
    Step(String),

    /// I/O with the engine failed
    #[error("engine I/O: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by the frame relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay loop is no longer running
    #[error("relay is not running")]
    Closed,

    /// Reading a frame from the shared stream failed
    #[error("read: {0}")]
    StreamRead(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::OpenInput {
            url: "/tmp/missing.mp3".into(),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "unable to open input /tmp/missing.mp3: not found"
        );
    }

    #[test]
    fn test_error_from_relay_error() {
        let err: Error = RelayError::Closed.into();
        assert!(matches!(err, Error::Relay(RelayError::Closed)));
        assert_eq!(err.to_string(), "relay error: relay is not running");
    }

    #[test]
    fn test_error_from_io() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
