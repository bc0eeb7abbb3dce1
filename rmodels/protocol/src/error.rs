use std::path::PathBuf;

use thiserror::Error;

use crate::qap;

/// Failures of the engine client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer is not a usable Rserve endpoint.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The server answered with an error status.
    #[error("server rejected command {command:#x}: {} ({code:#x})", qap::error_name(*code))]
    Server {
        /// Command that failed.
        command: i32,
        /// QAP1 error code.
        code: u8,
    },
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The request cannot be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The program failed inside the engine.
    #[error("engine evaluation failed: {0}")]
    Remote(String),
    /// A script file could not be read.
    #[error("cannot read script {}: {source}", path.display())]
    Script {
        /// Script location.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },
    /// The result has a different shape than the caller needs.
    #[error("unexpected result: expected {expected}, got {actual}")]
    UnexpectedResult {
        /// Shape the caller asked for.
        expected: &'static str,
        /// Shape received.
        actual: String,
    },
    /// The connection was closed.
    #[error("connection is closed")]
    Closed,
}
