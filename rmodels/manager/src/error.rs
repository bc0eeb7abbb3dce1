use std::path::PathBuf;

use rmodels_protocol::ProtocolError;
use rmodels_schema::SchemaError;
use rmodels_scripting::ScriptError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// The single error type callers of the manager see.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Invalid configuration: attribute kinds, class index, identifiers.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The engine rejected a program; carries the engine's message.
    #[error("engine evaluation failed: {0}")]
    RemoteExecution(String),
    /// A file operation failed.
    #[error("{operation} failed for {}: {source}", path.display())]
    Resource {
        /// What was attempted.
        operation: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The operation is deliberately not offered.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// No model is registered under the identifier.
    #[error("unknown model {0}")]
    UnknownModel(Uuid),
    /// Transport or decoding failure talking to the engine.
    #[error("engine protocol failure: {0}")]
    Protocol(#[source] ProtocolError),
}

impl ManagerError {
    /// Wraps an I/O failure with the operation and path.
    pub fn resource(
        operation: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Resource {
            operation,
            path,
            source,
        }
    }
}

impl From<ProtocolError> for ManagerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Remote(message) => Self::RemoteExecution(message),
            other => Self::Protocol(other),
        }
    }
}

impl From<ScriptError> for ManagerError {
    fn from(err: ScriptError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<SchemaError> for ManagerError {
    fn from(err: SchemaError) -> Self {
        Self::Configuration(err.to_string())
    }
}
