use rmodels_schema::SchemaError;
use thiserror::Error;

/// Failures detected before any program is emitted.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The configuration is invalid.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A reserved property holds a value that cannot be emitted safely.
    #[error("invalid value {value:?} for property {key}: {reason}")]
    InvalidProperty {
        /// Property key.
        key: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// A scoring row does not match the predictor count.
    #[error("row has {found} values but the model expects {expected}")]
    RowArity {
        /// Predictor count.
        expected: usize,
        /// Values supplied.
        found: usize,
    },
}
