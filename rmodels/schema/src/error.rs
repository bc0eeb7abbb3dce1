use thiserror::Error;

/// Configuration problems detected before anything reaches the engine.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two attributes share a name.
    #[error("duplicate attribute name: {0}")]
    DuplicateAttribute(String),
    /// An attribute has an empty name.
    #[error("attribute at position {0} has an empty name")]
    EmptyAttributeName(usize),
    /// The attribute kind cannot be expressed in the engine.
    #[error("attribute {0} has an unsupported kind (expected numeric or categorical)")]
    UnsupportedKind(String),
    /// Categorical attribute with no values or repeated values.
    #[error("categorical attribute {name} is invalid: {reason}")]
    InvalidCategorical {
        /// Attribute name.
        name: String,
        /// What is wrong with its value list.
        reason: String,
    },
    /// No class index configured.
    #[error("class index is not configured")]
    MissingClassIndex,
    /// Class index does not parse as a non-negative integer.
    #[error("class index {0:?} is not a valid index")]
    InvalidClassIndex(String),
    /// Class index points past the attribute list.
    #[error("class index {index} out of range for {len} attributes")]
    ClassIndexOutOfRange {
        /// Configured index.
        index: usize,
        /// Attribute count.
        len: usize,
    },
    /// Explicit model identifier is not a UUID.
    #[error("model identifier {0:?} is not a valid UUID")]
    MalformedModelId(String),
    /// A data row does not match the attribute count.
    #[error("row {row} has {found} values, expected {expected}")]
    RowArity {
        /// Zero-based row number.
        row: usize,
        /// Attribute count.
        expected: usize,
        /// Values in the row.
        found: usize,
    },
    /// Writing the instance dump failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
