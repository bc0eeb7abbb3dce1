#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Model schema shared by the script generator and the model manager: attribute
//! metadata, model configuration with its reserved keys, scorable field values and
//! the tabular instance dump consumed by training.

/// Attribute metadata and engine-safe naming.
pub mod attribute;
/// Model configuration and reserved property keys.
pub mod config;
/// ARFF instance dump writer.
pub mod dump;
/// Schema errors.
pub mod error;
/// Scorable/training field values.
pub mod value;

pub use attribute::{sanitize_name, Attribute, AttributeKind, UNKNOWN_CATEGORY};
pub use config::{keys, ModelConfiguration};
pub use dump::{write_instances, InstanceDump};
pub use error::SchemaError;
pub use value::FieldValue;
