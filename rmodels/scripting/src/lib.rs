#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Program generation for the engine: training scripts, per-model namespace
//! construction (scoring and export functions) and the small invocations sent
//! for every scoring request. Nothing here talks to the engine.

/// Line-oriented program builder.
pub mod builder;
/// Script generation errors.
pub mod error;
/// The generator bound to one configuration, with its defaults.
pub mod generator;
/// Engine-side names derived from model identifiers.
pub mod naming;
/// Namespace construction, commit and teardown.
pub mod namespace;
/// Training scripts.
pub mod training;

pub use builder::RScript;
pub use error::ScriptError;
pub use generator::{ScriptGenerator, DEFAULT_PREDICT_ARGUMENTS, DEFAULT_TRAIN_FUNCTION};
pub use naming::{namespace_name, staged_name};
pub use namespace::{
    commit_program, export_invocation, teardown_program, NamespacePlan, ATTRIBUTE_NAMES,
    FACTOR_COLUMNS, NUMERIC_COLUMNS,
};
