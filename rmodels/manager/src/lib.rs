#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Model lifecycle on top of an engine session.
//!
//! [`ModelManager`] keeps one [`NamespaceRegistry`] of live models. Each model
//! owns an engine namespace holding its loaded artifact plus generated
//! scoring and export functions, and the files the manager created for it.

/// Artifact sources and the on-disk layout.
pub mod artifact;
/// Manager settings loaded from TOML.
pub mod config;
/// The manager's error type.
pub mod error;
/// Namespace installation and teardown on a session.
pub mod install;
/// The public lifecycle surface.
pub mod manager;
/// Identifier to record bookkeeping.
pub mod registry;
/// Structured logs and lifecycle events.
pub mod telemetry;

pub use artifact::{ArtifactSource, ArtifactStore};
pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use manager::ModelManager;
pub use registry::{ModelRecord, NamespaceRegistry};
pub use telemetry::{ManagerTelemetry, ManagerTelemetryBuilder};
