#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Blocking client for an Rserve engine.
//!
//! One [`RserveClient`] owns one connection. Programs are submitted as text,
//! wrapped in `try(...)` on the engine side, and the reply is decoded once into
//! a [`ProtocolResult`]. Engine-side failures surface as
//! [`ProtocolError::Remote`] carrying the engine's own message.

/// Connection handling and the evaluation round trip.
pub mod client;
/// Request framing and response reading.
pub mod codec;
/// Protocol errors.
pub mod error;
/// Engine literal rendering (strings, numbers, missing values, symbols).
pub mod literal;
/// QAP1 command, parameter and expression type codes.
pub mod qap;
/// Typed evaluation results.
pub mod result;
/// Decoded engine expressions.
pub mod rexp;
/// Session trait and the serialized engine channel.
pub mod session;

pub use client::{RserveClient, ServerInfo, Transport};
pub use error::ProtocolError;
pub use literal::{symbol, RLiteral};
pub use result::ProtocolResult;
pub use rexp::{RValue, Rexp};
pub use session::{EngineChannel, RSession};
