//! Core types for authwatch: the event model shared between collectors
//! and the correlation server, the detection rule constants, and the
//! error taxonomy surfaced by the API.
//!
//! This crate is pure data and logic; all I/O lives in the server crate.

pub mod error;
pub mod event;
pub mod rules;
pub mod status;

pub use error::CoreError;
pub use event::{AttrSet, SshAuthAttrs, SudoCommandAttrs, WireEvent};
pub use status::AlertStatus;
