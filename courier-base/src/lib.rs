//! Core data types shared across the Courier SDK.
//!
//! This crate defines the vocabulary used by all other SDK crates: the
//! [`DataCategory`] that classifies telemetry for rate limiting, the
//! [`EventId`] that identifies captured events, and the [`Dsn`] that tells the
//! SDK where to deliver telemetry.

#![warn(missing_docs)]

mod data_category;
mod dsn;
mod event_id;

pub use crate::data_category::*;
pub use crate::dsn::*;
pub use crate::event_id::*;

/// The SDK name reported in outgoing telemetry and auth headers.
pub const SDK_NAME: &str = "courier.rust";

/// The SDK version reported in outgoing telemetry and auth headers.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
