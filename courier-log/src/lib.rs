//! Logging facade for the Courier SDK.
//!
//! All SDK crates log through the macros re-exported here instead of using
//! `tracing` directly. Host applications opt into diagnostics by invoking
//! [`init`] with a [`LogConfig`]; without it, SDK logging is a no-op.
//!
//! # Conventions
//!
//! Log messages start lowercase and end without punctuation. Choose the log
//! level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.

#![warn(missing_docs)]

mod setup;
pub use setup::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
