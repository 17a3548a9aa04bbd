//! Crash-durable on-disk storage for the Courier SDK.
//!
//! The [`EnvelopeStore`] is the single source of truth that survives process
//! death: every envelope is written to its own file before delivery and only
//! deleted after the server confirmed receipt. The store enforces a bounded
//! size by evicting the oldest envelopes, and tolerates files left behind by
//! a crash mid-write.
//!
//! Next to the envelope queue, [`SessionStore`] holds the single-file
//! "current session" and "crashed session" slots. These are overwritten in
//! place and are not part of the queue.

#![warn(missing_docs)]

mod session;
mod store;

pub use crate::session::*;
pub use crate::store::*;

use std::io;

/// An error raised by the on-disk stores.
///
/// Store failures are reported to the caller and logged, but the SDK's own
/// failure to persist telemetry must never take the host application down.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage directory could not be created.
    #[error("could not create storage directory")]
    CreateDirFailed(#[source] io::Error),
    /// The storage directory could not be listed.
    #[error("could not list storage directory")]
    ListFailed(#[source] io::Error),
    /// A file could not be written.
    #[error("could not write file")]
    WriteFailed(#[source] io::Error),
    /// A file could not be read.
    #[error("could not read file")]
    ReadFailed(#[source] io::Error),
    /// A file could not be deleted.
    #[error("could not delete file")]
    DeleteFailed(#[source] io::Error),
    /// The envelope could not be serialized for storage.
    #[error("could not serialize envelope")]
    SerializeFailed(#[from] courier_envelope::EnvelopeError),
}
