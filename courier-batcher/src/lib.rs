//! Generic telemetry item batching for the Courier SDK.
//!
//! The [`ItemBatcher`] accumulates telemetry items (structured logs, custom
//! items) in memory and flushes them as one serialized batch when any of
//! three thresholds is hit: an item count cap, a serialized byte size cap, or
//! a timeout after the first item entered an empty buffer.
//!
//! Items are enriched with default attributes from the SDK and the current
//! [`ScopeSnapshot`] before buffering; attributes supplied on the item always
//! win over injected defaults.
//!
//! The batcher hands finished batches to a capture sink callback and knows
//! nothing about HTTP or disk. Buffered items are not crash-durable: a
//! process crash between `add` and the flush loses them by design, in
//! exchange for not touching the disk on every telemetry call.

#![warn(missing_docs)]

mod attribute;
mod batcher;
mod scope;

pub use crate::attribute::*;
pub use crate::batcher::*;
pub use crate::scope::*;
