//! Client-side telemetry batching, rate limiting, and delivery.
//!
//! Courier captures telemetry (events, sessions, structured logs), batches it
//! efficiently, respects server-side rate limits, and delivers it over HTTP
//! with disk-backed durability across process crashes.
//!
//! # Quickstart
//!
//! ```no_run
//! # async fn run() {
//! let options = courier::Options {
//!     dsn: Some("https://key@ingest.example.com/42".to_owned()),
//!     release: Some("app@1.0.0".to_owned()),
//!     ..Default::default()
//! };
//!
//! let client = courier::Client::init(options).unwrap();
//!
//! let log = courier::TelemetryLog::new(courier::LogLevel::Info, "checkout started");
//! client.capture_log(log, &Default::default());
//!
//! // deliver everything before shutdown, bounded by the configured timeout
//! client.close().await;
//! # }
//! ```
//!
//! Without a DSN the client initializes in disabled mode: every capture call
//! is a cheap no-op and nothing touches disk or network.

#![warn(missing_docs)]

mod client;
mod debug_images;
mod options;
mod telemetry_log;

pub use crate::client::*;
pub use crate::debug_images::*;
pub use crate::options::*;
pub use crate::telemetry_log::*;

pub use courier_base::{DataCategory, Dsn, EventId};
pub use courier_batcher::{AttributeValue, ScopeSnapshot, ScopeUser};
pub use courier_config::Config;
pub use courier_envelope::{ContentType, Envelope, Item, ItemType};
