//! Implementation of telemetry envelopes.
//!
//! Envelopes are containers for telemetry payloads. Similar to multipart form
//! data requests, each envelope has global headers and a set of items, such as
//! an event payload, an attachment, or a batch of logs.
//!
//! Envelopes have a well-defined serialization format. It is roughly:
//!
//! ```plain
//! <json headers>\n
//! <item headers>\n
//! payload\n
//! ...
//! ```
//!
//! JSON headers and item headers must not contain line breaks. Payloads can be
//! any binary encoding. This is enabled by declaring an explicit length in the
//! item headers. Example:
//!
//! ```plain
//! {"event_id":"9ec79c33ec9942ab8353589fcb2e04dc"}
//! {"type":"event","length":41,"content_type":"application/json"}
//! {"message":"hello world","level":"error"}
//! {"type":"attachment","length":7,"content_type":"text/plain","filename":"application.log"}
//! Hello
//!
//! ```
//!
//! For crash-time bulk attachment serialization, the [`attachment_map`]
//! module provides a compact binary map format instead.

#![warn(missing_docs)]

pub mod attachment_map;
mod envelope;

pub use crate::envelope::*;
