//! HTTP envelope delivery for the Courier SDK.
//!
//! The [`HttpTransport`] drains the on-disk envelope store and delivers each
//! envelope over HTTP, oldest first. Server responses feed the rate limiter:
//! items whose category is limited are stripped before sending and accounted
//! as lost events, which are in turn reported to the server as client
//! reports.
//!
//! The actual request layer sits behind the [`EnvelopeSender`] trait so hosts
//! and tests can substitute connectivity-aware implementations; the
//! production implementation is [`ReqwestSender`].

#![warn(missing_docs)]

mod client_report;
mod sender;
mod transport;

pub use crate::client_report::*;
pub use crate::sender::*;
pub use crate::transport::*;
