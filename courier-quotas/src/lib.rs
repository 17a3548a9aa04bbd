//! Rate limiting for the Courier SDK.
//!
//! The server communicates rate limits through two response headers:
//!
//! - `X-Sentry-Rate-Limits` carries fine-grained per-category limits in a
//!   comma-separated mini-language, parsed by [`parse_rate_limits`].
//! - `Retry-After` carries a generic timeout for all categories, parsed by
//!   [`parse_retry_after`].
//!
//! Parsed limits are collected in [`RateLimits`], which answers whether a
//! given [`DataCategory`](courier_base::DataCategory) is currently limited.
//! Limits only ever grow: merging a shorter expiry for an already limited
//! category never shortens the effective limit.

#![warn(missing_docs)]

mod parser;
mod rate_limit;

pub use crate::parser::*;
pub use crate::rate_limit::*;
