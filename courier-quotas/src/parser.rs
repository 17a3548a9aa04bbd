use std::time::Duration;

use chrono::{DateTime, Utc};

use courier_base::DataCategory;

use crate::{DataCategories, RateLimit, RateLimits, ReasonCode, RetryAfter};

/// Name of the rate limits response header.
pub const RATE_LIMITS_HEADER: &str = "X-Sentry-Rate-Limits";

/// Name of the retry after response header.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Fallback applied when a `Retry-After` header is missing or unparseable.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Parses the `X-Sentry-Rate-Limits` header.
///
/// The header consists of comma-separated quota groups of the form
/// `<retry_after>:<category>[;<category>...]:<scope>[:<reason>]`. Parsing is
/// as lenient as possible: malformed groups are skipped individually and a
/// fully garbage header yields an empty [`RateLimits`] instance.
///
/// A group with an empty category list limits all categories. The scope
/// component is parsed over but ignored, since a client is always its own
/// scope.
pub fn parse_rate_limits(string: &str) -> RateLimits {
    let mut rate_limits = RateLimits::new();

    for limit in string.split(',') {
        let limit = limit.trim();
        if limit.is_empty() {
            continue;
        }

        let mut components = limit.split(':');

        let retry_after = match components.next().and_then(|s| s.trim().parse().ok()) {
            Some(retry_after) => retry_after,
            None => continue,
        };

        let mut categories = DataCategories::new();
        for category in components.next().unwrap_or("").split(';') {
            let category = category.trim();
            if !category.is_empty() {
                categories.push(DataCategory::from_name(category));
            }
        }

        // The scope only carries meaning on the server.
        let _scope = components.next();

        let reason_code = components
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ReasonCode::new);

        rate_limits.add(RateLimit {
            categories,
            reason_code,
            retry_after,
        });
    }

    rate_limits
}

/// Parses a `Retry-After` header value.
///
/// Accepts a delay in seconds or an RFC 1123 HTTP-date. A missing, empty, or
/// unparseable value falls back to a default of 60 seconds from now. An
/// HTTP-date in the past yields an already expired marker.
pub fn parse_retry_after(header: Option<&str>) -> RetryAfter {
    let value = match header.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value,
        None => return RetryAfter::from_duration(DEFAULT_RETRY_AFTER),
    };

    if let Ok(retry_after) = value.parse::<RetryAfter>() {
        return retry_after;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        let remaining = (date.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();
        return RetryAfter::from_duration(remaining);
    }

    RetryAfter::from_duration(DEFAULT_RETRY_AFTER)
}

/// Merges rate limits communicated by an HTTP response into `rate_limits`.
///
/// Limits from the rate limits header are always merged. If the response is
/// a 429 and the header did not carry any active limit, the `Retry-After`
/// fallback is applied to all categories.
pub fn update_rate_limits(
    rate_limits: &mut RateLimits,
    status: u16,
    rate_limits_header: Option<&str>,
    retry_after_header: Option<&str>,
) {
    let mut had_limits = false;

    if let Some(header) = rate_limits_header {
        let parsed = parse_rate_limits(header);
        had_limits = parsed.is_limited();
        rate_limits.merge(parsed);
    }

    if status == 429 && !had_limits {
        rate_limits.add(RateLimit::for_all(parse_retry_after(retry_after_header)));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as SignedDuration;
    use similar_asserts::assert_eq;

    use super::*;

    fn categories_of(limits: &RateLimits) -> Vec<(Vec<DataCategory>, u64)> {
        limits
            .iter()
            .map(|limit| {
                (
                    limit.categories.to_vec(),
                    limit.retry_after.remaining_seconds(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_single_group() {
        let limits = parse_rate_limits("50:transaction:key");

        assert_eq!(
            categories_of(&limits),
            vec![(vec![DataCategory::Transaction], 50)]
        );
        assert!(limits.is_active(DataCategory::Transaction));
        assert!(!limits.is_active(DataCategory::Error));
    }

    #[test]
    fn test_parse_multiple_categories() {
        let limits = parse_rate_limits("2700:default;error;security:organization");

        assert!(limits.is_active(DataCategory::Default));
        assert!(limits.is_active(DataCategory::Error));
        assert!(limits.is_active(DataCategory::Security));
        assert!(!limits.is_active(DataCategory::Transaction));
    }

    #[test]
    fn test_parse_multiple_groups() {
        let limits = parse_rate_limits("50:transaction:key, 2700:error:organization");

        assert_eq!(limits.iter().count(), 2);
        assert!(limits.is_active(DataCategory::Transaction));
        assert!(limits.is_active(DataCategory::Error));
    }

    #[test]
    fn test_parse_empty_categories_limit_all() {
        let limits = parse_rate_limits("30::organization");

        assert!(limits.is_active(DataCategory::Error));
        assert!(limits.is_active(DataCategory::Attachment));
        assert!(limits.is_active(DataCategory::LogItem));
    }

    #[test]
    fn test_parse_reason_code() {
        let limits = parse_rate_limits("60:error:organization:quota_exceeded");

        let limit = limits.iter().next().unwrap();
        assert_eq!(limit.reason_code, Some(ReasonCode::new("quota_exceeded")));
    }

    #[test]
    fn test_parse_garbage_groups_skipped() {
        let limits = parse_rate_limits("A9813Hell,50:transaction:key,123Garbage");

        assert_eq!(
            categories_of(&limits),
            vec![(vec![DataCategory::Transaction], 50)]
        );
    }

    #[test]
    fn test_parse_negative_seconds_skipped() {
        let limits = parse_rate_limits("-50:transaction:key, 10:error:key");

        assert!(!limits.is_active(DataCategory::Transaction));
        assert!(limits.is_active(DataCategory::Error));
    }

    #[test]
    fn test_parse_all_garbage() {
        let limits = parse_rate_limits("hello world, this is , not a header;;;");
        assert!(limits.is_ok());
        assert_eq!(limits.iter().count(), 0);
    }

    #[test]
    fn test_parse_empty_header() {
        let limits = parse_rate_limits("");
        assert!(limits.is_ok());
    }

    #[test]
    fn test_parse_unknown_categories_never_match() {
        let limits = parse_rate_limits("60:lunar_phase:organization");

        assert_eq!(limits.iter().count(), 1);
        assert!(!limits.is_active(DataCategory::Error));
        assert!(!limits.is_active(DataCategory::Unknown));
    }

    #[test]
    fn test_retry_after_seconds() {
        let retry_after = parse_retry_after(Some("30"));
        assert_eq!(retry_after.remaining_seconds(), 30);
    }

    #[test]
    fn test_retry_after_http_date() {
        let date = Utc::now() + SignedDuration::seconds(120);
        let header = date.to_rfc2822();

        let retry_after = parse_retry_after(Some(&header));
        let remaining = retry_after.remaining_seconds();
        assert!((119..=121).contains(&remaining), "got {remaining}s");
    }

    #[test]
    fn test_retry_after_past_date_expired() {
        let date = Utc::now() - SignedDuration::seconds(120);
        let retry_after = parse_retry_after(Some(&date.to_rfc2822()));
        assert!(retry_after.expired());
    }

    #[test]
    fn test_retry_after_fallback() {
        assert_eq!(parse_retry_after(None).remaining_seconds(), 60);
        assert_eq!(parse_retry_after(Some("")).remaining_seconds(), 60);
        assert_eq!(parse_retry_after(Some("soon")).remaining_seconds(), 60);
        assert_eq!(parse_retry_after(Some("-5")).remaining_seconds(), 60);
    }

    #[test]
    fn test_update_with_header() {
        let mut limits = RateLimits::new();
        update_rate_limits(&mut limits, 429, Some("50:transaction:key"), None);

        assert!(limits.is_active(DataCategory::Transaction));
        assert!(!limits.is_active(DataCategory::Error));
    }

    #[test]
    fn test_update_429_without_header_limits_all() {
        let mut limits = RateLimits::new();
        update_rate_limits(&mut limits, 429, None, Some("120"));

        assert!(limits.is_active(DataCategory::Transaction));
        assert!(limits.is_active(DataCategory::Error));
        assert_eq!(limits.longest().unwrap().retry_after.remaining_seconds(), 120);
    }

    #[test]
    fn test_update_success_response_no_global_limit() {
        let mut limits = RateLimits::new();
        update_rate_limits(&mut limits, 200, Some("10:session:key"), None);

        assert!(limits.is_active(DataCategory::Session));
        assert!(!limits.is_active(DataCategory::Error));
    }
}
