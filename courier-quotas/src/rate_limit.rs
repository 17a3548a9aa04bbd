use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use courier_base::DataCategory;

/// A collection of data categories that a rate limit applies to.
pub type DataCategories = SmallVec<[DataCategory; 8]>;

/// A monotonic expiration marker for [`RateLimit`]s.
///
/// `RetryAfter` marks an instant at which a rate limit expires, which is
/// indicated by `expired`. It can convert into the remaining time until
/// expiration.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RetryAfter {
    when: Instant,
}

impl RetryAfter {
    /// Creates a retry after instance expiring in the given number of seconds.
    #[inline]
    pub fn from_secs(seconds: u64) -> Self {
        Self::from_duration(Duration::from_secs(seconds))
    }

    /// Creates a retry after instance expiring after the given duration.
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        let when = Instant::now() + duration;
        Self { when }
    }

    /// Returns the remaining duration until the rate limit expires.
    #[inline]
    pub fn remaining(self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.when {
            None
        } else {
            Some(self.when - now)
        }
    }

    /// Returns the remaining seconds until the rate limit expires.
    ///
    /// This is a shortcut to `retry_after.remaining().as_secs()` with one
    /// exception: If the rate limit has expired, this function returns `0`.
    #[inline]
    pub fn remaining_seconds(self) -> u64 {
        match self.remaining() {
            // Compensate for the missing subsec part by adding 1s
            Some(duration) if duration.subsec_nanos() == 0 => duration.as_secs(),
            Some(duration) => duration.as_secs() + 1,
            None => 0,
        }
    }

    /// Returns whether this rate limit has expired.
    #[inline]
    pub fn expired(self) -> bool {
        self.remaining().is_none()
    }
}

impl fmt::Debug for RetryAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remaining_seconds() {
            0 => write!(f, "RetryAfter(expired)"),
            remaining => write!(f, "RetryAfter({remaining}s)"),
        }
    }
}

/// Error parsing a [`RetryAfter`].
#[derive(Debug)]
pub enum InvalidRetryAfter {
    /// The supplied delay in seconds was not valid.
    InvalidDelay(std::num::ParseFloatError),
    /// The supplied delay was negative or not a finite number.
    NegativeDelay(f64),
}

impl FromStr for RetryAfter {
    type Err = InvalidRetryAfter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let float = s.parse::<f64>().map_err(InvalidRetryAfter::InvalidDelay)?;
        if !float.is_finite() || float < 0.0 {
            return Err(InvalidRetryAfter::NegativeDelay(float));
        }

        let seconds = float.ceil() as u64;
        Ok(RetryAfter::from_secs(seconds))
    }
}

/// A machine readable reason for a rate limit, reported by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReasonCode(String);

impl ReasonCode {
    /// Creates a new reason code from the given string.
    pub fn new<S: Into<String>>(code: S) -> Self {
        Self(code.into())
    }

    /// Returns the string representation of this reason code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bounded rate limit.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimit {
    /// A set of data categories that this limit applies to. If empty, this
    /// rate limit applies to all data.
    pub categories: DataCategories,

    /// A machine readable reason indicating which quota caused it.
    pub reason_code: Option<ReasonCode>,

    /// A marker when this rate limit expires.
    pub retry_after: RetryAfter,
}

impl RateLimit {
    /// Creates a rate limit applying to all data categories.
    pub fn for_all(retry_after: RetryAfter) -> Self {
        Self {
            categories: DataCategories::new(),
            reason_code: None,
            retry_after,
        }
    }

    /// Checks whether the rate limit applies to the given category.
    ///
    /// Unknown categories never match, so unrecognized server limits do not
    /// suppress known telemetry.
    pub fn matches(&self, category: DataCategory) -> bool {
        if category == DataCategory::Unknown {
            return false;
        }

        self.categories.is_empty() || self.categories.contains(&category)
    }
}

/// A collection of rate limits.
///
/// This collection may be empty, indicated by `is_ok`. Rate limits can be
/// checked for categories by invoking `is_active` with the respective
/// [`DataCategory`].
#[derive(Clone, Debug, Default)]
pub struct RateLimits {
    limits: Vec<RateLimit>,
}

impl RateLimits {
    /// Creates an empty RateLimits instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a limit to this collection.
    ///
    /// If a rate limit with the same set of categories already exists, the
    /// `retry_after` count is merged with the existing limit: the longer of
    /// the two wins. An existing limit is never shortened.
    pub fn add(&mut self, mut limit: RateLimit) {
        // Categories are logically a set, but not implemented as such.
        limit.categories.sort();

        let limit_opt = self
            .limits
            .iter_mut()
            .find(|l| l.categories == limit.categories);

        match limit_opt {
            None => self.limits.push(limit),
            Some(existing) if existing.retry_after < limit.retry_after => *existing = limit,
            Some(_) => (), // keep existing, longer limit
        }
    }

    /// Merges all limits into this instance.
    ///
    /// This keeps all existing rate limits, adding new ones, and updating
    /// ones with a longer `retry_after` count. The resulting `RateLimits`
    /// contains the merged maximum.
    pub fn merge(&mut self, limits: Self) {
        for limit in limits.limits {
            self.add(limit);
        }
    }

    /// Returns `true` if this instance contains no active limits.
    pub fn is_ok(&self) -> bool {
        !self.is_limited()
    }

    /// Returns `true` if this instance contains any active rate limits.
    pub fn is_limited(&self) -> bool {
        self.iter().any(|limit| !limit.retry_after.expired())
    }

    /// Returns `true` if the given category is currently rate limited.
    ///
    /// A category is limited when a non-expired limit names it explicitly or
    /// a non-expired all-category limit exists. Both kinds are checked.
    pub fn is_active(&self, category: DataCategory) -> bool {
        self.iter()
            .any(|limit| !limit.retry_after.expired() && limit.matches(category))
    }

    /// Removes expired rate limits from this instance.
    ///
    /// Keeps the collection, and with it the lock hold time of every check,
    /// proportional to the number of active limits.
    pub fn clean_expired(&mut self) {
        self.limits.retain(|limit| !limit.retry_after.expired());
    }

    /// Returns the longest active rate limit.
    ///
    /// If multiple rate limits have the same retry after count, any of the
    /// limits is returned.
    pub fn longest(&self) -> Option<&RateLimit> {
        self.iter().max_by_key(|limit| limit.retry_after)
    }

    /// Returns an iterator over the rate limits.
    pub fn iter(&self) -> std::slice::Iter<'_, RateLimit> {
        self.limits.iter()
    }
}

impl<'a> IntoIterator for &'a RateLimits {
    type IntoIter = std::slice::Iter<'a, RateLimit>;
    type Item = &'a RateLimit;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
