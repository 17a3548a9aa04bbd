use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classifies the type of data that the server can independently throttle.
///
/// Rate limits returned by the server are keyed by data category. Every
/// envelope item maps to at most one category; items without a category (such
/// as client reports) are never rate limited.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum DataCategory {
    /// Events with an `event_type` not explicitly listed below.
    Default = 0,
    /// Error events.
    Error = 1,
    /// Transaction events.
    Transaction = 2,
    /// Events with an event type of `csp`, `hpkp`, `expectct` and `expectstaple`.
    Security = 3,
    /// An attachment. Quantity is the size of the attachment in bytes.
    Attachment = 4,
    /// Session updates. Quantity is the number of updates in the batch.
    Session = 5,
    /// Profiles.
    Profile = 6,
    /// Session replays.
    Replay = 7,
    /// User feedback.
    #[serde(rename = "feedback")]
    Feedback = 8,
    /// Batched structured log items.
    LogItem = 9,
    /// Any other data category not known by this SDK version.
    #[serde(other)]
    Unknown = -1,
}

impl DataCategory {
    /// Returns the data category corresponding to the given name.
    pub fn from_name(string: &str) -> Self {
        match string {
            "default" => Self::Default,
            "error" => Self::Error,
            "transaction" => Self::Transaction,
            "security" => Self::Security,
            "attachment" => Self::Attachment,
            "session" => Self::Session,
            "profile" => Self::Profile,
            "replay" => Self::Replay,
            "feedback" => Self::Feedback,
            "log_item" => Self::LogItem,
            _ => Self::Unknown,
        }
    }

    /// Returns the canonical name of this data category.
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Error => "error",
            Self::Transaction => "transaction",
            Self::Security => "security",
            Self::Attachment => "attachment",
            Self::Session => "session",
            Self::Profile => "profile",
            Self::Replay => "replay",
            Self::Feedback => "feedback",
            Self::LogItem => "log_item",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if the category refers to an error event.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::Default | Self::Security)
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DataCategory {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for category in [
            DataCategory::Default,
            DataCategory::Error,
            DataCategory::Transaction,
            DataCategory::Security,
            DataCategory::Attachment,
            DataCategory::Session,
            DataCategory::Profile,
            DataCategory::Replay,
            DataCategory::Feedback,
            DataCategory::LogItem,
        ] {
            assert_eq!(DataCategory::from_name(category.name()), category);
        }
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(DataCategory::from_name("span_v2"), DataCategory::Unknown);
        assert_eq!(DataCategory::Unknown.name(), "unknown");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DataCategory::LogItem).unwrap();
        assert_eq!(json, "\"log_item\"");

        let parsed: DataCategory = serde_json::from_str("\"feedback\"").unwrap();
        assert_eq!(parsed, DataCategory::Feedback);

        let parsed: DataCategory = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(parsed, DataCategory::Unknown);
    }
}
