use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unique identifier of an event.
///
/// Event ids are rendered without hyphens on the wire. Parsing accepts both
/// the hyphenated and the simple form.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the nil event id, used to signal special cases.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns whether this is the nil event id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0.as_simple())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EventId)
    }
}

impl Serialize for EventId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = std::borrow::Cow::<'_, str>::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}
