use serde::ser::SerializeMap;
use serde::Serialize;

/// A typed attribute value attached to a telemetry item.
///
/// On the wire, attributes serialize as `{"type": ..., "value": ...}` pairs
/// so the server can ingest them without guessing types.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A 64-bit signed integer value.
    Integer(i64),
    /// A 64-bit float value.
    Double(f64),
    /// A boolean value.
    Boolean(bool),
}

impl AttributeValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            Self::String(value) => map.serialize_entry("value", value)?,
            Self::Integer(value) => map.serialize_entry("value", value)?,
            Self::Double(value) => map.serialize_entry("value", value)?,
            Self::Boolean(value) => map.serialize_entry("value", value)?,
        }
        map.end()
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_typed_pairs() {
        let json = serde_json::to_string(&AttributeValue::from("release-1")).unwrap();
        assert_eq!(json, r#"{"type":"string","value":"release-1"}"#);

        let json = serde_json::to_string(&AttributeValue::from(42i64)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":42}"#);

        let json = serde_json::to_string(&AttributeValue::from(true)).unwrap();
        assert_eq!(json, r#"{"type":"boolean","value":true}"#);

        let json = serde_json::to_string(&AttributeValue::from(1.5f64)).unwrap();
        assert_eq!(json, r#"{"type":"double","value":1.5}"#);
    }
}
