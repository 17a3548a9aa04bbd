use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Raised if a DSN cannot be parsed from a string.
#[derive(Debug, thiserror::Error)]
pub enum DsnParseError {
    /// The DSN is not a valid URL.
    #[error("invalid url")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL scheme is not `http` or `https`.
    #[error("invalid scheme")]
    InvalidScheme,
    /// The DSN does not carry a public key in the username position.
    #[error("missing public key")]
    NoPublicKey,
    /// The DSN does not carry a host.
    #[error("missing host")]
    NoHost,
    /// The last path segment is not a valid project id.
    #[error("missing or invalid project id")]
    InvalidProjectId,
}

/// A DSN (data source name) pointing to a telemetry ingestion project.
///
/// The format is `{scheme}://{public_key}@{host}[:{port}]/[{path}]{project_id}`.
/// The DSN determines the envelope endpoint and the public key sent in the
/// auth header of every request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    port: u16,
    path: String,
    project_id: u64,
}

impl Dsn {
    /// Returns the public key of this DSN.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Returns the host of this DSN.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the project id of this DSN.
    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    /// Returns the fully qualified API URL of the envelope endpoint.
    pub fn envelope_api_url(&self) -> String {
        format!(
            "{}://{}:{}{}api/{}/envelope/",
            self.scheme, self.host, self.port, self.path, self.project_id
        )
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}{}{}",
            self.scheme, self.public_key, self.host, self.port, self.path, self.project_id
        )
    }
}

impl FromStr for Dsn {
    type Err = DsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)?;

        let scheme = match url.scheme() {
            scheme @ ("http" | "https") => scheme.to_owned(),
            _ => return Err(DsnParseError::InvalidScheme),
        };

        if url.username().is_empty() {
            return Err(DsnParseError::NoPublicKey);
        }

        let host = url.host_str().ok_or(DsnParseError::NoHost)?.to_owned();
        let port = url
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        let full_path = url.path();
        let (path, project_segment) = match full_path.rfind('/') {
            Some(index) => full_path.split_at(index + 1),
            None => return Err(DsnParseError::InvalidProjectId),
        };

        let project_id = project_segment
            .parse()
            .map_err(|_| DsnParseError::InvalidProjectId)?;

        Ok(Dsn {
            scheme,
            public_key: url.username().to_owned(),
            host,
            port,
            path: path.to_owned(),
            project_id,
        })
    }
}

impl Serialize for Dsn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dsn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = std::borrow::Cow::<'_, str>::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let dsn: Dsn = "https://e12d836b15bb49d7bbf99e64295d995b@ingest.example.com/42"
            .parse()
            .unwrap();

        assert_eq!(dsn.public_key(), "e12d836b15bb49d7bbf99e64295d995b");
        assert_eq!(dsn.host(), "ingest.example.com");
        assert_eq!(dsn.project_id(), 42);
        assert_eq!(
            dsn.envelope_api_url(),
            "https://ingest.example.com:443/api/42/envelope/"
        );
    }

    #[test]
    fn test_parse_with_port_and_path() {
        let dsn: Dsn = "http://key@localhost:8000/ingest/7".parse().unwrap();
        assert_eq!(
            dsn.envelope_api_url(),
            "http://localhost:8000/ingest/api/7/envelope/"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "ftp://key@host/1".parse::<Dsn>(),
            Err(DsnParseError::InvalidScheme)
        ));
        assert!(matches!(
            "https://host/1".parse::<Dsn>(),
            Err(DsnParseError::NoPublicKey)
        ));
        assert!(matches!(
            "https://key@host/abc".parse::<Dsn>(),
            Err(DsnParseError::InvalidProjectId)
        ));
    }
}
