use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use courier_base::{Dsn, SDK_NAME, SDK_VERSION};
use courier_config::Config;
use courier_quotas::{RATE_LIMITS_HEADER, RETRY_AFTER_HEADER};

/// An error raised while sending an envelope request.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The HTTP client could not be constructed.
    #[error("could not build the http client")]
    BuildFailed(#[source] reqwest::Error),
    /// The request could not be sent or no response was received.
    #[error("could not send request")]
    SendFailed(#[source] reqwest::Error),
    /// The network is known to be unreachable.
    #[error("the network is unreachable")]
    Unreachable,
}

/// The parts of an HTTP response the delivery pipeline consumes.
#[derive(Clone, Debug)]
pub struct SendResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The value of the rate limits header, if present.
    pub rate_limits: Option<String>,
    /// The value of the retry after header, if present.
    pub retry_after: Option<String>,
}

impl SendResponse {
    /// Creates a response carrying only a status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            rate_limits: None,
            retry_after: None,
        }
    }

    /// Returns `true` if the envelope was accepted.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns `true` if the server rejected the envelope due to rate limits.
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Returns `true` for client errors that will never succeed on retry.
    ///
    /// Rate limiting is excluded; it is flow control, not a rejection.
    pub fn is_permanent_rejection(&self) -> bool {
        (400..500).contains(&self.status) && !self.is_rate_limited()
    }
}

/// The request layer underneath the transport.
///
/// Injected at construction so hosts can wire their own connectivity
/// monitoring and tests can fake the server.
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    /// Returns whether requests can currently be sent.
    ///
    /// A drain cycle aborts up front when the sender is not ready, without
    /// consuming any stored envelopes.
    fn is_ready(&self) -> bool;

    /// Sends one serialized envelope and returns the response.
    ///
    /// An `Err` means no response was received at all; HTTP error statuses
    /// are returned as `Ok` responses.
    async fn send_envelope(&self, body: Vec<u8>) -> Result<SendResponse, SendError>;
}

/// The production [`EnvelopeSender`] on top of a reqwest client.
///
/// Readiness starts out `true`; hosts with connectivity monitoring flip it
/// via [`set_ready`](Self::set_ready) when the network goes away and comes
/// back.
pub struct ReqwestSender {
    client: reqwest::Client,
    url: String,
    auth: String,
    ready: AtomicBool,
}

impl ReqwestSender {
    /// Creates a sender posting to the envelope endpoint of the given DSN.
    pub fn new(config: &Config, dsn: &Dsn) -> Result<Self, SendError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(config.http_connection_timeout())
            .timeout(config.http_timeout())
            .gzip(true)
            .build()
            .map_err(SendError::BuildFailed)?;

        let auth = format!(
            "Sentry sentry_version=7, sentry_client={}/{}, sentry_key={}",
            SDK_NAME,
            SDK_VERSION,
            dsn.public_key()
        );

        Ok(Self {
            client,
            url: dsn.envelope_api_url(),
            auth,
            ready: AtomicBool::new(true),
        })
    }

    /// Updates the readiness flag from a connectivity callback.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

#[async_trait]
impl EnvelopeSender for ReqwestSender {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn send_envelope(&self, body: Vec<u8>) -> Result<SendResponse, SendError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", courier_envelope::CONTENT_TYPE)
            .header("X-Sentry-Auth", &self.auth)
            .body(body)
            .send()
            .await
            .map_err(SendError::SendFailed)?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        Ok(SendResponse {
            status: response.status().as_u16(),
            rate_limits: header(RATE_LIMITS_HEADER),
            retry_after: header(RETRY_AFTER_HEADER),
        })
    }
}
