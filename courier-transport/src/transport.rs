use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use courier_common::RetryBackoff;
use courier_config::Config;
use courier_envelope::Envelope;
use courier_quotas::{update_rate_limits, RateLimits};
use courier_store::{EnvelopeStore, StoreError, StoredEnvelope};

use crate::{ClientReportRecorder, DiscardReason, EnvelopeSender, SendResponse};

/// The result of one drain cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DrainOutcome {
    /// Every stored envelope was handled; the queue is empty.
    Drained,
    /// The sender reported not ready; no envelope was consumed.
    NotReady,
    /// The server rate limited the request; the current envelope stays
    /// queued and the cycle ended to preserve ordering.
    RateLimited,
    /// No response was received or the server failed; the current envelope
    /// stays queued and the cycle ended.
    NetworkError,
}

/// Delivers stored envelopes over HTTP, oldest first.
///
/// One drain cycle runs at a time; concurrent triggers coalesce on the async
/// gate. Rate limits learned from responses are applied up front on the next
/// cycle, stripping limited items before they are sent.
pub struct HttpTransport {
    store: Arc<EnvelopeStore>,
    sender: Arc<dyn EnvelopeSender>,
    rate_limits: Mutex<RateLimits>,
    client_reports: ClientReportRecorder,
    retry_backoff: Mutex<RetryBackoff>,
    drain_gate: tokio::sync::Mutex<()>,
}

impl HttpTransport {
    /// Creates a transport draining the given store through the given sender.
    pub fn new(config: &Config, store: Arc<EnvelopeStore>, sender: Arc<dyn EnvelopeSender>) -> Self {
        Self {
            store,
            sender,
            rate_limits: Mutex::new(RateLimits::new()),
            client_reports: ClientReportRecorder::new(),
            retry_backoff: Mutex::new(RetryBackoff::new(config.http_max_retry_interval())),
            drain_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the envelope store backing this transport.
    pub fn store(&self) -> &Arc<EnvelopeStore> {
        &self.store
    }

    /// Records a lost event for client-side observability.
    pub fn record_lost_event(
        &self,
        reason: DiscardReason,
        category: courier_base::DataCategory,
    ) {
        self.client_reports.record_lost_event(reason, category);
    }

    /// Returns whether the given category is currently rate limited.
    pub fn is_rate_limited(&self, category: courier_base::DataCategory) -> bool {
        self.rate_limits.lock().is_active(category)
    }

    /// Persists an envelope and immediately attempts a drain cycle.
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<DrainOutcome, StoreError> {
        self.store.store(&envelope)?;
        Ok(self.send_all_stored().await)
    }

    /// Attempts to deliver all stored envelopes in order.
    ///
    /// Stops at the first envelope that cannot be delivered right now (rate
    /// limit or network failure) so envelope N never loses its place to
    /// N + 1. Permanently rejected envelopes are dropped with lost-event
    /// accounting and do not stop the cycle.
    pub async fn send_all_stored(&self) -> DrainOutcome {
        let _guard = self.drain_gate.lock().await;

        if !self.sender.is_ready() {
            courier_log::debug!("sender not ready, skipping drain");
            return DrainOutcome::NotReady;
        }

        let stored = match self.store.get_all_envelopes() {
            Ok(stored) => stored,
            Err(error) => {
                courier_log::warn!(error = %error, "could not read envelope store");
                return DrainOutcome::NetworkError;
            }
        };

        for stored_envelope in stored {
            match self.send_one(stored_envelope).await {
                DrainOutcome::Drained => continue,
                other => return other,
            }
        }

        DrainOutcome::Drained
    }

    /// Drains the store, retrying with exponential backoff after network
    /// failures until the queue is empty or delivery is blocked for another
    /// reason.
    pub async fn send_all_stored_with_retry(&self) -> DrainOutcome {
        loop {
            let outcome = self.send_all_stored().await;
            if outcome != DrainOutcome::NetworkError {
                return outcome;
            }

            let delay = self.retry_backoff.lock().next_backoff();
            courier_log::debug!(delay_ms = delay.as_millis() as u64, "retrying drain");
            tokio::time::sleep(delay).await;
        }
    }

    /// Drains the store within a bounded timeout.
    ///
    /// Returns `true` when the queue was fully drained in time. Used on
    /// shutdown paths where blocking indefinitely would be worse than
    /// leaving envelopes for the next launch.
    pub async fn flush(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.send_all_stored()).await,
            Ok(DrainOutcome::Drained)
        )
    }

    async fn send_one(&self, stored: StoredEnvelope) -> DrainOutcome {
        let StoredEnvelope { path, mut envelope } = stored;

        self.strip_rate_limited_items(&mut envelope);

        if envelope.is_empty() {
            courier_log::debug!("all items rate limited, dropping envelope");
            self.delete_stored(&path);
            return DrainOutcome::Drained;
        }

        if let Some(report) = self.client_reports.flush_report() {
            envelope.add_item(report);
        }

        let body = match envelope.to_vec() {
            Ok(body) => body,
            Err(error) => {
                courier_log::error!(error = %error, "could not serialize stored envelope");
                self.delete_stored(&path);
                return DrainOutcome::Drained;
            }
        };

        let response = match self.sender.send_envelope(body).await {
            Ok(response) => response,
            Err(error) => {
                courier_log::warn!(error = %error, "network error, envelope stays queued");
                return DrainOutcome::NetworkError;
            }
        };

        self.update_rate_limits(&response);

        if response.is_success() {
            self.retry_backoff.lock().reset();
            self.delete_stored(&path);
            DrainOutcome::Drained
        } else if response.is_rate_limited() {
            courier_log::debug!("request rate limited, stopping drain cycle");
            DrainOutcome::RateLimited
        } else if response.is_permanent_rejection() {
            courier_log::warn!(
                status = response.status,
                "envelope permanently rejected, dropping"
            );
            for item in envelope.items() {
                if let Some(category) = item.category() {
                    self.client_reports
                        .record_lost_event(DiscardReason::NetworkError, category);
                }
            }
            self.delete_stored(&path);
            DrainOutcome::Drained
        } else {
            // Server errors behave like outages: keep the envelope, end the
            // cycle, retry later.
            courier_log::warn!(status = response.status, "server error, envelope stays queued");
            DrainOutcome::NetworkError
        }
    }

    /// Removes items whose category is currently rate limited, recording
    /// each as a lost event.
    fn strip_rate_limited_items(&self, envelope: &mut Envelope) {
        let rate_limits = self.rate_limits.lock();

        envelope.retain_items(|item| {
            let limited = item
                .category()
                .map(|category| rate_limits.is_active(category))
                .unwrap_or(false);

            if limited {
                if let Some(category) = item.category() {
                    self.client_reports
                        .record_lost_event(DiscardReason::RatelimitBackoff, category);
                }
            }

            !limited
        });
    }

    fn update_rate_limits(&self, response: &SendResponse) {
        let mut rate_limits = self.rate_limits.lock();
        update_rate_limits(
            &mut rate_limits,
            response.status,
            response.rate_limits.as_deref(),
            response.retry_after.as_deref(),
        );
        rate_limits.clean_expired();
    }

    fn delete_stored(&self, path: &std::path::Path) {
        if let Err(error) = self.store.delete_envelope(path) {
            courier_log::warn!(
                path = %path.display(),
                error = %error,
                "could not delete stored envelope"
            );
        }
    }
}
