use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};

use courier_base::Dsn;
use courier_batcher::{BatcherConfig, CaptureSink, ItemBatcher, ScopeSnapshot};
use courier_config::Config;
use courier_envelope::{ContentType, Envelope, Item, ItemType};
use courier_store::{EnvelopeStore, SessionStore, StoreError};
use courier_transport::{EnvelopeSender, HttpTransport, ReqwestSender, SendError};

use crate::{Options, TelemetryLog};

/// An error raised when the client cannot be initialized.
///
/// Initialization is the only fallible surface; once the client exists, no
/// capture call ever raises an error into the host application.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The configured DSN could not be parsed.
    #[error("invalid dsn")]
    InvalidDsn(#[from] courier_base::DsnParseError),
    /// The cache directory could not be initialized.
    #[error("could not initialize storage")]
    Store(#[from] StoreError),
    /// The HTTP layer could not be constructed.
    #[error("could not initialize the http layer")]
    Http(#[from] SendError),
    /// The client was initialized outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

/// The telemetry client.
///
/// A client without a DSN is [`Disabled`](Client::Disabled): capture calls
/// are cheap no-ops and nothing touches disk or network. This makes the
/// enabled/disabled decision explicit instead of threading optional state
/// through every call site.
pub enum Client {
    /// No DSN was configured; the entire pipeline is inert.
    Disabled,
    /// A fully wired capture and delivery pipeline.
    Enabled(Arc<EnabledClient>),
}

/// The wired pipeline behind an enabled [`Client`].
pub struct EnabledClient {
    config: Config,
    store: Arc<EnvelopeStore>,
    sessions: SessionStore,
    transport: Arc<HttpTransport>,
    log_batcher: ItemBatcher<TelemetryLog>,
    drain_notify: Arc<Notify>,
    store_tx: mpsc::UnboundedSender<StoreMessage>,
}

/// Work items for the storage worker.
///
/// Batch payloads travel through a channel so the batcher's capture sink
/// never blocks the capturing thread on disk I/O, while stores still happen
/// in submission order.
enum StoreMessage {
    /// Persist a serialized log batch as an envelope.
    Batch {
        /// The serialized batch payload.
        payload: Bytes,
        /// The number of items in the batch.
        count: usize,
    },
    /// Acknowledge once every previously submitted batch is on disk.
    Barrier(oneshot::Sender<()>),
}

async fn run_store_worker(
    store: Arc<EnvelopeStore>,
    notify: Arc<Notify>,
    mut rx: mpsc::UnboundedReceiver<StoreMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            StoreMessage::Batch { payload, count } => {
                let mut item = Item::new(ItemType::Log);
                item.set_payload(ContentType::Json, payload);
                item.set_item_count(count as u32);

                let mut envelope = Envelope::new(None);
                envelope.set_sent_at(chrono::Utc::now());
                envelope.add_item(item);

                // Durable first, delivery second: the drain worker picks the
                // envelope up from disk.
                match store.store(&envelope) {
                    Ok(_) => notify.notify_one(),
                    Err(error) => {
                        courier_log::warn!(error = %error, "could not persist log batch");
                    }
                }
            }
            StoreMessage::Barrier(ack) => {
                ack.send(()).ok();
            }
        }
    }
}

impl Client {
    /// Initializes the client from the given options.
    ///
    /// Returns [`Client::Disabled`] when no DSN is configured. On launch,
    /// expired envelopes are cleaned up and a drain of envelopes left over
    /// from the previous run (including crashed runs) is triggered.
    pub fn init(options: Options) -> Result<Self, ClientError> {
        courier_log::init(options.config.logging());

        let Some(dsn) = options.dsn.as_deref() else {
            courier_log::info!("no dsn configured, telemetry is disabled");
            return Ok(Self::Disabled);
        };
        let dsn: Dsn = dsn.parse()?;

        let sender = Arc::new(ReqwestSender::new(&options.config, &dsn)?);
        Self::init_with_sender(options, &dsn, sender)
    }

    /// Initializes the client with an injected request layer.
    ///
    /// This is the seam for hosts that bring their own connectivity handling
    /// and for tests; [`init`](Self::init) uses it with a [`ReqwestSender`].
    pub fn init_with_sender(
        options: Options,
        dsn: &Dsn,
        sender: Arc<dyn EnvelopeSender>,
    ) -> Result<Self, ClientError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let config = options.config.clone();

        let cache_dir = match config.cache_directory() {
            Some(directory) => directory.to_owned(),
            None => default_cache_dir(dsn),
        };

        let store = Arc::new(EnvelopeStore::open(&cache_dir, config.max_envelopes())?);
        if let Err(error) = store.delete_old_envelopes(config.envelope_max_age()) {
            courier_log::warn!(error = %error, "could not clean up expired envelopes");
        }

        let sessions = SessionStore::open(&cache_dir)?;

        let transport = Arc::new(HttpTransport::new(&config, Arc::clone(&store), sender));

        // One long-lived drain worker; stores only have to nudge it.
        let drain_notify = Arc::new(Notify::new());
        {
            let transport = Arc::clone(&transport);
            let notify = Arc::clone(&drain_notify);
            handle.spawn(async move {
                loop {
                    notify.notified().await;
                    transport.send_all_stored_with_retry().await;
                }
            });
        }

        let (store_tx, store_rx) = mpsc::unbounded_channel();
        handle.spawn(run_store_worker(
            Arc::clone(&store),
            Arc::clone(&drain_notify),
            store_rx,
        ));

        let sink: CaptureSink = {
            let store_tx = store_tx.clone();
            Box::new(move |payload, count| {
                // Hand off to the storage worker; flushing threads never
                // touch the disk themselves.
                store_tx.send(StoreMessage::Batch { payload, count }).ok();
            })
        };

        let mut log_batcher = ItemBatcher::new(
            BatcherConfig {
                environment: options.environment().to_owned(),
                release: options.release.clone(),
                flush_timeout: config.batch_flush_timeout(),
                max_item_count: config.batch_max_item_count(),
                max_buffer_size_bytes: config.batch_max_buffer_size_bytes(),
            },
            handle,
            sink,
        );

        if let Some(before_send) = options.before_send_log {
            log_batcher = log_batcher.with_before_send(before_send);
        }
        if let Some(installation_id) = options.installation_id {
            log_batcher =
                log_batcher.with_installation_id(Box::new(move || Some(installation_id.clone())));
        }

        // Deliver whatever the previous run left behind.
        drain_notify.notify_one();

        Ok(Self::Enabled(Arc::new(EnabledClient {
            config,
            store,
            sessions,
            transport,
            log_batcher,
            drain_notify,
            store_tx,
        })))
    }

    /// Returns whether this client delivers telemetry.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Captures a structured log entry.
    pub fn capture_log(&self, log: TelemetryLog, scope: &ScopeSnapshot) {
        match self {
            Self::Disabled => {}
            Self::Enabled(client) => client.log_batcher.add(log, scope),
        }
    }

    /// Persists an envelope and triggers delivery.
    ///
    /// Failures are logged but never surface to the caller; losing telemetry
    /// must not break the host application.
    pub fn capture_envelope(&self, envelope: Envelope) {
        match self {
            Self::Disabled => {}
            Self::Enabled(client) => match client.store.store(&envelope) {
                Ok(_) => client.drain_notify.notify_one(),
                Err(error) => {
                    courier_log::warn!(error = %error, "could not persist envelope");
                }
            },
        }
    }

    /// Flushes buffered items and drains the store within the timeout.
    ///
    /// Returns `true` when the queue was fully drained. A disabled client
    /// has nothing to flush and reports `true`.
    pub async fn flush(&self, timeout: Duration) -> bool {
        match self {
            Self::Disabled => true,
            Self::Enabled(client) => {
                let start = Instant::now();
                client.log_batcher.capture();

                // Wait until the captured batch is on disk before draining,
                // bounded by the same timeout budget.
                let (ack_tx, ack_rx) = oneshot::channel();
                if client.store_tx.send(StoreMessage::Barrier(ack_tx)).is_ok() {
                    tokio::time::timeout(timeout, ack_rx).await.ok();
                }

                let remaining = timeout.saturating_sub(start.elapsed());
                client.transport.flush(remaining).await
            }
        }
    }

    /// Flushes with the configured shutdown timeout.
    ///
    /// After the timeout, pending in-memory items may be dropped; envelopes
    /// already on disk are delivered on the next launch instead.
    pub async fn close(&self) -> bool {
        match self {
            Self::Disabled => true,
            Self::Enabled(client) => self.flush(client.config.shutdown_timeout()).await,
        }
    }

    /// Returns the session state slots of an enabled client.
    pub fn sessions(&self) -> Option<&SessionStore> {
        match self {
            Self::Disabled => None,
            Self::Enabled(client) => Some(&client.sessions),
        }
    }

    /// Returns the envelope store of an enabled client.
    pub fn store(&self) -> Option<&Arc<EnvelopeStore>> {
        match self {
            Self::Disabled => None,
            Self::Enabled(client) => Some(&client.store),
        }
    }
}

fn default_cache_dir(dsn: &Dsn) -> PathBuf {
    std::env::temp_dir()
        .join("courier")
        .join(dsn.project_id().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU16, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use courier_transport::SendResponse;

    use crate::LogLevel;

    use super::*;

    #[derive(Default)]
    struct RecordingSender {
        status: AtomicU16,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EnvelopeSender for RecordingSender {
        fn is_ready(&self) -> bool {
            true
        }

        async fn send_envelope(&self, body: Vec<u8>) -> Result<SendResponse, SendError> {
            self.sent
                .lock()
                .push(String::from_utf8_lossy(&body).into_owned());
            let status = match self.status.load(Ordering::Relaxed) {
                0 => 200,
                status => status,
            };
            Ok(SendResponse::with_status(status))
        }
    }

    fn test_options(dir: &std::path::Path) -> Options {
        let mut config = Config::default();
        config.set_cache_directory(dir.to_owned());

        Options {
            dsn: Some("https://key@ingest.example.com/42".to_owned()),
            environment: Some("test".to_owned()),
            config,
            ..Default::default()
        }
    }

    fn enabled_client(dir: &std::path::Path, sender: Arc<RecordingSender>) -> Client {
        let options = test_options(dir);
        let dsn: Dsn = options.dsn.clone().unwrap().parse().unwrap();
        Client::init_with_sender(options, &dsn, sender).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_without_dsn() {
        let client = Client::init(Options::default()).unwrap();

        assert!(!client.is_enabled());
        client.capture_log(
            TelemetryLog::new(LogLevel::Info, "dropped"),
            &ScopeSnapshot::default(),
        );
        client.capture_envelope(Envelope::new(None));
        assert!(client.flush(Duration::from_millis(10)).await);
        assert!(client.close().await);
    }

    #[tokio::test]
    async fn test_capture_envelope_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let sender = Arc::new(RecordingSender::default());
        let client = enabled_client(dir.path(), Arc::clone(&sender));

        let mut envelope = Envelope::new(Some(courier_base::EventId::new()));
        let mut item = Item::new(ItemType::Event);
        item.set_payload(ContentType::Json, "{\"message\":\"boom\"}");
        envelope.add_item(item);
        client.capture_envelope(envelope);

        assert!(client.flush(Duration::from_secs(5)).await);
        assert_eq!(client.store().unwrap().envelope_count().unwrap(), 0);

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"message\":\"boom\""));
    }

    #[tokio::test]
    async fn test_capture_log_batches_into_log_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let sender = Arc::new(RecordingSender::default());
        let client = enabled_client(dir.path(), Arc::clone(&sender));

        client.capture_log(
            TelemetryLog::new(LogLevel::Info, "first"),
            &ScopeSnapshot::default(),
        );
        client.capture_log(
            TelemetryLog::new(LogLevel::Warn, "second"),
            &ScopeSnapshot::default(),
        );

        // flush captures the pending batch and drains it
        assert!(client.flush(Duration::from_secs(5)).await);

        let sent = sender.sent.lock();
        let body = sent.iter().find(|body| body.contains("\"type\":\"log\"")).unwrap();
        assert!(body.contains("\"item_count\":2"));
        assert!(body.contains("\"body\":\"first\""));
        assert!(body.contains("\"body\":\"second\""));
        // injected defaults made it through the batcher
        assert!(body.contains("\"environment\""));
    }

    #[tokio::test]
    async fn test_stored_envelopes_survive_for_next_launch() {
        let dir = tempfile::tempdir().unwrap();

        // a client whose uploads permanently fail with server errors
        let failing = Arc::new(RecordingSender::default());
        failing.status.store(503, Ordering::Relaxed);
        let client = enabled_client(dir.path(), Arc::clone(&failing));

        let mut envelope = Envelope::new(Some(courier_base::EventId::new()));
        let mut item = Item::new(ItemType::Event);
        item.set_payload(ContentType::Json, "{}");
        envelope.add_item(item);
        client.capture_envelope(envelope);

        assert!(!client.flush(Duration::from_secs(5)).await);
        assert_eq!(client.store().unwrap().envelope_count().unwrap(), 1);

        // the next launch drains the leftover envelope
        let sender = Arc::new(RecordingSender::default());
        let client = enabled_client(dir.path(), Arc::clone(&sender));
        assert!(client.flush(Duration::from_secs(5)).await);
        assert_eq!(client.store().unwrap().envelope_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_slots_available() {
        let dir = tempfile::tempdir().unwrap();
        let sender = Arc::new(RecordingSender::default());
        let client = enabled_client(dir.path(), sender);

        let sessions = client.sessions().unwrap();
        sessions.write_current_session(b"{\"status\":\"ok\"}").unwrap();
        assert!(sessions.read_current_session().unwrap().is_some());
    }
}
