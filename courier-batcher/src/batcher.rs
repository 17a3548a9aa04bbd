use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{AttributeValue, ScopeSnapshot};

/// An item that can be accumulated by the [`ItemBatcher`].
///
/// Items carry a mutable attribute map that the batcher enriches before
/// buffering, and receive the trace id of the scope they were captured in.
pub trait BatchItem: Serialize + Send + 'static {
    /// Returns the mutable attribute map of this item.
    fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttributeValue>;

    /// Associates the item with the trace it was captured in.
    fn set_trace_id(&mut self, trace_id: String);
}

/// A callback filtering or transforming items before they are buffered.
///
/// Returning `None` drops the item silently: it is neither counted nor
/// buffered.
pub type BeforeSendItem<I> = Box<dyn Fn(I) -> Option<I> + Send + Sync>;

/// Provides a stable installation id used as the fallback `user.id`.
pub type InstallationIdProvider = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// The downstream boundary of the batcher.
///
/// Receives the serialized batch payload and the number of items in it. The
/// batcher does not know about HTTP or disk; whatever durability the payload
/// needs must happen behind this callback.
pub type CaptureSink = Box<dyn Fn(Bytes, usize) + Send + Sync>;

/// Configuration of an [`ItemBatcher`].
#[derive(Clone, Debug)]
pub struct BatcherConfig {
    /// The environment reported on every item.
    pub environment: String,
    /// The release reported on every item, if known.
    pub release: Option<String>,
    /// Inactivity timeout after which a non-empty buffer flushes.
    pub flush_timeout: Duration,
    /// Number of buffered items that triggers an immediate flush.
    pub max_item_count: usize,
    /// Serialized buffer size in bytes that triggers an immediate flush.
    pub max_buffer_size_bytes: usize,
}

struct BufferState {
    /// Each item is encoded separately; a flush joins them into one payload.
    encoded_items: Vec<Vec<u8>>,
    encoded_size: usize,
    /// Bumped on every flush. The auto-flush timer records the generation it
    /// was armed for and becomes a no-op if the buffer was consumed by
    /// another flush in the meantime. Timer cancellation alone would be racy:
    /// the timer task may already be past the point of cancellation.
    generation: u64,
    timer_armed_for: Option<u64>,
}

struct Inner<I> {
    config: BatcherConfig,
    before_send: Option<BeforeSendItem<I>>,
    installation_id: Option<InstallationIdProvider>,
    sink: CaptureSink,
    handle: tokio::runtime::Handle,
    state: Mutex<BufferState>,
}

/// Accumulates telemetry items and flushes them in batches.
///
/// All buffer mutation is serialized through an internal lock, so `add` may
/// be called from arbitrary threads. The auto-flush timer runs on the tokio
/// runtime whose handle was passed at construction.
///
/// Cloning the batcher is cheap and yields a handle to the same buffer.
pub struct ItemBatcher<I: BatchItem> {
    inner: Arc<Inner<I>>,
}

impl<I: BatchItem> Clone for ItemBatcher<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: BatchItem> ItemBatcher<I> {
    /// Creates a new batcher flushing into the given capture sink.
    pub fn new(config: BatcherConfig, handle: tokio::runtime::Handle, sink: CaptureSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                before_send: None,
                installation_id: None,
                sink,
                handle,
                state: Mutex::new(BufferState {
                    encoded_items: Vec::new(),
                    encoded_size: 0,
                    generation: 0,
                    timer_armed_for: None,
                }),
            }),
        }
    }

    /// Installs a `before_send` callback filtering items before buffering.
    ///
    /// Must be called before the batcher is shared.
    pub fn with_before_send(mut self, before_send: BeforeSendItem<I>) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("batcher already shared");
        inner.before_send = Some(before_send);
        self
    }

    /// Installs a provider for the fallback `user.id` attribute.
    ///
    /// Must be called before the batcher is shared.
    pub fn with_installation_id(mut self, provider: InstallationIdProvider) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("batcher already shared");
        inner.installation_id = Some(provider);
        self
    }

    /// Enriches an item with scope data and adds it to the buffer.
    ///
    /// Flushes immediately when the buffer reaches the item count cap or the
    /// byte size cap. A single item larger than the byte cap is still
    /// accepted and flushes as a batch of one. The first item entering an
    /// empty buffer arms the inactivity flush timer.
    pub fn add(&self, mut item: I, scope: &ScopeSnapshot) {
        self.inner.enrich(&mut item, scope);

        if let Some(before_send) = &self.inner.before_send {
            match before_send(item) {
                Some(processed) => item = processed,
                None => return,
            }
        }

        let encoded = match serde_json::to_vec(&item) {
            Ok(encoded) => encoded,
            Err(error) => {
                courier_log::error!(error = %error, "failed to encode item");
                return;
            }
        };

        let mut timer = None;
        let flushed = {
            let mut state = self.inner.state.lock();

            let was_empty = state.encoded_items.is_empty();
            state.encoded_size += encoded.len();
            state.encoded_items.push(encoded);

            if state.encoded_items.len() >= self.inner.config.max_item_count
                || state.encoded_size >= self.inner.config.max_buffer_size_bytes
            {
                Inner::<I>::take_batch(&mut state)
            } else {
                if was_empty && state.timer_armed_for.is_none() {
                    state.timer_armed_for = Some(state.generation);
                    timer = Some(state.generation);
                }
                None
            }
        };

        if let Some(generation) = timer {
            self.arm_timer(generation);
        }

        if let Some((payload, count)) = flushed {
            (self.inner.sink)(payload, count);
        }
    }

    /// Flushes all buffered items synchronously.
    ///
    /// Returns `true` when a batch was handed to the sink, `false` when the
    /// buffer was empty. Invalidates any armed auto-flush timer, so a timer
    /// firing concurrently with this call cannot produce a second flush.
    pub fn capture(&self) -> bool {
        let flushed = {
            let mut state = self.inner.state.lock();
            Inner::<I>::take_batch(&mut state)
        };

        match flushed {
            Some((payload, count)) => {
                (self.inner.sink)(payload, count);
                true
            }
            None => false,
        }
    }

    fn arm_timer(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.flush_timeout;

        self.inner.handle.spawn(async move {
            tokio::time::sleep(timeout).await;

            let flushed = {
                let mut state = inner.state.lock();
                if state.generation != generation {
                    // another flush consumed the buffer first
                    return;
                }
                courier_log::debug!("flush timer fired");
                Inner::<I>::take_batch(&mut state)
            };

            if let Some((payload, count)) = flushed {
                (inner.sink)(payload, count);
            }
        });
    }
}

impl<I: BatchItem> Inner<I> {
    /// Swaps out the buffer contents for serialization.
    ///
    /// Always advances the generation and disarms the timer, even when the
    /// buffer is empty, so a flush on an empty buffer stays a no-op while
    /// still invalidating stale timers.
    fn take_batch(state: &mut BufferState) -> Option<(Bytes, usize)> {
        state.generation += 1;
        state.timer_armed_for = None;

        if state.encoded_items.is_empty() {
            return None;
        }

        let items = mem::take(&mut state.encoded_items);
        let size = mem::take(&mut state.encoded_size);

        let mut payload = Vec::with_capacity(size + items.len() + 16);
        payload.extend_from_slice(b"{\"items\":[");
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                payload.push(b',');
            }
            payload.extend_from_slice(item);
        }
        payload.extend_from_slice(b"]}");

        Some((Bytes::from(payload), items.len()))
    }

    fn enrich(&self, item: &mut I, scope: &ScopeSnapshot) {
        if let Some(trace_id) = &scope.trace_id {
            item.set_trace_id(trace_id.clone());
        }

        let attributes = item.attributes_mut();

        // Item-supplied attributes always win; defaults only fill gaps, and
        // absent defaults are omitted entirely.
        set_default(attributes, "sdk.name", Some(courier_base::SDK_NAME.into()));
        set_default(
            attributes,
            "sdk.version",
            Some(courier_base::SDK_VERSION.into()),
        );
        set_default(
            attributes,
            "environment",
            Some(self.config.environment.as_str().into()),
        );
        set_default(
            attributes,
            "release",
            self.config.release.as_deref().map(Into::into),
        );
        set_default(
            attributes,
            "trace.parent_span_id",
            scope.span_id.as_deref().map(Into::into),
        );

        set_default(attributes, "os.name", scope.os_name.as_deref().map(Into::into));
        set_default(
            attributes,
            "os.version",
            scope.os_version.as_deref().map(Into::into),
        );

        set_default(
            attributes,
            "device.brand",
            scope.device_brand.as_deref().map(Into::into),
        );
        set_default(
            attributes,
            "device.model",
            scope.device_model.as_deref().map(Into::into),
        );
        set_default(
            attributes,
            "device.family",
            scope.device_family.as_deref().map(Into::into),
        );

        if let Some(user) = &scope.user {
            set_default(attributes, "user.id", user.id.as_deref().map(Into::into));
            set_default(attributes, "user.name", user.name.as_deref().map(Into::into));
            set_default(
                attributes,
                "user.email",
                user.email.as_deref().map(Into::into),
            );
        }

        set_default(
            attributes,
            "replay_id",
            scope.replay_id.as_deref().map(Into::into),
        );

        for (key, value) in &scope.attributes {
            set_default(attributes, key, Some(value.clone()));
        }

        // Identify the install when neither the caller nor the scope did.
        let has_user = attributes.contains_key("user.id")
            || attributes.contains_key("user.name")
            || attributes.contains_key("user.email");
        if !has_user {
            if let Some(installation_id) = self.installation_id.as_ref().and_then(|f| f()) {
                attributes.insert("user.id".to_owned(), installation_id.into());
            }
        }
    }
}

fn set_default(
    attributes: &mut BTreeMap<String, AttributeValue>,
    key: &str,
    value: Option<AttributeValue>,
) {
    if let Some(value) = value {
        if !attributes.contains_key(key) {
            attributes.insert(key.to_owned(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::ScopeUser;

    #[derive(Serialize)]
    struct TestItem {
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        attributes: BTreeMap<String, AttributeValue>,
    }

    impl TestItem {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_owned(),
                trace_id: None,
                attributes: BTreeMap::new(),
            }
        }
    }

    impl BatchItem for TestItem {
        fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttributeValue> {
            &mut self.attributes
        }

        fn set_trace_id(&mut self, trace_id: String) {
            self.trace_id = Some(trace_id);
        }
    }

    type Batches = Arc<Mutex<Vec<(Bytes, usize)>>>;

    fn config() -> BatcherConfig {
        BatcherConfig {
            environment: "production".to_owned(),
            release: Some("app@1.2.3".to_owned()),
            flush_timeout: Duration::from_secs(5),
            max_item_count: 100,
            max_buffer_size_bytes: 1024 * 1024,
        }
    }

    fn batcher_with_sink(config: BatcherConfig) -> (ItemBatcher<TestItem>, Batches) {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let sink_batches = Arc::clone(&batches);

        let batcher = ItemBatcher::new(
            config,
            tokio::runtime::Handle::current(),
            Box::new(move |payload, count| {
                sink_batches.lock().push((payload, count));
            }),
        );

        (batcher, batches)
    }

    #[tokio::test]
    async fn test_count_cap_boundary() {
        let (batcher, batches) = batcher_with_sink(BatcherConfig {
            max_item_count: 5,
            ..config()
        });

        for i in 0..4 {
            batcher.add(TestItem::new(&format!("m{i}")), &ScopeSnapshot::default());
            assert!(batches.lock().is_empty(), "flushed before reaching the cap");
        }

        batcher.add(TestItem::new("m4"), &ScopeSnapshot::default());

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 5);
    }

    #[tokio::test]
    async fn test_byte_cap_flushes_oversized_item_alone() {
        let (batcher, batches) = batcher_with_sink(BatcherConfig {
            max_buffer_size_bytes: 64,
            ..config()
        });

        // far larger than the byte cap on its own
        let big_body = "x".repeat(1024);
        batcher.add(TestItem::new(&big_body), &ScopeSnapshot::default());

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 1);
        assert!(batches[0].0.len() > 1024);
    }

    #[tokio::test]
    async fn test_capture_empty_buffer_returns_false() {
        let (batcher, batches) = batcher_with_sink(config());

        assert!(!batcher.capture());
        assert!(batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_capture_flushes_buffer() {
        let (batcher, batches) = batcher_with_sink(config());

        batcher.add(TestItem::new("one"), &ScopeSnapshot::default());
        batcher.add(TestItem::new("two"), &ScopeSnapshot::default());

        assert!(batcher.capture());
        // a second capture has nothing left
        assert!(!batcher.capture());

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 2);

        let payload = String::from_utf8_lossy(&batches[0].0).into_owned();
        assert!(payload.starts_with("{\"items\":["));
        assert!(payload.ends_with("]}"));
        assert!(payload.contains("\"body\":\"one\""));
        assert!(payload.contains("\"body\":\"two\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_after_timeout() {
        let (batcher, batches) = batcher_with_sink(BatcherConfig {
            flush_timeout: Duration::from_secs(5),
            ..config()
        });

        batcher.add(TestItem::new("delayed"), &ScopeSnapshot::default());
        assert!(batches.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_capture_invalidates_timer() {
        let (batcher, batches) = batcher_with_sink(BatcherConfig {
            flush_timeout: Duration::from_secs(5),
            ..config()
        });

        batcher.add(TestItem::new("raced"), &ScopeSnapshot::default());
        assert!(batcher.capture());

        // let the already-armed timer fire; it must be a no-op
        tokio::time::sleep(Duration::from_secs(10)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 1, "timer produced a second flush");
        assert_eq!(batches[0].1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearms_for_next_batch() {
        let (batcher, batches) = batcher_with_sink(BatcherConfig {
            flush_timeout: Duration::from_secs(5),
            ..config()
        });

        batcher.add(TestItem::new("first"), &ScopeSnapshot::default());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(batches.lock().len(), 1);

        // a new first item arms a fresh timer
        batcher.add(TestItem::new("second"), &ScopeSnapshot::default());
        tokio::time::sleep(Duration::from_secs(6)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].1, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_adds_flush_once() {
        let (batcher, batches) = batcher_with_sink(config());

        let threads: Vec<_> = (0..10)
            .map(|i| {
                let batcher = batcher.clone();
                std::thread::spawn(move || {
                    batcher.add(TestItem::new(&format!("t{i}")), &ScopeSnapshot::default());
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert!(batcher.capture());

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 10);

        // every item is present exactly once
        let payload = String::from_utf8_lossy(&batches[0].0).into_owned();
        for i in 0..10 {
            assert_eq!(payload.matches(&format!("\"body\":\"t{i}\"")).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_before_send_drops_items() {
        let (batcher, batches) = batcher_with_sink(config());
        let batcher = batcher.with_before_send(Box::new(|item: TestItem| {
            (item.body != "secret").then_some(item)
        }));

        batcher.add(TestItem::new("keep"), &ScopeSnapshot::default());
        batcher.add(TestItem::new("secret"), &ScopeSnapshot::default());

        assert!(batcher.capture());

        let batches = batches.lock();
        assert_eq!(batches[0].1, 1);
        assert!(!String::from_utf8_lossy(&batches[0].0).contains("secret"));
    }

    #[tokio::test]
    async fn test_enrichment_defaults_and_precedence() {
        let (batcher, batches) = batcher_with_sink(config());

        let mut item = TestItem::new("hello");
        item.attributes
            .insert("environment".to_owned(), "staging".into());

        let scope = ScopeSnapshot {
            trace_id: Some("4bf92f3577b34da6a3ce929d0e0e4736".to_owned()),
            os_name: Some("linux".to_owned()),
            user: Some(ScopeUser {
                id: Some("user-1".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };

        batcher.add(item, &scope);
        batcher.capture();

        let batches = batches.lock();
        let payload: serde_json::Value = serde_json::from_slice(&batches[0].0).unwrap();
        let item = &payload["items"][0];
        let attributes = &item["attributes"];

        // the item-supplied value wins over the injected default
        assert_eq!(attributes["environment"]["value"], "staging");
        // injected defaults fill the gaps
        assert_eq!(attributes["sdk.name"]["value"], "courier.rust");
        assert_eq!(attributes["release"]["value"], "app@1.2.3");
        assert_eq!(attributes["os.name"]["value"], "linux");
        assert_eq!(attributes["user.id"]["value"], "user-1");
        assert_eq!(item["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");

        // absent defaults are omitted, not serialized as null
        assert!(attributes.get("os.version").is_none());
        assert!(attributes.get("device.model").is_none());
    }

    #[tokio::test]
    async fn test_installation_id_only_without_user() {
        let (batcher, batches) = batcher_with_sink(config());
        let batcher =
            batcher.with_installation_id(Box::new(|| Some("install-123".to_owned())));

        batcher.add(TestItem::new("anonymous"), &ScopeSnapshot::default());

        let scope_with_user = ScopeSnapshot {
            user: Some(ScopeUser {
                email: Some("user@example.com".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };
        batcher.add(TestItem::new("identified"), &scope_with_user);

        batcher.capture();

        let batches = batches.lock();
        let payload: serde_json::Value = serde_json::from_slice(&batches[0].0).unwrap();

        let anonymous = &payload["items"][0]["attributes"];
        assert_eq!(anonymous["user.id"]["value"], "install-123");

        // a user identified via any user attribute keeps no installation id
        let identified = &payload["items"][1]["attributes"];
        assert_eq!(identified["user.email"]["value"], "user@example.com");
        assert!(identified.get("user.id").is_none());
    }

    #[tokio::test]
    async fn test_scope_attributes_do_not_override() {
        let (batcher, batches) = batcher_with_sink(config());

        let mut scope = ScopeSnapshot::default();
        scope
            .attributes
            .insert("feature".to_owned(), "from-scope".into());
        scope
            .attributes
            .insert("shared".to_owned(), "from-scope".into());

        let mut item = TestItem::new("hello");
        item.attributes
            .insert("shared".to_owned(), "from-item".into());

        batcher.add(item, &scope);
        batcher.capture();

        let batches = batches.lock();
        let payload: serde_json::Value = serde_json::from_slice(&batches[0].0).unwrap();
        let attributes = &payload["items"][0]["attributes"];

        assert_eq!(attributes["feature"]["value"], "from-scope");
        assert_eq!(attributes["shared"]["value"], "from-item");
    }
}
