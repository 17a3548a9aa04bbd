use std::borrow::{Borrow, Cow};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use courier_base::{DataCategory, EventId};

/// The MIME content type of an envelope request body.
pub const CONTENT_TYPE: &str = "application/x-sentry-envelope";

/// An error returned from envelope parsing or serialization.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload of an item ended before its declared length.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The byte stream does not start with an envelope header.
    #[error("missing envelope header")]
    MissingHeader,
    /// A header or payload was not terminated by a newline.
    #[error("missing newline after header or payload")]
    MissingNewline,
    /// The envelope header is not valid JSON.
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    /// An item header is not valid JSON.
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
    /// A header failed to serialize.
    #[error("failed to write header")]
    HeaderIoFailed(#[source] serde_json::Error),
    /// A payload failed to write out.
    #[error("failed to write payload")]
    PayloadIoFailed(#[source] io::Error),
}

/// The type of an envelope item.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ItemType {
    /// Event payload encoded in JSON.
    Event,
    /// Transaction event payload encoded in JSON.
    Transaction,
    /// Session update data.
    Session,
    /// Aggregated session data.
    Sessions,
    /// Raw payload of an arbitrary attachment.
    Attachment,
    /// User feedback encoded as JSON.
    UserFeedback,
    /// Profiling data.
    Profile,
    /// A batch of structured log items.
    Log,
    /// Client-side accounting of discarded telemetry.
    ClientReport,
    /// A new item type that is not known by this SDK version.
    ///
    /// Unknown items are carried through unchanged so older SDK cores can
    /// forward telemetry produced by newer instrumentation.
    Unknown(String),
}

impl ItemType {
    /// Returns the item type corresponding to the given wire name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "event" => Self::Event,
            "transaction" => Self::Transaction,
            "session" => Self::Session,
            "sessions" => Self::Sessions,
            "attachment" => Self::Attachment,
            "user_feedback" => Self::UserFeedback,
            "profile" => Self::Profile,
            "log" => Self::Log,
            "client_report" => Self::ClientReport,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns the wire name of this item type.
    pub fn name(&self) -> &str {
        match self {
            Self::Event => "event",
            Self::Transaction => "transaction",
            Self::Session => "session",
            Self::Sessions => "sessions",
            Self::Attachment => "attachment",
            Self::UserFeedback => "user_feedback",
            Self::Profile => "profile",
            Self::Log => "log",
            Self::ClientReport => "client_report",
            Self::Unknown(name) => name,
        }
    }

    /// Returns the data category used to rate limit items of this type.
    ///
    /// Client reports and unknown items do not map to a category and are
    /// never rate limited.
    pub fn category(&self) -> Option<DataCategory> {
        match self {
            Self::Event => Some(DataCategory::Error),
            Self::Transaction => Some(DataCategory::Transaction),
            Self::Session | Self::Sessions => Some(DataCategory::Session),
            Self::Attachment => Some(DataCategory::Attachment),
            Self::UserFeedback => Some(DataCategory::Feedback),
            Self::Profile => Some(DataCategory::Profile),
            Self::Log => Some(DataCategory::LogItem),
            Self::ClientReport => None,
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ItemType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ItemType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = Cow::<'_, str>::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Payload content types.
///
/// This is an optimized enum intended to reduce allocations for common
/// content types.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ContentType {
    /// text/plain
    Text,
    /// application/json
    Json,
    /// application/x-msgpack
    MsgPack,
    /// application/octet-stream
    OctetStream,
    /// application/x-sentry-envelope
    Envelope,
    /// Any arbitrary content type not listed explicitly.
    Other(String),
}

impl ContentType {
    /// Returns the MIME string of this content type.
    #[inline]
    pub fn as_str(&self) -> &str {
        match *self {
            Self::Text => "text/plain",
            Self::Json => "application/json",
            Self::MsgPack => "application/x-msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Envelope => self::CONTENT_TYPE,
            Self::Other(ref other) => other,
        }
    }

    fn from_str(ct: &str) -> Option<Self> {
        if ct.eq_ignore_ascii_case(Self::Text.as_str()) {
            Some(Self::Text)
        } else if ct.eq_ignore_ascii_case(Self::Json.as_str()) {
            Some(Self::Json)
        } else if ct.eq_ignore_ascii_case(Self::MsgPack.as_str()) {
            Some(Self::MsgPack)
        } else if ct.eq_ignore_ascii_case(Self::OctetStream.as_str()) {
            Some(Self::OctetStream)
        } else if ct.eq_ignore_ascii_case(Self::Envelope.as_str()) {
            Some(Self::Envelope)
        } else {
            None
        }
    }
}

impl From<String> for ContentType {
    fn from(mut content_type: String) -> Self {
        Self::from_str(&content_type).unwrap_or_else(|| {
            content_type.make_ascii_lowercase();
            ContentType::Other(content_type)
        })
    }
}

impl From<&'_ str> for ContentType {
    fn from(content_type: &str) -> Self {
        Self::from_str(content_type)
            .unwrap_or_else(|| ContentType::Other(content_type.to_ascii_lowercase()))
    }
}

impl Serialize for ContentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let content_type = Cow::<'_, str>::deserialize(deserializer)?;
        Ok(Self::from_str(&content_type)
            .unwrap_or_else(|| ContentType::Other(content_type.into_owned())))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ItemHeaders {
    /// The type of the item.
    #[serde(rename = "type")]
    ty: ItemType,

    /// Content length of the item.
    ///
    /// Can be omitted if the item does not contain new lines. In this case,
    /// the item payload is parsed until the first newline is encountered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,

    /// Content type of the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<ContentType>,

    /// If this is an attachment item, this may contain the original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,

    /// The number of telemetry items contained in the payload.
    ///
    /// Only set for container payloads such as log batches, where one item
    /// carries many logical telemetry records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_count: Option<u32>,

    /// Other attributes for forward compatibility.
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

/// A single item of an envelope: typed headers plus an opaque payload.
///
/// The declared `length` header always equals the payload's byte count; it is
/// computed when the payload is set and can never be supplied by a caller.
#[derive(Clone, Debug)]
pub struct Item {
    headers: ItemHeaders,
    payload: Bytes,
}

impl Item {
    /// Creates a new item with the given type and an empty payload.
    pub fn new(ty: ItemType) -> Self {
        Self {
            headers: ItemHeaders {
                ty,
                length: Some(0),
                content_type: None,
                filename: None,
                item_count: None,
                other: BTreeMap::new(),
            },
            payload: Bytes::new(),
        }
    }

    /// Returns the `ItemType` of this item.
    pub fn ty(&self) -> &ItemType {
        &self.headers.ty
    }

    /// Returns the data category used to rate limit this item.
    pub fn category(&self) -> Option<DataCategory> {
        self.headers.ty.category()
    }

    /// Returns the length of this item's payload.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if this item's payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the content type of this item's payload.
    pub fn content_type(&self) -> Option<&ContentType> {
        self.headers.content_type.as_ref()
    }

    /// Returns the payload of this item.
    ///
    /// Envelope payloads are ref-counted. The bytes object is a reference to
    /// the original data, but cannot be used to mutate data in this envelope.
    /// In order to change data, use [`set_payload`](Self::set_payload).
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Sets the payload and content-type of this item.
    ///
    /// The length header is computed from the payload, which keeps the
    /// "header length equals payload length" invariant structural. Payloads
    /// longer than what the length header can express are truncated.
    pub fn set_payload<B>(&mut self, content_type: ContentType, payload: B)
    where
        B: Into<Bytes>,
    {
        let mut payload = payload.into();

        let length = std::cmp::min(u32::MAX as usize, payload.len());
        payload.truncate(length);

        self.headers.length = Some(length as u32);
        self.headers.content_type = Some(content_type);
        self.payload = payload;
    }

    /// Returns the file name of this item, if it is an attachment.
    pub fn filename(&self) -> Option<&str> {
        self.headers.filename.as_deref()
    }

    /// Sets the file name of this item.
    pub fn set_filename<S>(&mut self, filename: S)
    where
        S: Into<String>,
    {
        self.headers.filename = Some(filename.into());
    }

    /// Returns the number of telemetry records in a container payload.
    pub fn item_count(&self) -> Option<u32> {
        self.headers.item_count
    }

    /// Sets the number of telemetry records in a container payload.
    pub fn set_item_count(&mut self, count: u32) {
        self.headers.item_count = Some(count);
    }

    /// Returns the specified header value, if present.
    pub fn get_header<K>(&self, name: &K) -> Option<&Value>
    where
        String: Borrow<K>,
        K: Ord + ?Sized,
    {
        self.headers.other.get(name)
    }

    /// Sets the specified header value, returning the previous one if present.
    pub fn set_header<S, V>(&mut self, name: S, value: V) -> Option<Value>
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.headers.other.insert(name.into(), value.into())
    }
}

/// The items of an envelope.
pub type Items = SmallVec<[Item; 3]>;
/// Iterator over the items of an envelope.
pub type ItemIter<'a> = std::slice::Iter<'a, Item>;

/// A summary of the trace the envelope's items were captured in.
///
/// Carried in the envelope header for server-side dynamic sampling. All
/// fields are optional; unknown fields are preserved.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TraceSummary {
    /// The originating trace id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// The public key of the DSN that captured the trace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// The release of the app that captured the trace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// The environment of the app that captured the trace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Other attributes for forward compatibility.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct EnvelopeHeaders {
    /// Unique identifier of the event associated to this envelope.
    ///
    /// Envelopes without contained events do not contain an event id. This is
    /// for instance the case for session updates or standalone log batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<EventId>,

    /// Timestamp when the envelope was sent, according to the SDK.
    ///
    /// This can be used by the server to perform drift correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,

    /// Trace context associated with the envelope's items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<TraceSummary>,

    /// Other attributes for forward compatibility.
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

/// A container for telemetry payloads sent in a single transmission.
///
/// An envelope carries optional headers and an ordered sequence of typed
/// items. Item order is preserved end-to-end; by convention the primary
/// payload (event, session) comes first.
#[derive(Clone, Debug)]
pub struct Envelope {
    headers: EnvelopeHeaders,
    items: Items,
}

impl Envelope {
    /// Creates an empty envelope with the given event id.
    pub fn new(event_id: Option<EventId>) -> Self {
        Self {
            headers: EnvelopeHeaders {
                event_id,
                sent_at: None,
                trace: None,
                other: BTreeMap::new(),
            },
            items: Items::new(),
        }
    }

    /// Parses an envelope from bytes.
    pub fn parse_bytes(bytes: Bytes) -> Result<Self, EnvelopeError> {
        let (headers, offset) = Self::parse_headers(&bytes)?;
        let items = Self::parse_items(&bytes, offset)?;

        Ok(Envelope { headers, items })
    }

    /// Returns the number of items in this envelope.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if this envelope does not contain any items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Unique identifier of the event associated to this envelope.
    ///
    /// It is permissible for envelopes to not contain event bound information
    /// such as session data, in which case this returns `None`.
    pub fn event_id(&self) -> Option<EventId> {
        self.headers.event_id
    }

    /// When the envelope was sent, according to the SDK.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.headers.sent_at
    }

    /// Sets the timestamp at which the envelope is sent.
    pub fn set_sent_at(&mut self, sent_at: DateTime<Utc>) {
        self.headers.sent_at = Some(sent_at);
    }

    /// Returns the trace summary of this envelope, if present.
    pub fn trace(&self) -> Option<&TraceSummary> {
        self.headers.trace.as_ref()
    }

    /// Sets the trace summary of this envelope.
    pub fn set_trace(&mut self, trace: TraceSummary) {
        self.headers.trace = Some(trace);
    }

    /// Returns the specified header value, if present.
    pub fn get_header<K>(&self, name: &K) -> Option<&Value>
    where
        String: Borrow<K>,
        K: Ord + ?Sized,
    {
        self.headers.other.get(name)
    }

    /// Sets the specified header value, returning the previous one if present.
    pub fn set_header<S, V>(&mut self, name: S, value: V) -> Option<Value>
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.headers.other.insert(name.into(), value.into())
    }

    /// Returns an iterator over items in this envelope.
    pub fn items(&self) -> ItemIter<'_> {
        self.items.iter()
    }

    /// Returns a reference to the first item matching the predicate.
    pub fn get_item_by<F>(&self, mut pred: F) -> Option<&Item>
    where
        F: FnMut(&Item) -> bool,
    {
        self.items().find(|item| pred(item))
    }

    /// Removes and returns the first item that matches the given condition.
    pub fn take_item_by<F>(&mut self, cond: F) -> Option<Item>
    where
        F: FnMut(&Item) -> bool,
    {
        let index = self.items.iter().position(cond);
        index.map(|index| self.items.remove(index))
    }

    /// Adds a new item to the end of this envelope.
    pub fn add_item(&mut self, item: Item) {
        self.items.push(item)
    }

    /// Retains only the items specified by the predicate.
    ///
    /// In other words, remove all items where `f(&item)` returns `false`.
    /// This method operates in place and preserves the order of the retained
    /// items.
    pub fn retain_items<F>(&mut self, f: F)
    where
        F: FnMut(&mut Item) -> bool,
    {
        self.items.retain(f)
    }

    /// Serializes this envelope into the given writer.
    pub fn serialize<W>(&self, mut writer: W) -> Result<(), EnvelopeError>
    where
        W: Write,
    {
        serde_json::to_writer(&mut writer, &self.headers).map_err(EnvelopeError::HeaderIoFailed)?;
        Self::write(&mut writer, b"\n")?;

        for item in &self.items {
            serde_json::to_writer(&mut writer, &item.headers)
                .map_err(EnvelopeError::HeaderIoFailed)?;
            Self::write(&mut writer, b"\n")?;

            Self::write(&mut writer, &item.payload)?;
            Self::write(&mut writer, b"\n")?;
        }

        Ok(())
    }

    /// Serializes this envelope into a buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut vec = Vec::with_capacity(self.approximate_size());
        self.serialize(&mut vec)?;
        Ok(vec)
    }

    /// Returns a lower bound for the serialized size of this envelope.
    fn approximate_size(&self) -> usize {
        // Payload bytes plus newline framing; headers come on top.
        self.items
            .iter()
            .map(|item| item.len() + 2)
            .sum::<usize>()
            + 2
    }

    fn parse_headers<M>(slice: &[u8]) -> Result<(M, usize), EnvelopeError>
    where
        M: DeserializeOwned,
    {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let headers = match stream.next() {
            None => return Err(EnvelopeError::MissingHeader),
            Some(Err(error)) => return Err(EnvelopeError::InvalidHeader(error)),
            Some(Ok(headers)) => headers,
        };

        // Each header is terminated by a UNIX newline.
        Self::require_termination(slice, stream.byte_offset())?;

        Ok((headers, stream.byte_offset() + 1))
    }

    fn parse_items(bytes: &Bytes, mut offset: usize) -> Result<Items, EnvelopeError> {
        let mut items = Items::new();

        while offset < bytes.len() {
            let (item, item_size) = Self::parse_item(bytes.slice(offset..))?;
            offset += item_size;
            items.push(item);
        }

        Ok(items)
    }

    fn parse_item(bytes: Bytes) -> Result<(Item, usize), EnvelopeError> {
        let slice = bytes.as_ref();
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let headers: ItemHeaders = match stream.next() {
            None => return Err(EnvelopeError::UnexpectedEof),
            Some(Err(error)) => return Err(EnvelopeError::InvalidItemHeader(error)),
            Some(Ok(headers)) => headers,
        };

        // Each header is terminated by a UNIX newline.
        let headers_end = stream.byte_offset();
        Self::require_termination(slice, headers_end)?;

        // The last header does not require a trailing newline, so
        // `payload_start` may point past the end of the buffer.
        let payload_start = std::cmp::min(headers_end + 1, bytes.len());
        let payload_end = match headers.length {
            Some(len) => {
                let payload_end = payload_start + len as usize;
                if bytes.len() < payload_end {
                    return Err(EnvelopeError::UnexpectedEof);
                }

                // Each payload is terminated by a UNIX newline.
                Self::require_termination(slice, payload_end)?;
                payload_end
            }
            None => match bytes[payload_start..].iter().position(|b| *b == b'\n') {
                Some(relative_end) => payload_start + relative_end,
                None => bytes.len(),
            },
        };

        let payload = bytes.slice(payload_start..payload_end);
        let item = Item { headers, payload };

        Ok((item, payload_end + 1))
    }

    fn require_termination(slice: &[u8], offset: usize) -> Result<(), EnvelopeError> {
        match slice.get(offset) {
            Some(&b'\n') | None => Ok(()),
            Some(_) => Err(EnvelopeError::MissingNewline),
        }
    }

    fn write<W>(mut writer: W, buf: &[u8]) -> Result<(), EnvelopeError>
    where
        W: Write,
    {
        writer.write_all(buf).map_err(EnvelopeError::PayloadIoFailed)
    }
}
