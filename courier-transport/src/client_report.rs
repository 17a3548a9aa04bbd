use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use courier_base::DataCategory;
use courier_common::UnixTimestamp;
use courier_envelope::{ContentType, Item, ItemType};

/// The reason an item was deliberately not delivered.
///
/// Lost events are not failures: they are counted and reported back to the
/// server for client-side observability.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The item's category was rate limited by the server.
    RatelimitBackoff,
    /// The item was permanently rejected or could not be delivered.
    NetworkError,
    /// The in-memory queue overflowed.
    QueueOverflow,
    /// The on-disk cache evicted the item before delivery.
    CacheOverflow,
    /// A `before_send` callback dropped the item.
    BeforeSend,
}

#[derive(Serialize)]
struct DiscardedEvent {
    reason: DiscardReason,
    category: DataCategory,
    quantity: u32,
}

#[derive(Serialize)]
struct ClientReport {
    timestamp: UnixTimestamp,
    discarded_events: Vec<DiscardedEvent>,
}

/// Aggregates lost events and flushes them as client report items.
///
/// Quantities are summed per `(reason, category)` pair. The aggregate is
/// drained into an envelope item that rides along with the next outgoing
/// envelope; losing a report to a failed send is accepted, since client
/// reports are best-effort telemetry about telemetry.
#[derive(Debug, Default)]
pub struct ClientReportRecorder {
    discarded: Mutex<BTreeMap<(DiscardReason, DataCategory), u32>>,
}

impl ClientReportRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a single lost event.
    pub fn record_lost_event(&self, reason: DiscardReason, category: DataCategory) {
        self.record_lost(reason, category, 1);
    }

    /// Records lost events with an explicit quantity.
    pub fn record_lost(&self, reason: DiscardReason, category: DataCategory, quantity: u32) {
        if quantity == 0 {
            return;
        }

        let mut discarded = self.discarded.lock();
        *discarded.entry((reason, category)).or_insert(0) += quantity;
    }

    /// Returns whether any lost events are waiting to be reported.
    pub fn has_pending(&self) -> bool {
        !self.discarded.lock().is_empty()
    }

    /// Drains the aggregate into a client report envelope item.
    ///
    /// Returns `None` when nothing was recorded since the last flush.
    pub fn flush_report(&self) -> Option<Item> {
        let discarded = std::mem::take(&mut *self.discarded.lock());
        if discarded.is_empty() {
            return None;
        }

        let report = ClientReport {
            timestamp: UnixTimestamp::now(),
            discarded_events: discarded
                .into_iter()
                .map(|((reason, category), quantity)| DiscardedEvent {
                    reason,
                    category,
                    quantity,
                })
                .collect(),
        };

        let payload = match serde_json::to_vec(&report) {
            Ok(payload) => payload,
            Err(error) => {
                courier_log::error!(error = %error, "failed to serialize client report");
                return None;
            }
        };

        let mut item = Item::new(ItemType::ClientReport);
        item.set_payload(ContentType::Json, payload);
        Some(item)
    }
}
