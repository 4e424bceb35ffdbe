//! In-memory delivery queue state
//!
//! Holds queued items in insertion order and at most one in-flight chunk.
//! A chunk is remembered by insert id, so items appended or replaced while a
//! delivery is outstanding are never removed by its acknowledgement.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use diagsync_domain::QueueItem;
use uuid::Uuid;

/// How `push` stored an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// An earlier item with the same replace key was overwritten in place.
    Replaced,
}

/// The chunk handed to the sink and not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightBatch {
    pub ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct BatchQueue {
    items: VecDeque<QueueItem>,
    in_flight: Option<InFlightBatch>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted items, preserving their order.
    pub fn from_items(items: Vec<QueueItem>) -> Self {
        Self { items: items.into(), in_flight: None }
    }

    pub fn push(&mut self, item: QueueItem) -> PushOutcome {
        if let Some(key) = item.replace_key.as_deref() {
            let existing = self
                .items
                .iter_mut()
                .rev()
                .find(|queued| queued.replace_key.as_deref() == Some(key));
            if let Some(slot) = existing {
                *slot = item;
                return PushOutcome::Replaced;
            }
        }
        self.items.push_back(item);
        PushOutcome::Appended
    }

    /// Capture up to `max` items from the front as the in-flight chunk.
    ///
    /// Returns `None` while another chunk is outstanding or when empty.
    pub fn take_chunk(&mut self, max: usize) -> Option<Vec<QueueItem>> {
        if self.in_flight.is_some() || self.items.is_empty() || max == 0 {
            return None;
        }
        let chunk: Vec<QueueItem> = self.items.iter().take(max).cloned().collect();
        self.in_flight = Some(InFlightBatch {
            ids: chunk.iter().map(|item| item.insert_id).collect(),
            started_at: Utc::now(),
        });
        Some(chunk)
    }

    /// Remove exactly the items of the in-flight chunk. Returns how many were
    /// removed; replaced or already-gone items are skipped.
    pub fn acknowledge(&mut self) -> usize {
        let Some(batch) = self.in_flight.take() else {
            return 0;
        };
        let ids: HashSet<Uuid> = batch.ids.into_iter().collect();
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.insert_id));
        before - self.items.len()
    }

    /// Drop the in-flight marker and keep every item for a later retry.
    pub fn release(&mut self) -> Option<InFlightBatch> {
        self.in_flight.take()
    }

    pub fn in_flight(&self) -> Option<&InFlightBatch> {
        self.in_flight.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of every queued item in order, for persistence.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }
}
