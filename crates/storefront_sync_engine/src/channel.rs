//! Channel subscriptions and the live subscription set.

use crate::error::SyncResult;
use crate::transport::{ChangeFeedProvider, ChannelHandle, EventSink};
use std::fmt;
use storefront_sync_protocol::{EntityType, StreamFilter, StreamSpec};
use tracing::{debug, warn};

/// Engine-assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscription to one stream, as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Identifier used for `unsubscribe`.
    pub id: SubscriptionId,
    /// Stream name.
    pub stream_name: String,
    /// Collection watched.
    pub entity: EntityType,
    /// Single-key scope, if any.
    pub filter: Option<StreamFilter>,
    /// Whether a provider channel is currently open for it.
    pub active: bool,
}

struct Entry {
    id: SubscriptionId,
    spec: StreamSpec,
    sink: EventSink,
    handle: Option<ChannelHandle>,
}

impl Entry {
    fn record(&self) -> Subscription {
        Subscription {
            id: self.id,
            stream_name: self.spec.name.clone(),
            entity: self.spec.entity,
            filter: self.spec.filter.clone(),
            active: self.handle.is_some(),
        }
    }

    /// Releases the channel. A second call is a no-op.
    fn close<P: ChangeFeedProvider + ?Sized>(&mut self, provider: &P) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = provider.close_channel(handle) {
                warn!(stream = %self.spec.name, error = %e, "failed to close channel");
            } else {
                debug!(stream = %self.spec.name, id = %self.id, "channel closed");
            }
        }
    }
}

/// The live subscription set.
///
/// Every entry records the stream spec and sink it was opened with, so the
/// whole set can be replayed after a reconnect. An entry with an open
/// channel corresponds to exactly one provider handle.
#[derive(Default)]
pub struct SubscriptionSet {
    entries: Vec<Entry>,
    next_id: u64,
}

impl SubscriptionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel and records it.
    pub fn open<P: ChangeFeedProvider + ?Sized>(
        &mut self,
        provider: &P,
        spec: StreamSpec,
        sink: EventSink,
    ) -> SyncResult<Subscription> {
        let handle = provider.open_channel(&spec, sink.clone())?;
        self.next_id += 1;
        let entry = Entry {
            id: SubscriptionId(self.next_id),
            spec,
            sink,
            handle: Some(handle),
        };
        debug!(stream = %entry.spec, id = %entry.id, "channel opened");
        let record = entry.record();
        self.entries.push(entry);
        Ok(record)
    }

    /// Closes and forgets one subscription. Returns false if it was unknown.
    pub fn close<P: ChangeFeedProvider + ?Sized>(&mut self, provider: &P, id: SubscriptionId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let mut entry = self.entries.remove(index);
                entry.close(provider);
                true
            }
            None => false,
        }
    }

    /// Closes and forgets every subscription. Returns how many were recorded.
    pub fn close_all<P: ChangeFeedProvider + ?Sized>(&mut self, provider: &P) -> usize {
        let count = self.entries.len();
        for entry in &mut self.entries {
            entry.close(provider);
        }
        self.entries.clear();
        count
    }

    /// Replaces every channel with a freshly opened one.
    ///
    /// Stale handles are closed first. If any open fails, the channels opened
    /// by this call are closed again and every entry is left inactive, so no
    /// partial resubscription survives. The records themselves are kept for
    /// the next attempt.
    pub fn resubscribe<P: ChangeFeedProvider + ?Sized>(&mut self, provider: &P) -> SyncResult<usize> {
        for entry in &mut self.entries {
            entry.close(provider);
        }

        for index in 0..self.entries.len() {
            let entry = &self.entries[index];
            match provider.open_channel(&entry.spec, entry.sink.clone()) {
                Ok(handle) => self.entries[index].handle = Some(handle),
                Err(e) => {
                    warn!(stream = %entry.spec.name, error = %e, "resubscribe failed");
                    for opened in &mut self.entries[..index] {
                        opened.close(provider);
                    }
                    return Err(e);
                }
            }
        }
        Ok(self.entries.len())
    }

    /// Returns a snapshot of every recorded subscription.
    pub fn records(&self) -> Vec<Subscription> {
        self.entries.iter().map(Entry::record).collect()
    }

    /// Number of recorded subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of subscriptions with an open channel.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.handle.is_some()).count()
    }
}
