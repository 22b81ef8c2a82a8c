//! Change-feed provider abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storefront_sync_protocol::{ChangeEvent, StreamSpec};

/// Receives events for one open channel.
pub type EventSink = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Provider-assigned identifier of an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u64);

/// Transport-level signal fired by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The connection is open and channels are receiving.
    Open,
    /// The connection closed.
    Close,
    /// The connection failed with the given detail.
    Error(String),
}

/// Local network reachability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    /// The network became reachable.
    Online,
    /// The network became unreachable.
    Offline,
}

/// A change-feed provider pushes row changes for named streams.
///
/// This trait abstracts the realtime service, allowing for different
/// implementations (hosted changefeed, WebSocket relay, in-memory for tests).
/// Implementations must deliver events for one channel in commit order and
/// may deliver on any thread.
pub trait ChangeFeedProvider: Send + Sync {
    /// Opens a channel for `spec`; events are delivered to `sink`.
    fn open_channel(&self, spec: &StreamSpec, sink: EventSink) -> SyncResult<ChannelHandle>;

    /// Closes a channel. Closing an unknown handle is not an error.
    fn close_channel(&self, handle: ChannelHandle) -> SyncResult<()>;
}

struct OpenChannel {
    spec: StreamSpec,
    sink: EventSink,
}

/// An in-process change feed.
///
/// Events published with [`MemoryChangeFeed::publish`] are delivered to every
/// open channel whose stream accepts them, on the publishing thread. Channel
/// opens can be made to fail for testing reconnection.
#[derive(Default)]
pub struct MemoryChangeFeed {
    channels: Mutex<BTreeMap<ChannelHandle, OpenChannel>>,
    next_handle: AtomicU64,
    next_sequence: AtomicU64,
    fail_opens: Mutex<Option<String>>,
    opens: AtomicU64,
    failed_opens: AtomicU64,
}

impl MemoryChangeFeed {
    /// Creates an empty change feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `open_channel` fail with `message`.
    pub fn fail_opens(&self, message: impl Into<String>) {
        *self.fail_opens.lock() = Some(message.into());
    }

    /// Lets `open_channel` succeed again.
    pub fn allow_opens(&self) {
        *self.fail_opens.lock() = None;
    }

    /// Number of currently open channels.
    pub fn open_channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Names of the currently open channels, in open order.
    pub fn open_stream_names(&self) -> Vec<String> {
        self.channels
            .lock()
            .values()
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// Total successful opens.
    pub fn open_calls(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Total rejected opens.
    pub fn failed_open_calls(&self) -> u64 {
        self.failed_opens.load(Ordering::SeqCst)
    }

    /// Publishes an event to every matching channel.
    ///
    /// Returns the number of channels that received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = event.with_sequence(sequence);

        // Collect sinks first so a sink may reopen or close channels.
        let sinks: Vec<(String, EventSink)> = self
            .channels
            .lock()
            .values()
            .filter(|c| c.spec.accepts(event.entity, event.row()))
            .map(|c| (c.spec.name.clone(), Arc::clone(&c.sink)))
            .collect();

        for (stream, sink) in &sinks {
            let mut delivered = event.clone();
            delivered.stream = stream.clone();
            sink(delivered);
        }
        sinks.len()
    }
}

impl ChangeFeedProvider for MemoryChangeFeed {
    fn open_channel(&self, spec: &StreamSpec, sink: EventSink) -> SyncResult<ChannelHandle> {
        if let Some(message) = self.fail_opens.lock().clone() {
            self.failed_opens.fetch_add(1, Ordering::SeqCst);
            return Err(SyncError::ChannelOpen {
                stream: spec.name.clone(),
                message,
            });
        }
        let handle = ChannelHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.channels.lock().insert(
            handle,
            OpenChannel {
                spec: spec.clone(),
                sink,
            },
        );
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn close_channel(&self, handle: ChannelHandle) -> SyncResult<()> {
        self.channels.lock().remove(&handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storefront_sync_protocol::{EntityType, StreamFilter};

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<ChangeEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));
        let s = Arc::clone(&seen);
        let sink: EventSink = Arc::new(move |e: ChangeEvent| s.lock().push(e));
        (sink, seen)
    }

    #[test]
    fn publish_routes_by_entity_and_filter() {
        let feed = MemoryChangeFeed::new();
        let (all_sink, all) = collecting_sink();
        let (scoped_sink, scoped) = collecting_sink();

        feed.open_channel(&StreamSpec::collection(EntityType::Product), all_sink)
            .unwrap();
        feed.open_channel(
            &StreamSpec::scoped(EntityType::Product, StreamFilter::eq("id", "p2")),
            scoped_sink,
        )
        .unwrap();

        let n = feed.publish(ChangeEvent::insert("", EntityType::Product, json!({"id": "p1"})));
        assert_eq!(n, 1);
        let n = feed.publish(ChangeEvent::insert("", EntityType::Product, json!({"id": "p2"})));
        assert_eq!(n, 2);
        feed.publish(ChangeEvent::insert("", EntityType::Order, json!({"id": "p2"})));

        assert_eq!(all.lock().len(), 2);
        assert_eq!(scoped.lock().len(), 1);
        assert_eq!(scoped.lock()[0].stream, "products-id-p2");
        assert_eq!(all.lock()[1].sequence, 2);
    }

    #[test]
    fn failing_opens() {
        let feed = MemoryChangeFeed::new();
        feed.fail_opens("service unavailable");
        let (sink, _) = collecting_sink();

        let err = feed
            .open_channel(&StreamSpec::collection(EntityType::User), Arc::clone(&sink))
            .unwrap_err();
        assert!(matches!(err, SyncError::ChannelOpen { .. }));
        assert_eq!(feed.failed_open_calls(), 1);

        feed.allow_opens();
        let handle = feed
            .open_channel(&StreamSpec::collection(EntityType::User), sink)
            .unwrap();
        assert_eq!(feed.open_channel_count(), 1);

        feed.close_channel(handle).unwrap();
        feed.close_channel(handle).unwrap();
        assert_eq!(feed.open_channel_count(), 0);
    }
}
