//! The sync engine: lifecycle, routing and public API.

use crate::callbacks::{CallbackRegistry, CallbackSet, SyncEvent};
use crate::channel::{Subscription, SubscriptionId, SubscriptionSet};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::monitor::{ConnectionMonitor, ConnectionState, Transition};
use crate::optimistic::{LocalApply, MutationAttempt, MutationCoordinator, Rollback};
use crate::reconnect::{ReconnectController, ReconnectOutcome, ReconnectState};
use crate::state::SyncStatus;
use crate::store::AuthoritativeStore;
use crate::transport::{ChangeFeedProvider, EventSink, NetworkSignal, TransportSignal};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::SystemTime;
use storefront_sync_protocol::{
    ChangeEvent, EntityRef, EntityType, OrderStatus, OrderStatusChange, StockChange, StockLevel,
    StreamFilter, StreamSpec,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct EngineInner<P, S> {
    config: SyncConfig,
    provider: Arc<P>,
    store: Arc<S>,
    callbacks: Arc<CallbackRegistry>,
    subscriptions: Mutex<SubscriptionSet>,
    status: RwLock<SyncStatus>,
    monitor: ConnectionMonitor,
    reconnect: ReconnectController,
    mutations: MutationCoordinator,
}

/// The realtime sync engine.
///
/// Owns the live subscription set, the connection monitor, the reconnection
/// controller and the optimistic mutation coordinator. Cloning is cheap and
/// every clone drives the same engine.
///
/// Lock order: subscriptions, then monitor, then status. No lock is held
/// while a callback runs.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use storefront_sync_engine::{CallbackSet, MemoryChangeFeed, MemoryStore, SyncConfig, SyncEngine};
///
/// let feed = Arc::new(MemoryChangeFeed::new());
/// let store = Arc::new(MemoryStore::new());
/// let engine = SyncEngine::new(SyncConfig::default(), feed, store);
///
/// engine
///     .initialize(CallbackSet::new().on_connection_change(|up| println!("connected: {up}")))
///     .unwrap();
/// assert!(engine.status().initialized);
/// ```
pub struct SyncEngine<P, S>
where
    P: ChangeFeedProvider + 'static,
    S: AuthoritativeStore + 'static,
{
    inner: Arc<EngineInner<P, S>>,
}

impl<P, S> Clone for SyncEngine<P, S>
where
    P: ChangeFeedProvider + 'static,
    S: AuthoritativeStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, S> SyncEngine<P, S>
where
    P: ChangeFeedProvider + 'static,
    S: AuthoritativeStore + 'static,
{
    /// Creates an engine over the given provider and store.
    pub fn new(config: SyncConfig, provider: Arc<P>, store: Arc<S>) -> Self {
        let reconnect = ReconnectController::new(config.reconnect.clone());
        Self {
            inner: Arc::new(EngineInner {
                config,
                provider,
                store,
                callbacks: Arc::new(CallbackRegistry::new()),
                subscriptions: Mutex::new(SubscriptionSet::new()),
                status: RwLock::new(SyncStatus::default()),
                monitor: ConnectionMonitor::new(),
                reconnect,
                mutations: MutationCoordinator::new(),
            }),
        }
    }

    /// The change-feed provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    /// The authoritative store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Snapshot of the engine status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.read().clone()
    }

    /// Snapshot of the reconnection counter.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.reconnect.state()
    }

    /// Current transport state as seen by the connection monitor.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.monitor.state()
    }

    /// Returns true while a reconnection run is in progress.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnect.is_running()
    }

    /// Snapshot of the live subscription set.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.lock().records()
    }

    /// Merges a partial callback set into the registered callbacks.
    pub fn update_callbacks(&self, callbacks: CallbackSet) {
        self.inner.callbacks.register(callbacks);
    }

    /// Stores `callbacks`, opens the baseline subscriptions and starts the
    /// connection monitor.
    ///
    /// If any baseline subscription fails to open, the ones already opened
    /// are closed again, the engine stays uninitialized and the error is
    /// returned. Calling this on an initialized engine does nothing.
    pub fn initialize(&self, callbacks: CallbackSet) -> SyncResult<()> {
        let inner = &self.inner;
        let mut subs = inner.subscriptions.lock();
        if inner.status.read().initialized {
            warn!("sync engine already initialized");
            return Ok(());
        }

        inner.callbacks.replace(callbacks);
        inner.reconnect.reset();

        let mut opened = Vec::with_capacity(inner.config.baseline_streams.len());
        for spec in &inner.config.baseline_streams {
            let sink = routing_sink(Arc::clone(&inner.callbacks));
            match subs.open(inner.provider.as_ref(), spec.clone(), sink) {
                Ok(subscription) => opened.push(subscription.id),
                Err(e) => {
                    warn!(stream = %spec.name, error = %e, "baseline subscription failed");
                    for id in opened {
                        subs.close(inner.provider.as_ref(), id);
                    }
                    inner.status.write().last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        inner.monitor.start();
        {
            let mut status = inner.status.write();
            status.initialized = true;
            status.last_error = None;
        }
        info!(streams = opened.len(), "sync engine initialized");
        Ok(())
    }

    /// Opens a scoped subscription that delivers raw events to `on_event`.
    pub fn subscribe_to_entity<F>(
        &self,
        stream_name: impl Into<String>,
        entity: EntityType,
        filter: StreamFilter,
        on_event: F,
    ) -> SyncResult<Subscription>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let spec = StreamSpec::new(stream_name, entity, Some(filter));
        let sink: EventSink = Arc::new(move |event: ChangeEvent| on_event(&event));
        self.open(spec, sink)
    }

    /// Watches one product's stock.
    pub fn subscribe_to_product_stock<F>(&self, product_id: &str, on_change: F) -> SyncResult<Subscription>
    where
        F: Fn(&StockChange) + Send + Sync + 'static,
    {
        let spec = StreamSpec::scoped(EntityType::Product, StreamFilter::eq("id", product_id));
        let sink: EventSink = Arc::new(move |event: ChangeEvent| match StockChange::from_event(&event) {
            Ok(Some(change)) => on_change(&change),
            Ok(None) => {}
            Err(e) => warn!(stream = %event.stream, error = %e, "undecodable stock event"),
        });
        self.open(spec, sink)
    }

    /// Watches one user's orders.
    pub fn subscribe_to_user_orders<F>(&self, user_id: &str, on_event: F) -> SyncResult<Subscription>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let filter = StreamFilter::eq("user_id", user_id);
        let spec = StreamSpec::scoped(EntityType::Order, filter.clone());
        self.subscribe_to_entity(spec.name, EntityType::Order, filter, on_event)
    }

    /// Watches one user's cart.
    pub fn subscribe_to_user_cart<F>(&self, user_id: &str, on_event: F) -> SyncResult<Subscription>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let filter = StreamFilter::eq("user_id", user_id);
        let spec = StreamSpec::scoped(EntityType::CartItem, filter.clone());
        self.subscribe_to_entity(spec.name, EntityType::CartItem, filter, on_event)
    }

    /// Watches one product's reviews.
    pub fn subscribe_to_product_reviews<F>(&self, product_id: &str, on_event: F) -> SyncResult<Subscription>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let filter = StreamFilter::eq("product_id", product_id);
        let spec = StreamSpec::scoped(EntityType::Review, filter.clone());
        self.subscribe_to_entity(spec.name, EntityType::Review, filter, on_event)
    }

    fn open(&self, spec: StreamSpec, sink: EventSink) -> SyncResult<Subscription> {
        self.inner
            .subscriptions
            .lock()
            .open(self.inner.provider.as_ref(), spec, sink)
    }

    /// Closes one subscription. Returns false if it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscriptions
            .lock()
            .close(self.inner.provider.as_ref(), id)
    }

    /// Cancels any reconnection, closes every subscription and stops the
    /// monitor.
    ///
    /// Safe to call repeatedly and from any state.
    pub fn unsubscribe_all(&self) {
        let inner = &self.inner;
        let cancelled = inner.reconnect.cancel();
        let closed = inner
            .subscriptions
            .lock()
            .close_all(inner.provider.as_ref());
        inner.monitor.stop();
        {
            let mut status = inner.status.write();
            status.connected = false;
            status.initialized = false;
        }
        info!(closed, cancelled_reconnect = cancelled, "unsubscribed from all streams");
    }

    /// Tears everything down and initializes again with the current callbacks.
    pub fn reconnect(&self) -> SyncResult<()> {
        let callbacks = self.inner.callbacks.snapshot();
        self.unsubscribe_all();
        self.initialize(callbacks)
    }

    /// Feeds a transport signal from the provider into the connection monitor.
    pub fn handle_transport_signal(&self, signal: TransportSignal) {
        let transition = self
            .inner
            .monitor
            .on_transport_then(&signal, |t| self.commit_transition(t));
        self.announce_transition(transition);
    }

    /// Feeds a network reachability signal into the connection monitor.
    pub fn handle_network_signal(&self, signal: NetworkSignal) {
        let transition = self
            .inner
            .monitor
            .on_network_then(signal, |t| self.commit_transition(t));
        self.announce_transition(transition);
    }

    /// Runs under the monitor lock, so `status.connected` always matches the
    /// monitor state.
    fn commit_transition(&self, transition: &Transition) {
        let inner = &self.inner;
        if transition.reset_attempts {
            inner.reconnect.reset();
        }
        let mut status = inner.status.write();
        if let Some(connected) = transition.notify {
            status.connected = connected;
            if connected {
                status.last_sync_time = Some(SystemTime::now());
                status.last_error = None;
            }
        }
        if let Some(detail) = &transition.error {
            status.last_error = Some(detail.clone());
        }
    }

    fn announce_transition(&self, transition: Transition) {
        let callbacks = &self.inner.callbacks;
        if let Some(connected) = transition.notify {
            callbacks.dispatch(&SyncEvent::ConnectionChanged(connected));
        }
        if let Some(detail) = transition.error {
            callbacks.dispatch(&SyncEvent::Error(SyncError::transport_retryable(detail)));
        }
        if transition.reconnect {
            if let Err(e) = self.attempt_reconnect() {
                debug!(error = %e, "reconnect not started");
            }
        }
    }

    /// Starts a reconnection run unless one is already in progress.
    ///
    /// Returns `Ok(true)` if a new run was started and `Ok(false)` if one was
    /// already running. Fails with [`SyncError::NotInitialized`] before
    /// `initialize`, and with [`SyncError::NoRuntime`] outside a tokio
    /// runtime; the latter is also reported to the error callback.
    pub fn attempt_reconnect(&self) -> SyncResult<bool> {
        let inner = &self.inner;
        if !inner.status.read().initialized {
            return Err(SyncError::NotInitialized);
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("no tokio runtime, cannot reconnect");
                inner.callbacks.dispatch(&SyncEvent::Error(SyncError::NoRuntime));
                return Err(SyncError::NoRuntime);
            }
        };

        let Some((id, cancel)) = inner.reconnect.try_begin() else {
            debug!("reconnect already in progress");
            return Ok(false);
        };

        let engine = self.clone();
        let handle = runtime.spawn(async move { engine.run_reconnect(id, cancel).await });
        inner.reconnect.attach(id, handle);
        Ok(true)
    }

    async fn run_reconnect(&self, id: u64, cancel: watch::Receiver<bool>) {
        let inner = &self.inner;
        let cancelled = cancel.clone();
        let outcome = inner
            .reconnect
            .drive(cancel, |cancel| {
                let mut subs = inner.subscriptions.lock();
                if *cancel.borrow() {
                    return Err(SyncError::Cancelled);
                }
                subs.resubscribe(inner.provider.as_ref()).map(|_| ())
            })
            .await;

        match outcome {
            ReconnectOutcome::Reconnected { attempt } => {
                debug!(attempt, "awaiting transport open");
            }
            ReconnectOutcome::Exhausted { attempts } => self.report_exhausted(attempts, &cancelled),
            ReconnectOutcome::Cancelled => debug!("reconnect run cancelled"),
        }
        // Released last so `unsubscribe_all` can still cancel the report.
        inner.reconnect.finish(id);
    }

    /// Surfaces a spent attempt budget unless the run was cancelled.
    ///
    /// Cancellation is checked under the subscriptions lock, which
    /// `unsubscribe_all` takes after cancelling.
    fn report_exhausted(&self, attempts: u32, cancelled: &watch::Receiver<bool>) {
        let inner = &self.inner;
        let err = SyncError::ReconnectExhausted { attempts };
        {
            let _subs = inner.subscriptions.lock();
            if *cancelled.borrow() {
                debug!(attempts, "reconnect cancelled, exhaustion not reported");
                return;
            }
            let mut status = inner.status.write();
            status.connected = false;
            status.last_error = Some(err.to_string());
        }
        inner.callbacks.dispatch(&SyncEvent::ConnectionChanged(false));
        inner.callbacks.dispatch(&SyncEvent::Error(err));
    }

    /// Runs a caller-defined optimistic mutation.
    ///
    /// See [`MutationCoordinator::apply`]. A successful commit updates
    /// `last_sync_time`.
    pub fn apply_optimistic<T, Rd, Pr, C>(
        &self,
        target: &EntityRef,
        read: Rd,
        propose: Pr,
        local_apply: LocalApply<'_, T>,
        remote_commit: C,
        rollback: Option<Rollback<'_, T>>,
    ) -> SyncResult<T>
    where
        Rd: FnOnce() -> SyncResult<T>,
        Pr: FnOnce(&T) -> T,
        C: FnOnce(&MutationAttempt<T>) -> SyncResult<()>,
    {
        let result = self
            .inner
            .mutations
            .apply(target, read, propose, local_apply, remote_commit, rollback);
        self.record_commit(&result);
        result
    }

    /// Optimistically adjusts a product's stock by `delta`, clamped at zero.
    pub fn optimistic_stock_update(
        &self,
        product_id: &str,
        delta: i64,
        local_apply: LocalApply<'_, StockLevel>,
    ) -> SyncResult<StockLevel> {
        let result = self.inner.mutations.adjust_stock(
            self.inner.store.as_ref(),
            product_id,
            delta,
            local_apply,
        );
        self.record_commit(&result);
        result
    }

    /// Optimistically moves an order to `status`.
    pub fn optimistic_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        local_apply: LocalApply<'_, OrderStatus>,
    ) -> SyncResult<OrderStatus> {
        let result = self.inner.mutations.transition_status(
            self.inner.store.as_ref(),
            order_id,
            status,
            local_apply,
        );
        self.record_commit(&result);
        result
    }

    fn record_commit<T>(&self, result: &SyncResult<T>) {
        if result.is_ok() {
            self.inner.status.write().last_sync_time = Some(SystemTime::now());
        }
    }
}

/// Builds the sink for a baseline stream: every event is routed to the
/// callback category of its entity.
fn routing_sink(callbacks: Arc<CallbackRegistry>) -> EventSink {
    Arc::new(move |event: ChangeEvent| route_event(&callbacks, event))
}

fn route_event(callbacks: &CallbackRegistry, event: ChangeEvent) {
    match event.entity {
        EntityType::Product => {
            match StockChange::from_event(&event) {
                Ok(Some(change)) => callbacks.dispatch(&SyncEvent::ProductStockChanged(change)),
                Ok(None) => {}
                Err(e) => {
                    warn!(stream = %event.stream, error = %e, "undecodable product event");
                    callbacks.dispatch(&SyncEvent::Error(e.into()));
                }
            }
            callbacks.dispatch(&SyncEvent::ProductUpdated(event));
        }
        EntityType::Order => {
            match OrderStatusChange::from_event(&event) {
                Ok(Some(change)) => callbacks.dispatch(&SyncEvent::OrderStatusChanged(change)),
                Ok(None) => {}
                Err(e) => {
                    warn!(stream = %event.stream, error = %e, "undecodable order event");
                    callbacks.dispatch(&SyncEvent::Error(e.into()));
                }
            }
            callbacks.dispatch(&SyncEvent::OrderUpdated(event));
        }
        EntityType::CartItem => callbacks.dispatch(&SyncEvent::CartChanged(event)),
        EntityType::User => callbacks.dispatch(&SyncEvent::UserChanged(event)),
        EntityType::Review => callbacks.dispatch(&SyncEvent::ReviewChanged(event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::store::MemoryStore;
    use crate::transport::MemoryChangeFeed;
    use serde_json::json;
    use std::time::Duration;

    type Engine = SyncEngine<MemoryChangeFeed, MemoryStore>;

    fn engine() -> (Engine, Arc<MemoryChangeFeed>, Arc<MemoryStore>) {
        let feed = Arc::new(MemoryChangeFeed::new());
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig::default().with_reconnect(ReconnectConfig::new(5));
        (
            SyncEngine::new(config, Arc::clone(&feed), Arc::clone(&store)),
            feed,
            store,
        )
    }

    /// Records every callback as a line of text.
    fn recorder() -> (CallbackSet, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let push = |log: &Arc<Mutex<Vec<String>>>| {
            let log = Arc::clone(log);
            move |line: String| log.lock().push(line)
        };
        let (a, b, c, d, e) = (push(&log), push(&log), push(&log), push(&log), push(&log));
        let set = CallbackSet::new()
            .on_connection_change(move |up| a(format!("connected:{up}")))
            .on_error(move |err| b(format!("error:{err}")))
            .on_product_stock_change(move |ch| c(format!("stock:{}->{}", ch.previous_stock, ch.new_stock)))
            .on_product_update(move |ev| d(format!("product:{:?}", ev.kind)))
            .on_order_status_change(move |ch| e(format!("status:{}", ch.new_status)));
        (set, log)
    }

    #[test]
    fn initialize_opens_baseline_streams() {
        let (engine, feed, _) = engine();
        engine.initialize(CallbackSet::new()).unwrap();

        let status = engine.status();
        assert!(status.initialized);
        assert!(!status.connected);
        assert_eq!(feed.open_channel_count(), 5);
        assert_eq!(engine.subscriptions().len(), 5);
        assert_eq!(engine.connection_state(), ConnectionState::Unknown);

        // Second call is a no-op.
        engine.initialize(CallbackSet::new()).unwrap();
        assert_eq!(feed.open_calls(), 5);
    }

    #[test]
    fn initialize_failure_leaves_engine_uninitialized() {
        let (engine, feed, _) = engine();
        feed.fail_opens("realtime disabled");

        let err = engine.initialize(CallbackSet::new()).unwrap_err();
        assert!(matches!(err, SyncError::ChannelOpen { .. }));
        let status = engine.status();
        assert!(!status.initialized);
        assert!(status.last_error.is_some());
        assert!(engine.subscriptions().is_empty());
        assert_eq!(feed.open_channel_count(), 0);
    }

    #[test]
    fn transport_signals_drive_status() {
        let (engine, _, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        engine.handle_transport_signal(TransportSignal::Open);
        assert!(engine.status().connected);
        assert!(engine.status().last_sync_time.is_some());
        assert_eq!(engine.reconnect_state().attempts, 0);

        assert_eq!(*log.lock(), vec!["connected:true"]);
    }

    #[test]
    fn events_are_routed_to_categories() {
        let (engine, feed, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        feed.publish(ChangeEvent::update(
            "",
            EntityType::Product,
            json!({"id": "p1", "stock": 5}),
            json!({"id": "p1", "stock": 3}),
        ));
        feed.publish(ChangeEvent::update(
            "",
            EntityType::Order,
            json!({"id": "o1", "status": "pending"}),
            json!({"id": "o1", "status": "paid"}),
        ));
        feed.publish(ChangeEvent::update(
            "",
            EntityType::Product,
            json!({"id": "p1", "stock": 3, "name": "Mug"}),
            json!({"id": "p1", "stock": 3, "name": "Cup"}),
        ));

        assert_eq!(
            *log.lock(),
            vec!["stock:5->3", "product:Update", "status:paid", "product:Update"]
        );
    }

    #[test]
    fn update_callbacks_keeps_other_handlers() {
        let (engine, feed, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        let carts = Arc::new(Mutex::new(0));
        let c = Arc::clone(&carts);
        engine.update_callbacks(CallbackSet::new().on_cart_change(move |_| *c.lock() += 1));

        feed.publish(ChangeEvent::insert(
            "",
            EntityType::CartItem,
            json!({"id": "c1", "user_id": "u1", "quantity": 1}),
        ));
        engine.handle_transport_signal(TransportSignal::Open);

        assert_eq!(*carts.lock(), 1);
        assert_eq!(*log.lock(), vec!["connected:true"]);
    }

    #[test]
    fn undecodable_rows_reach_error_callback() {
        let (engine, feed, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        feed.publish(ChangeEvent::update(
            "",
            EntityType::Order,
            json!({"id": "o1", "status": "pending"}),
            json!({"id": "o1", "status": "teleported"}),
        ));
        assert_eq!(
            *log.lock(),
            vec!["error:protocol error: unknown order status `teleported`"]
        );
    }

    #[test]
    fn unsubscribe_all_is_idempotent() {
        let (engine, feed, _) = engine();
        engine.initialize(CallbackSet::new()).unwrap();
        engine.handle_transport_signal(TransportSignal::Open);

        engine.unsubscribe_all();
        let once = engine.status();
        engine.unsubscribe_all();
        let twice = engine.status();

        assert_eq!(once, twice);
        assert!(!twice.connected);
        assert!(!twice.initialized);
        assert!(engine.subscriptions().is_empty());
        assert_eq!(feed.open_channel_count(), 0);
    }

    #[test]
    fn unsubscribe_all_before_initialize() {
        let (engine, _, _) = engine();
        engine.unsubscribe_all();
        assert_eq!(engine.status(), SyncStatus::default());
    }

    #[test]
    fn scoped_subscriptions_coexist() {
        let (engine, feed, _) = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let a = engine
            .subscribe_to_product_stock("p1", move |c| s.lock().push(c.product_id.clone()))
            .unwrap();
        let s = Arc::clone(&seen);
        let b = engine
            .subscribe_to_user_orders("u1", move |e| s.lock().push(e.row_id().unwrap()))
            .unwrap();
        assert_eq!(a.stream_name, "products-id-p1");
        assert_eq!(b.stream_name, "orders-user_id-u1");

        feed.publish(ChangeEvent::update(
            "",
            EntityType::Product,
            json!({"id": "p1", "stock": 2}),
            json!({"id": "p1", "stock": 1}),
        ));
        feed.publish(ChangeEvent::update(
            "",
            EntityType::Product,
            json!({"id": "p2", "stock": 2}),
            json!({"id": "p2", "stock": 1}),
        ));
        feed.publish(ChangeEvent::insert(
            "",
            EntityType::Order,
            json!({"id": "o7", "user_id": "u1", "status": "pending"}),
        ));
        assert_eq!(*seen.lock(), vec!["p1", "o7"]);

        assert!(engine.unsubscribe(a.id));
        assert!(!engine.unsubscribe(a.id));
        assert_eq!(feed.open_channel_count(), 1);
    }

    #[test]
    fn reconnect_without_runtime_reports_error() {
        let (engine, _, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        engine.handle_transport_signal(TransportSignal::Close);
        assert!(!engine.is_reconnecting());
        assert_eq!(
            *log.lock(),
            vec![
                "connected:false",
                "error:no async runtime available for reconnection"
            ]
        );
    }

    #[test]
    fn reconnect_requires_initialize() {
        let (engine, feed, _) = engine();
        assert_eq!(engine.attempt_reconnect(), Err(SyncError::NotInitialized));

        engine.initialize(CallbackSet::new()).unwrap();
        engine.unsubscribe_all();
        assert_eq!(engine.attempt_reconnect(), Err(SyncError::NotInitialized));
        assert_eq!(feed.open_calls(), 5);
    }

    #[test]
    fn concurrent_signals_keep_status_and_monitor_in_step() {
        let (engine, _, _) = engine();
        engine.initialize(CallbackSet::new()).unwrap();

        for _ in 0..200 {
            let opener = engine.clone();
            let closer = engine.clone();
            let a = std::thread::spawn(move || opener.handle_transport_signal(TransportSignal::Open));
            let b = std::thread::spawn(move || closer.handle_transport_signal(TransportSignal::Close));
            a.join().unwrap();
            b.join().unwrap();

            let open = engine.connection_state() == ConnectionState::Open;
            assert_eq!(engine.status().connected, open);
        }
    }

    #[test]
    fn exhaustion_after_cancel_is_silent() {
        let (engine, _, _) = engine();
        let (callbacks, log) = recorder();
        engine.initialize(callbacks).unwrap();

        let (_, cancelled) = engine.inner.reconnect.try_begin().unwrap();
        engine.unsubscribe_all();
        engine.report_exhausted(5, &cancelled);
        assert!(log.lock().is_empty());
        assert_eq!(engine.status().last_error, None);

        let (_, live) = engine.inner.reconnect.try_begin().unwrap();
        engine.report_exhausted(5, &live);
        assert_eq!(
            *log.lock(),
            vec!["connected:false", "error:reconnection failed after 5 attempts"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_triggers_single_reconnect_run() {
        let (engine, feed, _) = engine();
        engine.initialize(CallbackSet::new()).unwrap();
        engine.handle_transport_signal(TransportSignal::Open);

        engine.handle_transport_signal(TransportSignal::Close);
        engine.handle_transport_signal(TransportSignal::Error("reset".into()));
        assert!(engine.is_reconnecting());
        assert_eq!(engine.attempt_reconnect(), Ok(false));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!engine.is_reconnecting());
        assert_eq!(feed.open_calls(), 10);
        assert_eq!(feed.open_channel_count(), 5);
        assert_eq!(engine.reconnect_state().attempts, 1);

        engine.handle_transport_signal(TransportSignal::Open);
        assert_eq!(engine.reconnect_state().attempts, 0);
        assert!(engine.status().connected);
    }

    #[test]
    fn optimistic_helpers_update_last_sync_time() {
        let (engine, _, store) = engine();
        store.insert(EntityType::Product, "p1", json!({"id": "p1", "stock": 5}));

        let level = engine
            .optimistic_stock_update("p1", -2, &|_, _| {})
            .unwrap();
        assert_eq!(level.stock, 3);
        assert!(engine.status().last_sync_time.is_some());
    }
}
