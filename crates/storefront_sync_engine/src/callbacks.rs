//! Application callbacks and the dispatch point that routes events to them.

use crate::error::SyncError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use storefront_sync_protocol::{ChangeEvent, OrderStatusChange, StockChange};

/// A shared event handler.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Category of an event delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// A product's stock count changed.
    ProductStockChanged,
    /// An order's status changed.
    OrderStatusChanged,
    /// Any product row changed.
    ProductUpdated,
    /// Any order row changed.
    OrderUpdated,
    /// A cart item changed.
    CartChanged,
    /// A user row changed.
    UserChanged,
    /// A review changed.
    ReviewChanged,
    /// The connection opened or closed.
    ConnectionChanged,
    /// An error was observed.
    Error,
}

/// An event routed to application callbacks.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A product's stock count changed.
    ProductStockChanged(StockChange),
    /// An order's status changed.
    OrderStatusChanged(OrderStatusChange),
    /// Any product row changed.
    ProductUpdated(ChangeEvent),
    /// Any order row changed.
    OrderUpdated(ChangeEvent),
    /// A cart item changed.
    CartChanged(ChangeEvent),
    /// A user row changed.
    UserChanged(ChangeEvent),
    /// A review changed.
    ReviewChanged(ChangeEvent),
    /// The connection opened (`true`) or closed (`false`).
    ConnectionChanged(bool),
    /// An error was observed.
    Error(SyncError),
}

impl SyncEvent {
    /// Returns the event's category.
    pub fn category(&self) -> EventCategory {
        match self {
            SyncEvent::ProductStockChanged(_) => EventCategory::ProductStockChanged,
            SyncEvent::OrderStatusChanged(_) => EventCategory::OrderStatusChanged,
            SyncEvent::ProductUpdated(_) => EventCategory::ProductUpdated,
            SyncEvent::OrderUpdated(_) => EventCategory::OrderUpdated,
            SyncEvent::CartChanged(_) => EventCategory::CartChanged,
            SyncEvent::UserChanged(_) => EventCategory::UserChanged,
            SyncEvent::ReviewChanged(_) => EventCategory::ReviewChanged,
            SyncEvent::ConnectionChanged(_) => EventCategory::ConnectionChanged,
            SyncEvent::Error(_) => EventCategory::Error,
        }
    }
}

/// One optional handler per event category.
///
/// Absent handlers are skipped during dispatch.
#[derive(Clone, Default)]
pub struct CallbackSet {
    product_stock_changed: Option<Handler<StockChange>>,
    order_status_changed: Option<Handler<OrderStatusChange>>,
    product_updated: Option<Handler<ChangeEvent>>,
    order_updated: Option<Handler<ChangeEvent>>,
    cart_changed: Option<Handler<ChangeEvent>>,
    user_changed: Option<Handler<ChangeEvent>>,
    review_changed: Option<Handler<ChangeEvent>>,
    connection_changed: Option<Handler<bool>>,
    error: Option<Handler<SyncError>>,
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident, $field:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name<F>(mut self, f: F) -> Self
        where
            F: Fn(&$ty) + Send + Sync + 'static,
        {
            self.$field = Some(Arc::new(f));
            self
        }
    };
}

impl CallbackSet {
    /// Creates an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    setter!(
        /// Handles stock changes on the products stream.
        on_product_stock_change, product_stock_changed, StockChange
    );
    setter!(
        /// Handles status changes on the orders stream.
        on_order_status_change, order_status_changed, OrderStatusChange
    );
    setter!(
        /// Handles every product event.
        on_product_update, product_updated, ChangeEvent
    );
    setter!(
        /// Handles every order event.
        on_order_update, order_updated, ChangeEvent
    );
    setter!(
        /// Handles cart item events.
        on_cart_change, cart_changed, ChangeEvent
    );
    setter!(
        /// Handles user events.
        on_user_change, user_changed, ChangeEvent
    );
    setter!(
        /// Handles review events.
        on_review_change, review_changed, ChangeEvent
    );
    setter!(
        /// Handles connection transitions.
        on_connection_change, connection_changed, bool
    );
    setter!(
        /// Handles errors.
        on_error, error, SyncError
    );

    /// Returns true if a handler is registered for `category`.
    pub fn has(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::ProductStockChanged => self.product_stock_changed.is_some(),
            EventCategory::OrderStatusChanged => self.order_status_changed.is_some(),
            EventCategory::ProductUpdated => self.product_updated.is_some(),
            EventCategory::OrderUpdated => self.order_updated.is_some(),
            EventCategory::CartChanged => self.cart_changed.is_some(),
            EventCategory::UserChanged => self.user_changed.is_some(),
            EventCategory::ReviewChanged => self.review_changed.is_some(),
            EventCategory::ConnectionChanged => self.connection_changed.is_some(),
            EventCategory::Error => self.error.is_some(),
        }
    }

    /// Overrides the handlers that `other` provides, keeping the rest.
    pub fn merge(&mut self, other: CallbackSet) {
        fn take<T: ?Sized>(slot: &mut Option<Arc<T>>, incoming: Option<Arc<T>>) {
            if incoming.is_some() {
                *slot = incoming;
            }
        }
        take(&mut self.product_stock_changed, other.product_stock_changed);
        take(&mut self.order_status_changed, other.order_status_changed);
        take(&mut self.product_updated, other.product_updated);
        take(&mut self.order_updated, other.order_updated);
        take(&mut self.cart_changed, other.cart_changed);
        take(&mut self.user_changed, other.user_changed);
        take(&mut self.review_changed, other.review_changed);
        take(&mut self.connection_changed, other.connection_changed);
        take(&mut self.error, other.error);
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("product_stock_changed", &self.product_stock_changed.is_some())
            .field("order_status_changed", &self.order_status_changed.is_some())
            .field("product_updated", &self.product_updated.is_some())
            .field("order_updated", &self.order_updated.is_some())
            .field("cart_changed", &self.cart_changed.is_some())
            .field("user_changed", &self.user_changed.is_some())
            .field("review_changed", &self.review_changed.is_some())
            .field("connection_changed", &self.connection_changed.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Holds the current callback set and dispatches events to it.
///
/// Dispatch may be called from any thread. The handler is cloned out of the
/// lock before it runs, so handlers are free to call back into the engine.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<CallbackSet>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every handler.
    pub fn replace(&self, callbacks: CallbackSet) {
        *self.callbacks.write() = callbacks;
    }

    /// Merges a partial callback set into the current one.
    pub fn register(&self, callbacks: CallbackSet) {
        self.callbacks.write().merge(callbacks);
    }

    /// Returns a copy of the current callback set.
    pub fn snapshot(&self) -> CallbackSet {
        self.callbacks.read().clone()
    }

    /// Invokes the handler for the event's category, if any.
    pub fn dispatch(&self, event: &SyncEvent) {
        let callbacks = self.snapshot();
        match event {
            SyncEvent::ProductStockChanged(change) => call(&callbacks.product_stock_changed, change),
            SyncEvent::OrderStatusChanged(change) => call(&callbacks.order_status_changed, change),
            SyncEvent::ProductUpdated(e) => call(&callbacks.product_updated, e),
            SyncEvent::OrderUpdated(e) => call(&callbacks.order_updated, e),
            SyncEvent::CartChanged(e) => call(&callbacks.cart_changed, e),
            SyncEvent::UserChanged(e) => call(&callbacks.user_changed, e),
            SyncEvent::ReviewChanged(e) => call(&callbacks.review_changed, e),
            SyncEvent::ConnectionChanged(connected) => call(&callbacks.connection_changed, connected),
            SyncEvent::Error(err) => call(&callbacks.error, err),
        }
    }
}

fn call<T>(handler: &Option<Handler<T>>, payload: &T) {
    if let Some(handler) = handler {
        handler(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use storefront_sync_protocol::EntityType;

    #[test]
    fn missing_handler_is_skipped() {
        let registry = CallbackRegistry::new();
        registry.dispatch(&SyncEvent::ConnectionChanged(true));
        registry.dispatch(&SyncEvent::Error(SyncError::Cancelled));
    }

    #[test]
    fn register_merges_only_provided_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = CallbackRegistry::new();

        let s = Arc::clone(&seen);
        registry.replace(
            CallbackSet::new()
                .on_connection_change(move |c| s.lock().push(format!("first:{c}"))),
        );
        let s = Arc::clone(&seen);
        registry.register(CallbackSet::new().on_error(move |e| s.lock().push(e.to_string())));

        registry.dispatch(&SyncEvent::ConnectionChanged(true));
        registry.dispatch(&SyncEvent::Error(SyncError::Cancelled));
        assert_eq!(*seen.lock(), vec!["first:true", "sync cancelled"]);

        let s = Arc::clone(&seen);
        registry.register(
            CallbackSet::new().on_connection_change(move |c| s.lock().push(format!("second:{c}"))),
        );
        registry.dispatch(&SyncEvent::ConnectionChanged(false));
        assert_eq!(seen.lock().last().unwrap(), "second:false");
        assert!(registry.snapshot().has(EventCategory::Error));
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = Arc::new(CallbackRegistry::new());
        let inner = Arc::clone(&registry);
        registry.replace(CallbackSet::new().on_cart_change(move |_| {
            inner.register(CallbackSet::new().on_user_change(|_| {}));
        }));

        let event = ChangeEvent::insert("cart_items-changes", EntityType::CartItem, json!({"id": 1}));
        registry.dispatch(&SyncEvent::CartChanged(event));
        assert!(registry.snapshot().has(EventCategory::UserChanged));
    }

    #[test]
    fn event_categories() {
        assert_eq!(
            SyncEvent::ConnectionChanged(true).category(),
            EventCategory::ConnectionChanged
        );
        assert_eq!(SyncEvent::Error(SyncError::Cancelled).category(), EventCategory::Error);
    }
}
