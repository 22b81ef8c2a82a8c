//! Storefront sync demo
//!
//! Drives the sync engine over the in-memory change feed and store:
//! baseline routing, a scoped stock watch, optimistic updates with
//! rollback, and a simulated outage with backoff reconnection.

use clap::Parser;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storefront_sync_engine::{
    CallbackSet, MemoryChangeFeed, MemoryStore, NetworkSignal, ReconnectConfig, SyncConfig,
    SyncEngine, TransportSignal,
};
use storefront_sync_protocol::{ChangeEvent, EntityRef, EntityType, OrderStatus, StockLevel};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Storefront realtime sync walkthrough.
#[derive(Parser)]
#[command(name = "storefront-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Reconnection attempt budget
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Delay before the first reconnection attempt, in milliseconds
    #[arg(long, default_value = "200")]
    base_delay_ms: u64,

    /// Number of reconnection attempts that fail before the feed recovers
    #[arg(long, default_value = "2")]
    outage: u64,
}

type Engine = SyncEngine<MemoryChangeFeed, MemoryStore>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let feed = Arc::new(MemoryChangeFeed::new());
    let store = Arc::new(MemoryStore::new());
    store.insert(EntityType::Product, "p1", json!({"id": "p1", "name": "Desk lamp", "stock": 5}));
    store.insert(EntityType::Order, "o1", json!({"id": "o1", "user_id": "u1", "status": "pending"}));

    let config = SyncConfig::default().with_reconnect(
        ReconnectConfig::new(cli.max_attempts)
            .with_base_delay(Duration::from_millis(cli.base_delay_ms)),
    );
    let engine: Engine = SyncEngine::new(config, Arc::clone(&feed), Arc::clone(&store));

    engine.initialize(callbacks())?;
    engine.handle_transport_signal(TransportSignal::Open);

    live_events(&engine, &feed)?;
    optimistic_updates(&engine, &store);
    outage(&engine, &feed, cli.outage).await;

    engine.unsubscribe_all();
    let status = engine.status();
    info!(
        initialized = status.initialized,
        connected = status.connected,
        last_error = ?status.last_error,
        "engine stopped"
    );
    Ok(())
}

fn callbacks() -> CallbackSet {
    CallbackSet::new()
        .on_connection_change(|up| info!(connected = *up, "connection changed"))
        .on_error(|err| warn!(error = %err, retryable = err.is_retryable(), "sync error"))
        .on_product_stock_change(|c| {
            info!(
                product = %c.product_id,
                from = c.previous_stock,
                to = c.new_stock,
                available = c.is_available,
                "stock changed"
            )
        })
        .on_order_status_change(|c| {
            info!(
                order = %c.order_id,
                from = %c.previous_status,
                to = %c.new_status,
                "order status changed"
            )
        })
        .on_cart_change(|e| info!(kind = ?e.kind, stream = %e.stream, "cart changed"))
}

fn live_events(engine: &Engine, feed: &MemoryChangeFeed) -> Result<(), Box<dyn std::error::Error>> {
    let watch = engine.subscribe_to_product_stock("p1", |c| {
        info!(stock = c.new_stock, "p1 watcher")
    })?;

    feed.publish(ChangeEvent::update(
        "",
        EntityType::Product,
        json!({"id": "p1", "stock": 5}),
        json!({"id": "p1", "stock": 4}),
    ));
    feed.publish(ChangeEvent::update(
        "",
        EntityType::Order,
        json!({"id": "o9", "status": "paid"}),
        json!({"id": "o9", "status": "shipped"}),
    ));
    feed.publish(ChangeEvent::insert(
        "",
        EntityType::CartItem,
        json!({"id": "c1", "user_id": "u1", "product_id": "p1", "quantity": 1}),
    ));

    engine.unsubscribe(watch.id);
    Ok(())
}

fn optimistic_updates(engine: &Engine, store: &MemoryStore) {
    let shown = Arc::new(Mutex::new(StockLevel::new(5)));
    let s = Arc::clone(&shown);
    let show_stock = move |target: &EntityRef, level: &StockLevel| {
        *s.lock() = *level;
        info!(%target, stock = level.stock, "local stock");
    };

    match engine.optimistic_stock_update("p1", -2, &show_stock) {
        Ok(level) => info!(stock = level.stock, "stock committed"),
        Err(e) => warn!(error = %e, "stock update failed"),
    }

    store.set_fail_writes(Some("permission denied"));
    let show_status = |target: &EntityRef, status: &OrderStatus| {
        info!(%target, %status, "local order status");
    };
    if let Err(e) = engine.optimistic_order_status("o1", OrderStatus::Paid, &show_status) {
        warn!(error = %e, "order status rolled back");
    }
    store.set_fail_writes(None);

    info!(stock = shown.lock().stock, "displayed stock");
}

async fn outage(engine: &Engine, feed: &MemoryChangeFeed, failing_attempts: u64) {
    feed.fail_opens("connection refused");
    engine.handle_network_signal(NetworkSignal::Offline);
    engine.handle_transport_signal(TransportSignal::Close);
    engine.handle_network_signal(NetworkSignal::Online);

    while engine.is_reconnecting() && feed.failed_open_calls() < failing_attempts {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    feed.allow_opens();

    while engine.is_reconnecting() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if feed.open_channel_count() > 0 {
        engine.handle_transport_signal(TransportSignal::Open);
    }
    info!(
        attempts = engine.reconnect_state().attempts,
        channels = feed.open_channel_count(),
        "outage over"
    );
}
