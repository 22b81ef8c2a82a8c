//! # Storefront Sync Engine
//!
//! Realtime synchronization engine for the storefront.
//!
//! This crate provides:
//! - Baseline and scoped change-feed subscriptions
//! - Routing of row changes to typed application callbacks
//! - Connection monitoring from transport and network signals
//! - Reconnection with exponential backoff and cancellation
//! - Optimistic mutations with rollback on commit failure
//! - In-memory change feed and store for tests and demos
//!
//! ## Architecture
//!
//! The engine sits between a [`ChangeFeedProvider`] (the realtime transport)
//! and an [`AuthoritativeStore`] (the system of record):
//! 1. `initialize` opens one channel per baseline stream
//! 2. Provider events are routed to the registered [`CallbackSet`]
//! 3. Transport and network signals feed the [`ConnectionMonitor`]
//! 4. A lost connection starts the [`ReconnectController`], which replays
//!    every recorded subscription after a backoff delay
//! 5. Optimistic mutations apply locally first and roll back if the store
//!    rejects them
//!
//! ## Key Invariants
//!
//! - At most one reconnection run is active
//! - No reconnection completes after `unsubscribe_all` returns
//! - A failed optimistic commit leaves local state equal to the value read
//! - No lock is held while application callbacks run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod callbacks;
mod channel;
mod config;
mod engine;
mod error;
mod monitor;
mod optimistic;
mod reconnect;
mod state;
mod store;
mod transport;

pub use callbacks::{CallbackRegistry, CallbackSet, EventCategory, Handler, SyncEvent};
pub use channel::{Subscription, SubscriptionId, SubscriptionSet};
pub use config::{ReconnectConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use monitor::{ConnectionMonitor, ConnectionState, Transition};
pub use optimistic::{LocalApply, MutationAttempt, MutationCoordinator, Rollback};
pub use reconnect::{ReconnectController, ReconnectOutcome, ReconnectState};
pub use state::SyncStatus;
pub use store::{AuthoritativeStore, MemoryStore};
pub use transport::{
    ChangeFeedProvider, ChannelHandle, EventSink, MemoryChangeFeed, NetworkSignal, TransportSignal,
};
