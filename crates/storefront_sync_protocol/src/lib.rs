//! # Storefront Sync Protocol
//!
//! Data types exchanged between a change-feed provider and the storefront
//! realtime sync engine.
//!
//! This crate provides:
//! - `ChangeEvent` for insert/update/delete notifications with row snapshots
//! - `EntityType` and `EntityRef` for the storefront collections
//! - `StreamSpec` and `StreamFilter` for collection-level and scoped streams
//! - Typed payloads derived from rows (`StockLevel`, `StockChange`,
//!   `OrderStatus`, `OrderStatusChange`)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod entity;
mod error;
mod payload;
mod stream;

pub use change_feed::{ChangeEvent, ChangeKind};
pub use entity::{EntityRef, EntityType};
pub use error::{ProtocolError, ProtocolResult};
pub use payload::{OrderStatus, OrderStatusChange, StockChange, StockLevel};
pub use stream::{StreamFilter, StreamSpec};

/// Row snapshot carried by change events and stored by the authoritative store.
pub type Row = serde_json::Value;
