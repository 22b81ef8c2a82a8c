//! Typed payloads derived from product and order rows.

use crate::change_feed::{column_as_key, ChangeEvent, ChangeKind};
use crate::entity::EntityType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::Row;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Stock columns of a product row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// Units on hand. Never negative.
    pub stock: u64,
    /// Whether the product can be ordered.
    pub is_available: bool,
}

impl StockLevel {
    /// Creates a stock level with availability derived from the count.
    pub fn new(stock: u64) -> Self {
        Self {
            stock,
            is_available: stock > 0,
        }
    }

    /// Reads the `stock` column of a product row.
    pub fn from_row(row: &Row) -> ProtocolResult<Self> {
        Ok(Self::new(stock_column(row)?))
    }

    /// Applies a signed delta, clamping the result at zero.
    pub fn adjust(&self, delta: i64) -> Self {
        let next = (self.stock as i128 + delta as i128).clamp(0, u64::MAX as i128);
        Self::new(next as u64)
    }

    /// Renders the columns written back to the products table.
    pub fn to_row(&self) -> Row {
        json!({ "stock": self.stock, "is_available": self.is_available })
    }
}

fn stock_column(row: &Row) -> ProtocolResult<u64> {
    if !row.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let value = row
        .get("stock")
        .ok_or_else(|| ProtocolError::MissingColumn("stock".into()))?;
    value.as_u64().ok_or_else(|| ProtocolError::InvalidColumn {
        column: "stock".into(),
        reason: format!("expected non-negative integer, got {value}"),
    })
}

/// A product's stock count changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    /// Product id.
    pub product_id: String,
    /// Stock before the change.
    pub previous_stock: u64,
    /// Stock after the change.
    pub new_stock: u64,
    /// Availability after the change.
    pub is_available: bool,
}

impl StockChange {
    /// Extracts a stock change from a product update.
    ///
    /// Returns `Ok(None)` for events that are not product updates or whose
    /// `stock` column did not change.
    pub fn from_event(event: &ChangeEvent) -> ProtocolResult<Option<Self>> {
        if event.entity != EntityType::Product
            || event.kind != ChangeKind::Update
            || !event.column_changed("stock")
        {
            return Ok(None);
        }
        let (Some(previous), Some(current)) = (&event.previous, &event.current) else {
            return Ok(None);
        };
        let new_stock = stock_column(current)?;
        let is_available = current
            .get("is_available")
            .and_then(Row::as_bool)
            .unwrap_or(new_stock > 0);
        Ok(Some(Self {
            product_id: column_as_key(current, "id")?,
            previous_stock: stock_column(previous)?,
            new_stock,
            is_available,
        }))
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed, awaiting payment.
    Pending,
    /// Payment captured.
    Paid,
    /// Being prepared.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Cancelled before delivery.
    Cancelled,
}

impl OrderStatus {
    /// Returns the column value for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Reads the `status` column of an order row.
    pub fn from_row(row: &Row) -> ProtocolResult<Self> {
        if !row.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        match row.get("status") {
            Some(Row::String(s)) => s.parse(),
            Some(other) => Err(ProtocolError::InvalidColumn {
                column: "status".into(),
                reason: format!("expected string, got {other}"),
            }),
            None => Err(ProtocolError::MissingColumn("status".into())),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order's status changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    /// Order id.
    pub order_id: String,
    /// Owning user, when the row carries one.
    pub user_id: Option<String>,
    /// Status before the change.
    pub previous_status: OrderStatus,
    /// Status after the change.
    pub new_status: OrderStatus,
}

impl OrderStatusChange {
    /// Extracts a status change from an order update.
    ///
    /// Returns `Ok(None)` for events that are not order updates or whose
    /// `status` column did not change.
    pub fn from_event(event: &ChangeEvent) -> ProtocolResult<Option<Self>> {
        if event.entity != EntityType::Order
            || event.kind != ChangeKind::Update
            || !event.column_changed("status")
        {
            return Ok(None);
        }
        let (Some(previous), Some(current)) = (&event.previous, &event.current) else {
            return Ok(None);
        };
        Ok(Some(Self {
            order_id: column_as_key(current, "id")?,
            user_id: column_as_key(current, "user_id").ok(),
            previous_status: OrderStatus::from_row(previous)?,
            new_status: OrderStatus::from_row(current)?,
        }))
    }
}
