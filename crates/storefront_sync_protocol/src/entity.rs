//! Storefront entity collections.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A storefront collection that emits change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Catalog products (carry `stock` and `is_available`).
    Product,
    /// Customer orders (carry `status` and `user_id`).
    Order,
    /// Product reviews.
    Review,
    /// Items in a user's cart.
    CartItem,
    /// User profiles.
    User,
}

impl EntityType {
    /// Every entity type, in baseline subscription order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Product,
        EntityType::Order,
        EntityType::Review,
        EntityType::CartItem,
        EntityType::User,
    ];

    /// Returns the backing table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Product => "products",
            EntityType::Order => "orders",
            EntityType::Review => "reviews",
            EntityType::CartItem => "cart_items",
            EntityType::User => "users",
        }
    }

    /// Resolves an entity type from its table name.
    pub fn from_table(table: &str) -> ProtocolResult<Self> {
        EntityType::ALL
            .into_iter()
            .find(|e| e.table_name() == table)
            .ok_or_else(|| ProtocolError::UnknownTable(table.to_string()))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Identifies one entity: a collection plus a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Collection.
    pub entity: EntityType,
    /// Primary key within the collection.
    pub key: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(entity: EntityType, key: impl Into<String>) -> Self {
        Self {
            entity,
            key: key.into(),
        }
    }

    /// Reference to a product.
    pub fn product(id: impl Into<String>) -> Self {
        Self::new(EntityType::Product, id)
    }

    /// Reference to an order.
    pub fn order(id: impl Into<String>) -> Self {
        Self::new(EntityType::Order, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for entity in EntityType::ALL {
            assert_eq!(EntityType::from_table(entity.table_name()).unwrap(), entity);
        }
        assert_eq!(
            EntityType::from_table("invoices"),
            Err(ProtocolError::UnknownTable("invoices".into()))
        );
    }

    #[test]
    fn entity_ref_display() {
        assert_eq!(EntityRef::product("p-1").to_string(), "products/p-1");
        assert_eq!(EntityRef::order("o-9").to_string(), "orders/o-9");
    }
}
