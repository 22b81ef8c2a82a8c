//! Stream specifications.

use crate::entity::EntityType;
use crate::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Restricts a stream to rows whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFilter {
    /// Column to compare.
    pub column: String,
    /// Expected value, compared against the column's string rendering.
    pub value: String,
}

impl StreamFilter {
    /// Creates an equality filter.
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if the row satisfies this filter.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(Row::String(s)) => *s == self.value,
            Some(Row::Number(n)) => n.to_string() == self.value,
            Some(Row::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

impl fmt::Display for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// A named stream of change events for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Stream (channel) name.
    pub name: String,
    /// Collection the stream watches.
    pub entity: EntityType,
    /// Optional single-key scope.
    pub filter: Option<StreamFilter>,
}

impl StreamSpec {
    /// Creates a stream spec.
    pub fn new(name: impl Into<String>, entity: EntityType, filter: Option<StreamFilter>) -> Self {
        Self {
            name: name.into(),
            entity,
            filter,
        }
    }

    /// Collection-level stream named `<table>-changes`.
    pub fn collection(entity: EntityType) -> Self {
        Self::new(format!("{}-changes", entity.table_name()), entity, None)
    }

    /// Scoped stream named `<table>-<column>-<value>`.
    pub fn scoped(entity: EntityType, filter: StreamFilter) -> Self {
        let name = format!("{}-{}-{}", entity.table_name(), filter.column, filter.value);
        Self::new(name, entity, Some(filter))
    }

    /// Returns true if the stream is scoped to a single key.
    pub fn is_scoped(&self) -> bool {
        self.filter.is_some()
    }

    /// Returns true if an event row belongs on this stream.
    ///
    /// For deletes the previous row is checked; otherwise the current row.
    pub fn accepts(&self, entity: EntityType, row: Option<&Row>) -> bool {
        if entity != self.entity {
            return false;
        }
        match (&self.filter, row) {
            (None, _) => true,
            (Some(filter), Some(row)) => filter.matches(row),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{} ({} where {})", self.name, self.entity, filter),
            None => write!(f, "{} ({})", self.name, self.entity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_stream_accepts_any_row_of_its_entity() {
        let spec = StreamSpec::collection(EntityType::Product);
        assert_eq!(spec.name, "products-changes");
        assert!(!spec.is_scoped());
        assert!(spec.accepts(EntityType::Product, Some(&json!({"id": "a"}))));
        assert!(!spec.accepts(EntityType::Order, Some(&json!({"id": "a"}))));
    }

    #[test]
    fn scoped_stream_matches_filter() {
        let spec = StreamSpec::scoped(EntityType::Order, StreamFilter::eq("user_id", "u1"));
        assert_eq!(spec.name, "orders-user_id-u1");
        assert!(spec.accepts(EntityType::Order, Some(&json!({"user_id": "u1"}))));
        assert!(!spec.accepts(EntityType::Order, Some(&json!({"user_id": "u2"}))));
        assert!(!spec.accepts(EntityType::Order, None));
    }

    #[test]
    fn numeric_columns_match_their_rendering() {
        let filter = StreamFilter::eq("id", "42");
        assert!(filter.matches(&json!({"id": 42})));
        assert!(!filter.matches(&json!({"id": 43})));
        assert_eq!(filter.to_string(), "id=eq.42");
    }
}
