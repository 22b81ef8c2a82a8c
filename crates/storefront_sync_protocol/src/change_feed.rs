//! Change events delivered by a change-feed provider.

use crate::entity::EntityType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::Row;
use serde::{Deserialize, Serialize};

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row was inserted.
    Insert,
    /// Row was updated.
    Update,
    /// Row was deleted.
    Delete,
}

/// A single change notification for one row.
///
/// Providers deliver events for one stream in the order the backing store
/// committed them. `previous` is present for updates and deletes when the
/// provider replicates old rows; `current` is absent for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Name of the stream the event was delivered on.
    pub stream: String,
    /// Collection the row belongs to.
    pub entity: EntityType,
    /// Type of change.
    pub kind: ChangeKind,
    /// Row before the change.
    pub previous: Option<Row>,
    /// Row after the change.
    pub current: Option<Row>,
    /// Provider-assigned commit sequence.
    pub sequence: u64,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(stream: impl Into<String>, entity: EntityType, row: Row) -> Self {
        Self {
            stream: stream.into(),
            entity,
            kind: ChangeKind::Insert,
            previous: None,
            current: Some(row),
            sequence: 0,
        }
    }

    /// Creates an update event.
    pub fn update(stream: impl Into<String>, entity: EntityType, previous: Row, current: Row) -> Self {
        Self {
            stream: stream.into(),
            entity,
            kind: ChangeKind::Update,
            previous: Some(previous),
            current: Some(current),
            sequence: 0,
        }
    }

    /// Creates a delete event.
    pub fn delete(stream: impl Into<String>, entity: EntityType, previous: Row) -> Self {
        Self {
            stream: stream.into(),
            entity,
            kind: ChangeKind::Delete,
            previous: Some(previous),
            current: None,
            sequence: 0,
        }
    }

    /// Sets the commit sequence.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the most recent row snapshot (current, else previous).
    pub fn row(&self) -> Option<&Row> {
        self.current.as_ref().or(self.previous.as_ref())
    }

    /// Returns a column from the most recent row snapshot.
    pub fn column(&self, column: &str) -> Option<&Row> {
        self.row().and_then(|row| row.get(column))
    }

    /// Returns the row's `id` column rendered as a string.
    pub fn row_id(&self) -> ProtocolResult<String> {
        let row = self.row().ok_or(ProtocolError::NotAnObject)?;
        column_as_key(row, "id")
    }

    /// Returns true if `column` differs between the previous and current rows.
    ///
    /// Only meaningful for updates that carry both snapshots.
    pub fn column_changed(&self, column: &str) -> bool {
        match (&self.previous, &self.current) {
            (Some(prev), Some(cur)) => prev.get(column) != cur.get(column),
            _ => false,
        }
    }
}

/// Renders a key-like column (string or number) as a string.
pub(crate) fn column_as_key(row: &Row, column: &str) -> ProtocolResult<String> {
    if !row.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    match row.get(column) {
        None | Some(Row::Null) => Err(ProtocolError::MissingColumn(column.to_string())),
        Some(Row::String(s)) => Ok(s.clone()),
        Some(Row::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(ProtocolError::InvalidColumn {
            column: column.to_string(),
            reason: format!("expected string or number, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_detects_changed_columns() {
        let event = ChangeEvent::update(
            "products-changes",
            EntityType::Product,
            json!({"id": "p1", "stock": 4, "name": "Lamp"}),
            json!({"id": "p1", "stock": 3, "name": "Lamp"}),
        );
        assert!(event.column_changed("stock"));
        assert!(!event.column_changed("name"));
        assert_eq!(event.row_id().unwrap(), "p1");
    }

    #[test]
    fn delete_uses_previous_row() {
        let event = ChangeEvent::delete("reviews-changes", EntityType::Review, json!({"id": 7}));
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.row_id().unwrap(), "7");
        assert!(!event.column_changed("id"));
    }

    #[test]
    fn row_id_errors() {
        let event = ChangeEvent::insert("users-changes", EntityType::User, json!({"name": "x"}));
        assert_eq!(
            event.row_id(),
            Err(ProtocolError::MissingColumn("id".into()))
        );

        let event = ChangeEvent::insert("users-changes", EntityType::User, json!([1, 2]));
        assert_eq!(event.row_id(), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn kind_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&ChangeKind::Update).unwrap(), "\"UPDATE\"");
    }
}
