//! Error types for protocol payloads.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting change-feed rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The row is not a JSON object.
    #[error("row is not an object")]
    NotAnObject,

    /// A required column is absent from the row.
    #[error("missing column `{0}`")]
    MissingColumn(String),

    /// A column holds a value of the wrong type.
    #[error("column `{column}` has invalid value: {reason}")]
    InvalidColumn {
        /// Column name.
        column: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Unknown order status string.
    #[error("unknown order status `{0}`")]
    UnknownStatus(String),

    /// Unknown table name.
    #[error("unknown table `{0}`")]
    UnknownTable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::MissingColumn("stock".into());
        assert_eq!(err.to_string(), "missing column `stock`");

        let err = ProtocolError::InvalidColumn {
            column: "stock".into(),
            reason: "expected integer".into(),
        };
        assert!(err.to_string().contains("expected integer"));
    }
}
