// ABOUTME: Error types for the replication engine
// ABOUTME: Classifies database failures into connectivity, schema, estimation and upsert errors

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Every failure the engine can surface. All of them are terminal for the
/// current run; already-committed windows stay committed.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Host unreachable, authentication failure, missing database
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Missing table, missing or unsupported watermark column, structural mismatch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Query planner output could not be interpreted
    #[error("Estimation error: {0}")]
    Estimation(String),

    /// Interval bounds are malformed (start > end, zero step)
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Constraint violation other than the expected primary-key conflict
    #[error("Upsert failed for {table}: {message}")]
    Upsert { table: String, message: String },

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Stop signal honoured between windows
    #[error("Replication cancelled after {windows} committed windows")]
    Cancelled { windows: u64 },

    /// Any other server-side failure
    #[error("Database error: {}", describe_postgres_error(.0))]
    Database(#[from] tokio_postgres::Error),
}

impl ReplicationError {
    pub fn schema(message: impl Into<String>) -> Self {
        ReplicationError::Schema(message.into())
    }

    pub fn upsert(table: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicationError::Upsert {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Short stable name of the error kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationError::Connectivity(_) => "connectivity",
            ReplicationError::Schema(_) => "schema",
            ReplicationError::Estimation(_) => "estimation",
            ReplicationError::InvalidRange(_) => "invalid_range",
            ReplicationError::Upsert { .. } => "upsert",
            ReplicationError::Config(_) => "config",
            ReplicationError::InvalidState(_) => "invalid_state",
            ReplicationError::Cancelled { .. } => "cancelled",
            ReplicationError::Database(_) => "database",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplicationError::Cancelled { .. })
    }

    /// Classify an error raised while establishing a connection.
    pub fn from_connect(database: &str, err: tokio_postgres::Error) -> Self {
        let message = match err.code() {
            Some(code) if *code == SqlState::INVALID_PASSWORD => {
                format!("unable to log in to '{}' with that user and password", database)
            }
            Some(code) if *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION => {
                format!(
                    "authentication rejected by '{}': {}",
                    database,
                    describe_postgres_error(&err)
                )
            }
            Some(code) if *code == SqlState::INVALID_CATALOG_NAME => {
                format!("database '{}' does not exist", database)
            }
            Some(code) if *code == SqlState::CANNOT_CONNECT_NOW => {
                format!("database '{}' is starting up", database)
            }
            _ => format!(
                "database '{}' unreachable: {}",
                database,
                describe_postgres_error(&err)
            ),
        };
        ReplicationError::Connectivity(message)
    }

    /// Classify an error raised by a query against `table`.
    pub fn from_query(table: &str, err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return ReplicationError::Connectivity(format!(
                "connection closed while querying {}: {}",
                table,
                describe_postgres_error(&err)
            ));
        }
        match err.code() {
            Some(code) if *code == SqlState::UNDEFINED_TABLE => {
                ReplicationError::Schema(format!(
                    "table {} does not exist: {}",
                    table,
                    describe_postgres_error(&err)
                ))
            }
            Some(code) if *code == SqlState::UNDEFINED_COLUMN => {
                ReplicationError::Schema(format!(
                    "column missing on {}: {}",
                    table,
                    describe_postgres_error(&err)
                ))
            }
            _ => ReplicationError::Database(err),
        }
    }

    /// Classify an error raised while applying an upsert into `table`.
    pub fn from_upsert(table: &str, err: tokio_postgres::Error) -> Self {
        match err.code() {
            // class 23: integrity constraint violation
            Some(code) if code.code().starts_with("23") => {
                ReplicationError::upsert(table, describe_postgres_error(&err))
            }
            // class 22: data exception (bad cast of a transported value)
            Some(code) if code.code().starts_with("22") => {
                ReplicationError::upsert(table, describe_postgres_error(&err))
            }
            _ => Self::from_query(table, err),
        }
    }
}

/// Readable text for a driver error.
///
/// The driver's own `Display` is just "db error" for anything the server
/// reports, so server errors are rendered from their fields and client-side
/// errors from their cause chain.
pub fn describe_postgres_error(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        return render_server_error(
            db.code().code(),
            db.message(),
            db.detail(),
            db.hint(),
            db.constraint(),
        );
    }

    let mut text = err.to_string();
    let mut cause = std::error::Error::source(err);
    while let Some(inner) = cause {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        cause = std::error::Error::source(inner);
    }
    text
}

fn render_server_error(
    code: &str,
    message: &str,
    detail: Option<&str>,
    hint: Option<&str>,
    constraint: Option<&str>,
) -> String {
    let mut text = format!("{} (SQLSTATE {})", message, code);
    if let Some(constraint) = constraint {
        text.push_str(&format!(" [constraint {}]", constraint));
    }
    if let Some(detail) = detail {
        text.push_str(&format!(". {}", detail));
    }
    if let Some(hint) = hint {
        text.push_str(&format!(" Hint: {}", hint));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ReplicationError::schema("x").kind(), "schema");
        assert_eq!(
            ReplicationError::InvalidRange("10 > 1".to_string()).kind(),
            "invalid_range"
        );
        assert_eq!(ReplicationError::upsert("t", "boom").kind(), "upsert");
        assert!(ReplicationError::Cancelled { windows: 3 }.is_cancelled());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = ReplicationError::upsert("public.orders", "duplicate key value");
        assert_eq!(
            err.to_string(),
            "Upsert failed for public.orders: duplicate key value"
        );

        let err = ReplicationError::Cancelled { windows: 4 };
        assert!(err.to_string().contains("4 committed windows"));
    }

    #[test]
    fn test_server_error_rendering_keeps_detail() {
        let text = render_server_error(
            "23514",
            "new row for relation \"orders\" violates check constraint \"orders_n_check\"",
            Some("Failing row contains (25, 25)."),
            None,
            Some("orders_n_check"),
        );
        assert_eq!(
            text,
            "new row for relation \"orders\" violates check constraint \"orders_n_check\" \
             (SQLSTATE 23514) [constraint orders_n_check]. Failing row contains (25, 25)."
        );

        let text = render_server_error(
            "42703",
            "column \"updated\" does not exist",
            None,
            Some("Perhaps you meant to reference the column \"orders.update\"."),
            None,
        );
        assert!(text.starts_with("column \"updated\" does not exist (SQLSTATE 42703)"));
        assert!(text.ends_with("Hint: Perhaps you meant to reference the column \"orders.update\"."));
        assert!(!text.contains("db error"));
    }
}
