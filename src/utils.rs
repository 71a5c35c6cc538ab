// ABOUTME: Utility functions for identifier handling and safe display
// ABOUTME: Provides identifier validation, SQL quoting, and credential redaction

use crate::error::{ReplicationError, Result};

/// Validate a PostgreSQL identifier (database, schema, table or column name).
///
/// Only plain identifiers are accepted: a letter or underscore followed by
/// letters, digits or underscores, at most 63 characters.
///
/// # Examples
///
/// ```
/// # use watermark_replicator::utils::validate_postgres_identifier;
/// assert!(validate_postgres_identifier("orders").is_ok());
/// assert!(validate_postgres_identifier("_private").is_ok());
/// assert!(validate_postgres_identifier("123db").is_err());
/// assert!(validate_postgres_identifier("my-table").is_err());
/// ```
pub fn validate_postgres_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(ReplicationError::Config(
            "Identifier cannot be empty or whitespace-only".to_string(),
        ));
    }

    if trimmed.len() > 63 {
        return Err(ReplicationError::Config(format!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        )));
    }

    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(ReplicationError::Config(format!(
                "Identifier '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(trimmed),
                first
            )));
        }
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(ReplicationError::Config(format!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }

    Ok(())
}

/// Strip control characters and cap the length of an identifier for display.
///
/// ```
/// # use watermark_replicator::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Schema-qualified, quoted table name: `"schema"."table"`.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Describe a connection target for logs without exposing the password.
///
/// ```
/// # use watermark_replicator::utils::describe_connection;
/// assert_eq!(
///     describe_connection("alice", "db.internal", 5432, "sales"),
///     "postgresql://alice@db.internal:5432/sales"
/// );
/// ```
pub fn describe_connection(user: &str, host: &str, port: u16, database: &str) -> String {
    format!("postgresql://{}@{}:{}/{}", user, host, port, database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_rejects_injection() {
        assert!(validate_postgres_identifier("db\"; DROP TABLE users; --").is_err());
        assert!(validate_postgres_identifier("   ").is_err());
        assert!(validate_postgres_identifier(&"a".repeat(64)).is_err());
        assert!(validate_postgres_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("public", "orders"), "\"public\".\"orders\"");
    }
}
