// ABOUTME: Configuration for a replication run
// ABOUTME: Connection parameters, engine limits, TOML loading and validation

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{ReplicationError, Result};
use crate::utils::{describe_connection, validate_postgres_identifier};

/// Hard ceiling for rows fetched and upserted per window.
pub const MAX_CHUNK_SIZE: usize = 10_000;

/// Default ceiling for the estimated row count of a single slice.
pub const DEFAULT_SLICE_CEILING: u64 = 10_000_000;

/// Default watermark column name.
pub const DEFAULT_WATERMARK_COLUMN: &str = "updated";

/// How the run start bound is captured for integer (ordinal) watermark columns.
///
/// Timestamp columns always use the source server's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegerClock {
    /// One past `MAX(watermark)` on the source at planning time
    #[default]
    SourceMax,
    /// Local wall clock in milliseconds since the Unix epoch
    EpochMillis,
}

impl std::str::FromStr for IntegerClock {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source-max" => Ok(IntegerClock::SourceMax),
            "epoch-millis" => Ok(IntegerClock::EpochMillis),
            other => Err(ReplicationError::Config(format!(
                "Unknown integer clock '{}' (expected source-max or epoch-millis)",
                other
            ))),
        }
    }
}

/// Engine-facing limits, shared by the planner, cursor and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum rows per window
    pub chunk_size: usize,
    /// Target estimated rows per slice
    pub slice_ceiling: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            slice_ceiling: DEFAULT_SLICE_CEILING,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ReplicationError::Config(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ReplicationError::Config(format!(
                "Chunk size must be lower or equal to {} (got {})",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.slice_ceiling == 0 {
            return Err(ReplicationError::Config(
                "Slice ceiling must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to replicate one table between two databases on the
/// same server.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub source_db: String,
    pub destination_db: String,
    pub schema: String,
    pub table: String,
    pub watermark_column: String,
    pub chunk_size: usize,
    pub slice_ceiling: u64,
    pub integer_clock: IntegerClock,
    pub allow_self_signed_certs: bool,
    pub connect_timeout_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: None,
            source_db: String::new(),
            destination_db: String::new(),
            schema: "public".to_string(),
            table: String::new(),
            watermark_column: DEFAULT_WATERMARK_COLUMN.to_string(),
            chunk_size: MAX_CHUNK_SIZE,
            slice_ceiling: DEFAULT_SLICE_CEILING,
            integer_clock: IntegerClock::default(),
            allow_self_signed_certs: false,
            connect_timeout_secs: 10,
        }
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ReplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("source_db", &self.source_db)
            .field("destination_db", &self.destination_db)
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("watermark_column", &self.watermark_column)
            .field("chunk_size", &self.chunk_size)
            .field("slice_ceiling", &self.slice_ceiling)
            .field("integer_clock", &self.integer_clock)
            .field("allow_self_signed_certs", &self.allow_self_signed_certs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ReplicationConfig {
    /// Load a configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ReplicationError::Config(format!("Invalid config file: {}", e)))
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            chunk_size: self.chunk_size,
            slice_ceiling: self.slice_ceiling,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Redacted description of the source connection, for logs.
    pub fn source_display(&self) -> String {
        describe_connection(&self.user, &self.host, self.port, &self.source_db)
    }

    /// Redacted description of the destination connection, for logs.
    pub fn destination_display(&self) -> String {
        describe_connection(&self.user, &self.host, self.port, &self.destination_db)
    }

    /// Check that every value is usable before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ReplicationError::Config("Host must be provided".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(ReplicationError::Config(
                "Username must be provided".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ReplicationError::Config("Port must be non-zero".to_string()));
        }

        for (what, value) in [
            ("source database", &self.source_db),
            ("destination database", &self.destination_db),
            ("schema", &self.schema),
            ("table", &self.table),
            ("watermark column", &self.watermark_column),
        ] {
            validate_postgres_identifier(value).map_err(|e| match e {
                ReplicationError::Config(msg) => {
                    ReplicationError::Config(format!("Invalid {}: {}", what, msg))
                }
                other => other,
            })?;
        }

        if self.source_db == self.destination_db {
            return Err(ReplicationError::Config(format!(
                "Source and destination databases must differ (both are '{}')",
                self.source_db
            )));
        }

        self.engine_options().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ReplicationConfig {
        ReplicationConfig {
            user: "replicator".to_string(),
            password: Some("secret".to_string()),
            source_db: "sales".to_string(),
            destination_db: "sales_copy".to_string(),
            table: "orders".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, "public");
        assert_eq!(config.watermark_column, "updated");
        assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
        assert_eq!(config.slice_ceiling, DEFAULT_SLICE_CEILING);
        assert_eq!(config.integer_clock, IntegerClock::SourceMax);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut config = valid_config();
        config.chunk_size = MAX_CHUNK_SIZE + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lower or equal to 10000"));

        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config.chunk_size = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.destination_db = config.source_db.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_table_identifier_rejected() {
        let mut config = valid_config();
        config.table = "orders; drop".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid table"));
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let config = ReplicationConfig::from_toml(
            r#"
            user = "replicator"
            source_db = "sales"
            destination_db = "sales_copy"
            table = "orders"
            watermark_column = "modified_at"
            chunk_size = 500
            integer_clock = "epoch-millis"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.watermark_column, "modified_at");
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.integer_clock, IntegerClock::EpochMillis);
        assert!(config.password.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_unknown_clock() {
        assert!(ReplicationConfig::from_toml("integer_clock = \"sundial\"").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", valid_config());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_display_strings_have_no_password() {
        let config = valid_config();
        assert_eq!(
            config.source_display(),
            "postgresql://replicator@localhost:5432/sales"
        );
        assert!(!config.destination_display().contains("secret"));
    }

    #[test]
    fn test_integer_clock_from_str() {
        assert_eq!(
            "epoch-millis".parse::<IntegerClock>().unwrap(),
            IntegerClock::EpochMillis
        );
        assert!("hourglass".parse::<IntegerClock>().is_err());
    }
}
