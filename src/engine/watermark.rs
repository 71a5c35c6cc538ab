// ABOUTME: Watermark values and the watermark resolver
// ABOUTME: Finds the lower bound of rows not yet confirmed replicated

use std::fmt;

use super::backend::{DestinationTable, SourceTable};
use super::descriptor::TableDescriptor;
use crate::error::{ReplicationError, Result};

/// A position in the watermark domain.
///
/// Integer watermark columns map to their own value. Timestamp columns map to
/// microseconds since the Unix epoch, so slice arithmetic is the same for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub i64);

impl Watermark {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The PostgreSQL type family of a watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkKind {
    /// smallint, integer or bigint
    Integer,
    /// timestamp without time zone
    Timestamp,
    /// timestamp with time zone
    TimestampTz,
}

impl WatermarkKind {
    /// Map a column type (as reported by `format_type`) to a watermark kind.
    pub fn from_data_type(data_type: &str) -> Option<Self> {
        match data_type {
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => {
                Some(WatermarkKind::Integer)
            }
            "timestamp without time zone" | "timestamp" => Some(WatermarkKind::Timestamp),
            "timestamp with time zone" | "timestamptz" => Some(WatermarkKind::TimestampTz),
            other if other.starts_with("timestamp(") => {
                if other.ends_with(" with time zone") {
                    Some(WatermarkKind::TimestampTz)
                } else {
                    Some(WatermarkKind::Timestamp)
                }
            }
            _ => None,
        }
    }

    /// Human-readable rendering of a watermark for log lines.
    pub fn render(self, watermark: Watermark) -> String {
        match self {
            WatermarkKind::Integer => watermark.to_string(),
            WatermarkKind::Timestamp | WatermarkKind::TimestampTz => {
                match chrono::DateTime::<chrono::Utc>::from_timestamp_micros(watermark.0) {
                    Some(ts) if self == WatermarkKind::Timestamp => {
                        ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
                    }
                    Some(ts) => ts.to_rfc3339(),
                    None => watermark.to_string(),
                }
            }
        }
    }
}

/// Where a resolved watermark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkOrigin {
    /// `MAX(watermark)` of rows already in the destination
    Destination,
    /// `MIN(watermark)` of the source: first-ever run
    SourceMinimum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWatermark {
    pub value: Watermark,
    pub origin: WatermarkOrigin,
}

/// Determines the lower bound of rows to replicate.
pub struct WatermarkResolver<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
}

impl<'a, S, D> WatermarkResolver<'a, S, D>
where
    S: SourceTable + ?Sized,
    D: DestinationTable + ?Sized,
{
    pub fn new(source: &'a S, destination: &'a D) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Resolve the watermark for this run.
    ///
    /// Returns `None` when both the destination and the source are empty.
    pub async fn resolve(&self, table: &TableDescriptor) -> Result<Option<ResolvedWatermark>> {
        if table.column(&table.watermark_column).is_none() {
            return Err(ReplicationError::schema(format!(
                "watermark column '{}' does not exist on {}",
                table.watermark_column,
                table.display_name()
            )));
        }

        if let Some(value) = self.destination.max_watermark(table).await? {
            tracing::debug!(
                "Destination {} holds rows up to watermark {}",
                table.display_name(),
                table.watermark_kind.render(value)
            );
            return Ok(Some(ResolvedWatermark {
                value,
                origin: WatermarkOrigin::Destination,
            }));
        }

        let minimum = self.source.min_watermark(table).await?;
        if let Some(value) = minimum {
            tracing::info!(
                "Destination {} is empty, starting from the source minimum {}",
                table.display_name(),
                table.watermark_kind.render(value)
            );
        }

        Ok(minimum.map(|value| ResolvedWatermark {
            value,
            origin: WatermarkOrigin::SourceMinimum,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_data_type() {
        assert_eq!(
            WatermarkKind::from_data_type("bigint"),
            Some(WatermarkKind::Integer)
        );
        assert_eq!(
            WatermarkKind::from_data_type("timestamp(3) without time zone"),
            Some(WatermarkKind::Timestamp)
        );
        assert_eq!(
            WatermarkKind::from_data_type("timestamp(6) with time zone"),
            Some(WatermarkKind::TimestampTz)
        );
        assert_eq!(
            WatermarkKind::from_data_type("timestamp with time zone"),
            Some(WatermarkKind::TimestampTz)
        );
        assert_eq!(WatermarkKind::from_data_type("text"), None);
        assert_eq!(WatermarkKind::from_data_type("numeric(10,2)"), None);
    }

    #[test]
    fn test_render() {
        assert_eq!(WatermarkKind::Integer.render(Watermark(42)), "42");
        assert_eq!(
            WatermarkKind::Timestamp.render(Watermark(1_500_000)),
            "1970-01-01 00:00:01.500000"
        );
        assert!(WatermarkKind::TimestampTz
            .render(Watermark(0))
            .starts_with("1970-01-01T00:00:00"));
    }

    #[test]
    fn test_watermark_ordering() {
        assert!(Watermark(10) < Watermark(30));
        assert_eq!(Watermark(7).value(), 7);
    }

    mod resolver {
        use super::super::*;
        use crate::engine::descriptor::ColumnDescriptor;
        use crate::engine::memory::MemoryTable;

        fn table() -> TableDescriptor {
            TableDescriptor::new(
                "public",
                "readings",
                vec![
                    ColumnDescriptor::new("id", "integer", true),
                    ColumnDescriptor::new("updated", "bigint", true),
                ],
                vec!["id".to_string()],
                "updated",
            )
            .unwrap()
        }

        fn seeded(marks: &[i64]) -> MemoryTable {
            let store = MemoryTable::new(table());
            for (id, mark) in marks.iter().enumerate() {
                store
                    .insert(vec![Some(id.to_string()), Some(mark.to_string())])
                    .unwrap();
            }
            store
        }

        #[tokio::test]
        async fn test_empty_destination_uses_source_minimum() {
            let source = seeded(&[10, 25, 50]);
            let destination = MemoryTable::new(table());

            let resolved = WatermarkResolver::new(&source, &destination)
                .resolve(&table())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(resolved.value, Watermark(10));
            assert_eq!(resolved.origin, WatermarkOrigin::SourceMinimum);
        }

        #[tokio::test]
        async fn test_destination_maximum_wins() {
            let source = seeded(&[10, 25, 50]);
            let destination = seeded(&[10, 30]);

            let resolved = WatermarkResolver::new(&source, &destination)
                .resolve(&table())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(resolved.value, Watermark(30));
            assert_eq!(resolved.origin, WatermarkOrigin::Destination);
        }

        #[tokio::test]
        async fn test_both_empty_resolves_to_nothing() {
            let source = MemoryTable::new(table());
            let destination = MemoryTable::new(table());

            let resolved = WatermarkResolver::new(&source, &destination)
                .resolve(&table())
                .await
                .unwrap();
            assert!(resolved.is_none());
        }
    }
}
