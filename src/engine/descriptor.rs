// ABOUTME: TableDescriptor - the reflected structure of the replicated table
// ABOUTME: Fetched once per run and shared read-only with every engine component

use super::watermark::WatermarkKind;
use crate::error::{ReplicationError, Result};
use crate::utils::qualified_name;

/// A single column: name and formatted PostgreSQL type (e.g. `numeric(10,2)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, not_null: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null,
        }
    }
}

/// Structure of the replicated table, identical on source and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Primary-key column names in key order
    pub primary_key: Vec<String>,
    pub watermark_column: String,
    pub watermark_kind: WatermarkKind,
}

impl TableDescriptor {
    /// Build a descriptor, checking the invariants the engine relies on:
    /// a non-empty primary key made of existing columns, and a watermark
    /// column of a supported type.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        primary_key: Vec<String>,
        watermark_column: impl Into<String>,
    ) -> Result<Self> {
        let schema = schema.into();
        let name = name.into();
        let watermark_column = watermark_column.into();
        let table_name = format!("{}.{}", schema, name);

        if columns.is_empty() {
            return Err(ReplicationError::schema(format!(
                "table {} has no columns",
                table_name
            )));
        }

        if primary_key.is_empty() {
            return Err(ReplicationError::schema(format!(
                "table {} has no primary key; upserts require one",
                table_name
            )));
        }

        if let Some(missing) = primary_key
            .iter()
            .find(|pk| !columns.iter().any(|c| &c.name == *pk))
        {
            return Err(ReplicationError::schema(format!(
                "primary key column '{}' is not a column of {}",
                missing, table_name
            )));
        }

        let watermark = columns
            .iter()
            .find(|c| c.name == watermark_column)
            .ok_or_else(|| {
                ReplicationError::schema(format!(
                    "watermark column '{}' does not exist on {}",
                    watermark_column, table_name
                ))
            })?;

        let watermark_kind = WatermarkKind::from_data_type(&watermark.data_type).ok_or_else(|| {
            ReplicationError::schema(format!(
                "watermark column '{}' on {} has unsupported type '{}' \
                 (expected an integer or timestamp type)",
                watermark_column, table_name, watermark.data_type
            ))
        })?;

        Ok(Self {
            schema,
            name,
            columns,
            primary_key,
            watermark_column,
            watermark_kind,
        })
    }

    /// `schema.table` without quoting, for messages.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."table"` for SQL.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema, &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == column)
    }

    /// Position of the watermark column within a row.
    pub fn watermark_index(&self) -> usize {
        // Checked at construction
        self.column_index(&self.watermark_column).unwrap_or(0)
    }

    /// Positions of the primary-key columns within a row, in key order.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.column_index(pk))
            .collect()
    }

    /// Verify that `other` (the destination) has the same structure.
    ///
    /// Nullability is not compared; the destination may be looser.
    pub fn ensure_matches(&self, other: &TableDescriptor) -> Result<()> {
        if self.columns.len() != other.columns.len() {
            return Err(ReplicationError::schema(format!(
                "destination {} has {} columns, source has {}",
                other.display_name(),
                other.columns.len(),
                self.columns.len()
            )));
        }

        for (src, dst) in self.columns.iter().zip(other.columns.iter()) {
            if src.name != dst.name || src.data_type != dst.data_type {
                return Err(ReplicationError::schema(format!(
                    "column mismatch on {}: source has {} {}, destination has {} {}",
                    other.display_name(),
                    src.name,
                    src.data_type,
                    dst.name,
                    dst.data_type
                )));
            }
        }

        if self.primary_key != other.primary_key {
            return Err(ReplicationError::schema(format!(
                "primary key mismatch on {}: source ({}), destination ({})",
                other.display_name(),
                self.primary_key.join(", "),
                other.primary_key.join(", ")
            )));
        }

        Ok(())
    }
}
