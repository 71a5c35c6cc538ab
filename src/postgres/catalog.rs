// ABOUTME: Catalog queries - table existence, column reflection and primary keys
// ABOUTME: Builds the TableDescriptor the engine compares between source and destination

use tokio_postgres::Client;

use crate::engine::descriptor::{ColumnDescriptor, TableDescriptor};
use crate::error::{ReplicationError, Result};
use crate::postgres::sql;

/// Whether `schema.table` exists as a plain or partitioned table.
pub async fn table_exists(client: &Client, schema: &str, table: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                 SELECT 1
                 FROM pg_catalog.pg_class c
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                 WHERE n.nspname = $1
                   AND c.relname = $2
                   AND c.relkind IN ('r', 'p')
             )",
            &[&schema, &table],
        )
        .await
        .map_err(|e| ReplicationError::from_query(&format!("{}.{}", schema, table), e))?;

    Ok(row.get(0))
}

/// Columns in ordinal order with their full type (`format_type`) and
/// nullability. Dropped and generated columns are skipped: neither can be
/// written by an upsert.
pub async fn get_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let rows = client
        .query(
            "SELECT a.attname::text,
                    format_type(a.atttypid, a.atttypmod),
                    a.attnotnull
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1
               AND c.relname = $2
               AND a.attnum > 0
               AND NOT a.attisdropped
               AND a.attgenerated = ''
             ORDER BY a.attnum",
            &[&schema, &table],
        )
        .await
        .map_err(|e| ReplicationError::from_query(&format!("{}.{}", schema, table), e))?;

    Ok(rows
        .iter()
        .map(|row| ColumnDescriptor::new(row.get::<_, String>(0), row.get::<_, String>(1), row.get(2)))
        .collect())
}

/// Get primary key columns for a table, in key order.
pub async fn get_primary_key_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT a.attname::text
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             JOIN pg_class c ON c.oid = i.indrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE i.indisprimary
               AND n.nspname = $1
               AND c.relname = $2
             ORDER BY array_position(i.indkey, a.attnum)",
            &[&schema, &table],
        )
        .await
        .map_err(|e| ReplicationError::from_query(&format!("{}.{}", schema, table), e))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Reflect `schema.table` into a descriptor. `side` names the database in
/// error messages ("source" or "destination").
pub async fn describe_table(
    client: &Client,
    side: &str,
    schema: &str,
    table: &str,
    watermark_column: &str,
) -> Result<TableDescriptor> {
    if !table_exists(client, schema, table).await? {
        return Err(ReplicationError::schema(format!(
            "table {}.{} does not exist in the {} database",
            schema, table, side
        )));
    }

    let columns = get_columns(client, schema, table).await?;
    let primary_key = get_primary_key_columns(client, schema, table).await?;

    TableDescriptor::new(schema, table, columns, primary_key, watermark_column)
}

/// Create the table described by `table`, plus an index on its watermark column.
pub async fn create_table(client: &mut Client, table: &TableDescriptor) -> Result<()> {
    let table_name = table.display_name();
    let tx = client
        .transaction()
        .await
        .map_err(|e| ReplicationError::from_query(&table_name, e))?;

    tx.batch_execute(&sql::create_table_query(table))
        .await
        .map_err(|e| ReplicationError::from_query(&table_name, e))?;
    tx.batch_execute(&sql::create_watermark_index_query(table))
        .await
        .map_err(|e| ReplicationError::from_query(&table_name, e))?;

    tx.commit()
        .await
        .map_err(|e| ReplicationError::from_query(&table_name, e))?;

    tracing::info!(
        "Created {} with an index on {}",
        table_name,
        table.watermark_column
    );
    Ok(())
}
