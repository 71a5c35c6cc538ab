// ABOUTME: PostgreSQL destination table - creates the table if missing and applies upserts
// ABOUTME: Each window's rows commit in one transaction, split to respect the bind parameter limit

use async_trait::async_trait;
use tokio_postgres::types::ToSql;

use crate::config::ReplicationConfig;
use crate::engine::backend::{DestinationTable, RowValues};
use crate::engine::descriptor::TableDescriptor;
use crate::engine::watermark::Watermark;
use crate::error::{ReplicationError, Result};
use crate::postgres::connection::PgConnection;
use crate::postgres::{catalog, sql};

/// The replicated table in the destination database.
pub struct PgDestination {
    conn: PgConnection,
    schema: String,
    table: String,
}

impl PgDestination {
    pub async fn connect(config: &ReplicationConfig) -> Result<Self> {
        let conn = PgConnection::connect(config, &config.destination_db).await?;
        Ok(Self::new(conn, config))
    }

    pub fn new(conn: PgConnection, config: &ReplicationConfig) -> Self {
        Self {
            conn,
            schema: config.schema.clone(),
            table: config.table.clone(),
        }
    }
}

#[async_trait]
impl DestinationTable for PgDestination {
    async fn prepare(&mut self, source: &TableDescriptor) -> Result<TableDescriptor> {
        let exists = catalog::table_exists(self.conn.client()?, &self.schema, &self.table).await?;
        if !exists {
            tracing::info!(
                "Table {} missing in destination '{}', creating it",
                source.display_name(),
                self.conn.database()
            );
            catalog::create_table(self.conn.client_mut()?, source).await?;
        }

        catalog::describe_table(
            self.conn.client()?,
            "destination",
            &self.schema,
            &self.table,
            &source.watermark_column,
        )
        .await
    }

    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        let row = self
            .conn
            .client()?
            .query_one(&sql::watermark_aggregate_query(table, "MAX"), &[])
            .await
            .map_err(|e| ReplicationError::from_query(&table.display_name(), e))?;
        Ok(row.get::<_, Option<i64>>(0).map(Watermark))
    }

    async fn upsert(&mut self, table: &TableDescriptor, rows: &[RowValues]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let table_name = table.display_name();
        let batch_size = sql::upsert_batch_size(table);

        let client = self.conn.client_mut()?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ReplicationError::from_query(&table_name, e))?;

        let mut total_affected = 0u64;
        for chunk in rows.chunks(batch_size) {
            let query = sql::upsert_query(table, chunk.len());

            // Flatten all row values into a single params vector
            let params: Vec<&(dyn ToSql + Sync)> = chunk
                .iter()
                .flat_map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)))
                .collect();

            total_affected += tx
                .execute(&query, &params)
                .await
                .map_err(|e| ReplicationError::from_upsert(&table_name, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| ReplicationError::from_upsert(&table_name, e))?;

        Ok(total_affected)
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.close().await
    }
}
