// ABOUTME: PostgreSQL implementations of the engine's source and destination tables
// ABOUTME: Both databases live on the same server and are reached with the same credentials

pub mod catalog;
pub mod connection;
pub mod destination;
pub mod source;
pub mod sql;

pub use connection::PgConnection;
pub use destination::PgDestination;
pub use source::PgSource;

use crate::config::ReplicationConfig;
use crate::engine::backend::SourceTable;
use crate::engine::session::Session;
use crate::error::Result;

/// Validate `config` and connect to both databases.
pub async fn connect(config: &ReplicationConfig) -> Result<(PgSource, PgDestination)> {
    config.validate()?;

    tracing::info!(
        "Replicating {}.{} from {} to {}",
        config.schema,
        config.table,
        config.source_display(),
        config.destination_display()
    );

    let mut source = PgSource::connect(config).await?;
    match PgDestination::connect(config).await {
        Ok(destination) => Ok((source, destination)),
        Err(e) => {
            if let Err(close_err) = SourceTable::close(&mut source).await {
                tracing::warn!("Failed to close source connection: {}", close_err);
            }
            Err(e)
        }
    }
}

/// Connect to both databases and wrap them in a session.
pub async fn open_session(config: &ReplicationConfig) -> Result<Session<PgSource, PgDestination>> {
    let (source, destination) = connect(config).await?;
    Ok(Session::new(source, destination, config.engine_options()))
}
