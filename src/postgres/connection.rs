// ABOUTME: PostgreSQL connection handling - TLS setup, connect, and orderly shutdown
// ABOUTME: Each handle owns its client plus the background task driving the socket

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::Client;

use crate::config::ReplicationConfig;
use crate::error::{describe_postgres_error, ReplicationError, Result};

/// Session settings applied to every connection so values rendered as text
/// on the source parse back identically on the destination.
const SESSION_OPTIONS: &str = "-c DateStyle=ISO,YMD -c IntervalStyle=postgres -c extra_float_digits=3";

const APPLICATION_NAME: &str = "watermark-replicator";

/// An open connection to one database.
pub struct PgConnection {
    client: Option<Client>,
    task: Option<JoinHandle<()>>,
    database: String,
}

impl PgConnection {
    /// Connect to `database` on the configured server.
    ///
    /// TLS is attempted first and plain TCP used when the server does not
    /// offer it. Certificate checks are skipped only when the configuration
    /// allows self-signed certificates.
    pub async fn connect(config: &ReplicationConfig, database: &str) -> Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .dbname(database)
            .application_name(APPLICATION_NAME)
            .options(SESSION_OPTIONS)
            .connect_timeout(config.connect_timeout())
            .ssl_mode(SslMode::Prefer);
        if let Some(password) = &config.password {
            pg_config.password(password);
        }

        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(config.allow_self_signed_certs)
            .build()
            .map_err(|e| {
                ReplicationError::Connectivity(format!("Failed to build TLS connector: {}", e))
            })?;
        let tls = MakeTlsConnector::new(connector);

        tracing::debug!(
            "Connecting to {}",
            crate::utils::describe_connection(&config.user, &config.host, config.port, database)
        );

        let (client, connection) = pg_config
            .connect(tls)
            .await
            .map_err(|e| ReplicationError::from_connect(database, e))?;

        let name = database.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(
                    "Connection to '{}' failed: {}",
                    name,
                    describe_postgres_error(&e)
                );
            }
        });

        Ok(Self {
            client: Some(client),
            task: Some(task),
            database: database.to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| self.closed_error())
    }

    pub fn client_mut(&mut self) -> Result<&mut Client> {
        match self.client.as_mut() {
            Some(client) => Ok(client),
            None => Err(ReplicationError::Connectivity(format!(
                "connection to '{}' is closed",
                self.database
            ))),
        }
    }

    /// Drop the client and wait for the connection task to finish.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        // Dropping the client makes the connection future resolve.
        self.client.take();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ReplicationError::Connectivity(format!(
                    "connection task for '{}' did not shut down cleanly: {}",
                    self.database, e
                ))
            })?;
            tracing::debug!("Closed connection to '{}'", self.database);
        }
        Ok(())
    }

    fn closed_error(&self) -> ReplicationError {
        ReplicationError::Connectivity(format!("connection to '{}' is closed", self.database))
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.client.is_some() {
            tracing::debug!("Connection to '{}' dropped without close", self.database);
        }
    }
}
