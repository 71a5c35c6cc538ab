// ABOUTME: CLI entry point for watermark-replicator
// ABOUTME: Parses arguments, builds the replication config and routes to single or continuous mode

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use watermark_replicator::commands;
use watermark_replicator::config::{IntegerClock, ReplicationConfig};

#[derive(Parser)]
#[command(name = "watermark-replicator")]
#[command(
    about = "Incrementally sync a PostgreSQL table into another database on the same server",
    long_about = "Copies rows whose watermark column (default: updated) is newer than anything \
                  the destination already holds, upserting by primary key. Both tables must be \
                  on the same server; the destination table is created if it does not exist."
)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug)]
struct ConnectionArgs {
    /// Source database
    #[arg(required_unless_present = "config")]
    source_db: Option<String>,
    /// Destination database
    #[arg(required_unless_present = "config")]
    destination_db: Option<String>,
    /// Table to sync (same name in both databases)
    #[arg(required_unless_present = "config")]
    table: Option<String>,
    /// Database user
    #[arg(required_unless_present = "config")]
    username: Option<String>,
    /// Path to a TOML config file; command-line values override it
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Hostname [default: localhost]
    #[arg(short = 'H', long = "hostname")]
    host: Option<String>,
    /// Port [default: 5432]
    #[arg(short = 'p', long)]
    port: Option<u16>,
    /// Maximum rows per window (at most 10000) [default: 10000]
    #[arg(short = 'c', long = "chunksize")]
    chunk_size: Option<usize>,
    /// Password (falls back to PGPASSWORD, then a prompt)
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Schema of the table [default: public]
    #[arg(long)]
    schema: Option<String>,
    /// Watermark column [default: updated]
    #[arg(long = "watermark-column")]
    watermark_column: Option<String>,
    /// Target estimated rows per slice [default: 10000000]
    #[arg(long = "slice-ceiling")]
    slice_ceiling: Option<u64>,
    /// Run start bound for integer watermarks: source-max or epoch-millis [default: source-max]
    #[arg(long = "integer-clock")]
    integer_clock: Option<IntegerClock>,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", default_value_t = false)]
    allow_self_signed_certs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync once, up to the moment the run started, then exit
    Single {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Sync repeatedly, waiting between runs, until Ctrl+C
    Continuous {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Seconds to wait between runs
        #[arg(short = 'd', long, default_value_t = 5)]
        delay: u64,
    },
}

impl ConnectionArgs {
    /// Start from the config file (or defaults) and apply command-line overrides.
    fn into_config(self) -> anyhow::Result<ReplicationConfig> {
        let mut config = match &self.config {
            Some(path) => ReplicationConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ReplicationConfig::default(),
        };

        if let Some(source_db) = self.source_db {
            config.source_db = source_db;
        }
        if let Some(destination_db) = self.destination_db {
            config.destination_db = destination_db;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(user) = self.username {
            config.user = user;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(schema) = self.schema {
            config.schema = schema;
        }
        if let Some(watermark_column) = self.watermark_column {
            config.watermark_column = watermark_column;
        }
        if let Some(slice_ceiling) = self.slice_ceiling {
            config.slice_ceiling = slice_ceiling;
        }
        if let Some(integer_clock) = self.integer_clock {
            config.integer_clock = integer_clock;
        }
        if self.allow_self_signed_certs {
            config.allow_self_signed_certs = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Ask for the password when none was given and someone is there to answer.
fn prompt_password(config: &mut ReplicationConfig) -> anyhow::Result<()> {
    if config.password.is_some() || !std::io::stdin().is_terminal() {
        return Ok(());
    }
    let password = inquire::Password::new(&format!("Password for {}:", config.user))
        .without_confirmation()
        .prompt()
        .context("Failed to read password")?;
    config.password = Some(password);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // We need to parse CLI args early to get the log level
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Single { connection } => {
            let mut config = connection.into_config()?;
            prompt_password(&mut config)?;

            tracing::info!("Starting single-time mode");
            let stop = commands::stop_on_ctrl_c();
            commands::single(&config, &stop).await?;
        }
        Commands::Continuous { connection, delay } => {
            let mut config = connection.into_config()?;
            prompt_password(&mut config)?;

            tracing::info!("Starting continuous mode, {}s between runs", delay);
            tracing::info!("Press Ctrl+C to stop");
            let stop = commands::stop_on_ctrl_c();
            commands::continuous(&config, Duration::from_secs(delay), stop).await?;
        }
    }

    Ok(())
}
