// ABOUTME: Library root for watermark-replicator
// ABOUTME: Incremental, resumable table replication driven by a monotonically increasing column

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod postgres;
pub mod utils;

pub use config::{EngineOptions, IntegerClock, ReplicationConfig};
pub use engine::{
    replicate, DestinationTable, MemoryTable, ProgressRecord, RunSummary, Session,
    SessionState, SourceTable, TableDescriptor, Watermark,
};
pub use error::{ReplicationError, Result};
