// ABOUTME: Watermark-based incremental replication engine
// ABOUTME: Resolves a watermark, plans slices and windows, and merges them into the destination

pub mod backend;
pub mod cursor;
pub mod descriptor;
pub mod interval;
pub mod memory;
pub mod merge;
pub mod planner;
pub mod progress;
pub mod session;
pub mod watermark;

pub use backend::{DestinationTable, RowValues, SourceTable};
pub use cursor::{Window, WindowPlan, WindowedCursor};
pub use descriptor::{ColumnDescriptor, TableDescriptor};
pub use interval::{intervals, Intervals};
pub use memory::MemoryTable;
pub use merge::MergeEngine;
pub use planner::{CardinalityEstimator, Slice, SlicePlan, SlicePlanner};
pub use progress::{ProgressRecord, RunSummary};
pub use session::{replicate, Session, SessionState};
pub use watermark::{
    ResolvedWatermark, Watermark, WatermarkKind, WatermarkOrigin, WatermarkResolver,
};
