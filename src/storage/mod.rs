pub mod log;

// Re-export the segment engine for convenience
pub use log::{SegmentEngineOptions, SegmentLogEngine};
