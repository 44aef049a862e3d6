//! Conversion orchestrator.
//!
//! Coordinates one job at a time per call: validation, concurrency slot,
//! temp artifacts, backend invocation, publish and cleanup.

mod runner;
mod types;

pub use runner::Orchestrator;
pub use types::{ArtifactResult, ConversionResult, JobObserver, JobReport, JobState};
