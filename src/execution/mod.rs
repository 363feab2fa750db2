//! Pipeline Execution Module
//!
//! Runs pipelines: leaf step measurement, progress accounting and worker
//! thread management.
//!
//! # Architecture
//!
//! - [`runner`]: Worker-thread runs with terminal events
//! - [`step`]: Execution of a single leaf step
//! - [`tracker`]: Progress cursor over the flattened plan

pub mod runner;
pub mod step;
pub mod tracker;

pub use runner::{RunHandle, Runner};
pub use tracker::ProgressTracker;
