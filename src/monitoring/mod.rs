//! Run Monitoring Module
//!
//! Measures steps and reports on runs while they execute.
//!
//! # Components
//!
//! - [`MemoryProbe`]: Resident memory of the current process
//! - [`MetricsRecorder`]: Hands per-step samples to a metrics store
//! - [`ProgressBroadcaster`]: Per-run progress publish/subscribe
//! - [`MetricsReport`]: Bar chart of recorded samples

pub mod metrics;
pub mod progress;
pub mod report;
pub mod resource;

pub use metrics::{MetricsDrain, MetricsRecorder, MetricsSample, RecorderStats};
pub use progress::{
    ProgressBroadcaster, ProgressCallback, ProgressEvent, ProgressSnapshot, Subscription,
    SubscriptionId,
};
pub use report::MetricsReport;
pub use resource::{bytes_to_mb, MemoryProbe};
