//! Metrics Persistence Module
//!
//! Stores the per-step samples of each run. The recorder's drain task is
//! the only writer during a run; readers use [`MetricsStore::fetch`].
//!
//! - [`InMemoryMetricsStore`]: Process-local map, for tests and embedding
//! - [`JsonFileMetricsStore`]: One JSON document per run under a directory

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::monitoring::MetricsSample;

pub use file::JsonFileMetricsStore;
pub use memory::InMemoryMetricsStore;

/// Persistent, per-run collection of metric samples.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Appends a sample to the run's collection, creating it if needed.
    async fn append(&self, run_id: &str, sample: &MetricsSample) -> Result<(), StoreError>;

    /// Returns the run's samples in append order; empty for unknown runs.
    async fn fetch(&self, run_id: &str) -> Result<Vec<MetricsSample>, StoreError>;
}
