use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MetricsStore;
use crate::error::StoreError;
use crate::monitoring::MetricsSample;

/// Keeps samples in memory, keyed by run identifier.
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    runs: RwLock<HashMap<String, Vec<MetricsSample>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers of every run with at least one sample.
    pub async fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn append(&self, run_id: &str, sample: &MetricsSample) -> Result<(), StoreError> {
        self.runs
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn fetch(&self, run_id: &str) -> Result<Vec<MetricsSample>, StoreError> {
        Ok(self.runs.read().await.get(run_id).cloned().unwrap_or_default())
    }
}
