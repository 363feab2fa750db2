//! Step Metrics
//!
//! Per-step timing and memory samples, and the recorder that hands them off
//! from worker threads to a [`MetricsStore`] living on a tokio runtime.
//!
//! The hand-off is a channel: `record` enqueues without blocking, and a
//! drain task on the runtime appends each sample to the store in order.
//! Failed hand-offs and failed appends are logged and counted, never
//! returned to the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::resource::bytes_to_mb;
use crate::store::MetricsStore;

/// Timing and memory measurement for one executed leaf step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Name of the step
    pub step: String,
    /// Description of the step
    pub description: String,
    /// Wall-clock duration in seconds
    pub duration_secs: f64,
    /// Change in resident memory in megabytes (may be negative)
    pub memory_delta_mb: f64,
    /// When the sample was taken
    pub recorded_at: DateTime<Utc>,
}

impl MetricsSample {
    pub fn new(
        step: impl Into<String>,
        description: impl Into<String>,
        duration: Duration,
        memory_delta_bytes: i64,
    ) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
            duration_secs: duration.as_secs_f64(),
            memory_delta_mb: bytes_to_mb(memory_delta_bytes),
            recorded_at: Utc::now(),
        }
    }
}

type PersistJob = (String, MetricsSample);

/// Counters shared by a recorder and its drain.
#[derive(Debug, Default)]
pub struct RecorderStats {
    persisted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl RecorderStats {
    /// Samples appended to the store.
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Samples the store rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Samples that could not be handed off because the drain was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Scheduler handle carried in the context; hands samples to the drain.
///
/// Cloning is cheap and every clone feeds the same drain. The drain stops
/// once all clones are dropped.
#[derive(Clone, Debug)]
pub struct MetricsRecorder {
    sender: UnboundedSender<PersistJob>,
    stats: Arc<RecorderStats>,
}

impl MetricsRecorder {
    /// Creates a recorder and the drain that receives its samples.
    pub fn channel() -> (Self, MetricsDrain) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(RecorderStats::default());

        (
            Self {
                sender,
                stats: Arc::clone(&stats),
            },
            MetricsDrain { receiver, stats },
        )
    }

    /// Creates a recorder whose drain runs on `scheduler`, appending to
    /// `store`.
    ///
    /// The returned task finishes after every recorder clone is dropped
    /// and all queued samples have been appended.
    pub fn spawn(store: Arc<dyn MetricsStore>, scheduler: &Handle) -> (Self, JoinHandle<()>) {
        let (recorder, drain) = Self::channel();
        let task = scheduler.spawn(drain.run(store));
        (recorder, task)
    }

    /// Enqueues a sample for persistence without waiting.
    pub fn record(&self, run_id: &str, sample: MetricsSample) {
        if let Err(e) = self.sender.send((run_id.to_string(), sample)) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                "Run '{}': metrics for step '{}' could not be scheduled: drain stopped",
                run_id, (e.0).1.step
            );
        }
    }

    /// Counters shared with the drain; stays readable after the drain ends.
    pub fn stats(&self) -> Arc<RecorderStats> {
        Arc::clone(&self.stats)
    }
}

/// Receiving end of a [`MetricsRecorder`].
pub struct MetricsDrain {
    receiver: UnboundedReceiver<PersistJob>,
    stats: Arc<RecorderStats>,
}

impl MetricsDrain {
    /// Appends queued samples to the store until every recorder is dropped.
    pub async fn run(mut self, store: Arc<dyn MetricsStore>) {
        while let Some((run_id, sample)) = self.receiver.recv().await {
            match store.append(&run_id, &sample).await {
                Ok(()) => {
                    self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                    debug!("Run '{}': persisted metrics for '{}'", run_id, sample.step);
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Run '{}': failed to persist metrics for '{}': {}",
                        run_id, sample.step, e
                    );
                }
            }
        }
    }

    /// Takes every sample queued so far without a store.
    pub fn take_pending(&mut self) -> Vec<(String, MetricsSample)> {
        let mut pending = Vec::new();
        while let Ok(job) = self.receiver.try_recv() {
            pending.push(job);
        }
        pending
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }
}
