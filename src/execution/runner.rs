//! Pipeline Runner
//!
//! Runs pipelines on dedicated worker threads:
//! - One worker thread per run
//! - At most one active run per run identifier
//! - Terminal `completed`/`failed` events for observers
//!
//! Distinct runs execute concurrently, each with its own context. The only
//! state shared between them is the progress broadcaster, which is keyed by
//! run identifier.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, info};

use crate::error::EngineError;
use crate::monitoring::{ProgressBroadcaster, ProgressEvent};
use crate::pipeline::{Context, Pipeline};

/// Spawns pipeline runs on worker threads.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use steprunner::execution::Runner;
/// use steprunner::monitoring::MetricsRecorder;
/// use steprunner::pipeline::{Context, Pipeline};
/// use steprunner::store::InMemoryMetricsStore;
///
/// # fn build() -> Pipeline { unimplemented!() }
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let runtime = tokio::runtime::Runtime::new()?;
///     let store = Arc::new(InMemoryMetricsStore::new());
///     let (recorder, _drain) = MetricsRecorder::spawn(store, runtime.handle());
///
///     let runner = Runner::new();
///     let context = Context::new().with_run_id("r1").with_scheduler(recorder);
///     let context = runner.spawn(Arc::new(build()), context)?.join()?;
///
///     println!("{} steps measured", context.metrics().len());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Runner {
    broadcaster: Arc<ProgressBroadcaster>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Runner {
    /// Creates a runner with its own progress broadcaster.
    pub fn new() -> Self {
        Self::with_broadcaster(Arc::new(ProgressBroadcaster::new()))
    }

    /// Creates a runner publishing to an existing broadcaster.
    pub fn with_broadcaster(broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self {
            broadcaster,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Returns true while a run with this identifier is executing.
    pub fn is_active(&self, run_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    /// Starts a run on a new worker thread.
    ///
    /// Preconditions are checked here, before the thread starts:
    /// the context needs a run identifier and a scheduler handle, and no
    /// other run with the same identifier may be active.
    pub fn spawn(&self, pipeline: Arc<Pipeline>, context: Context) -> Result<RunHandle, EngineError> {
        let run_id = context.require_run_id()?.to_string();
        if context.scheduler().is_none() {
            return Err(EngineError::MissingScheduler {
                step: pipeline.name().to_string(),
            });
        }

        let guard = ActiveRun::claim(Arc::clone(&self.active), &run_id)?;
        let broadcaster = Arc::clone(&self.broadcaster);
        let worker_run_id = run_id.clone();

        let handle = thread::Builder::new()
            .name(format!("run-{}", run_id))
            .spawn(move || {
                let _guard = guard;
                execute_run(&pipeline, context, &broadcaster, &worker_run_id)
            })
            .map_err(|e| EngineError::Worker {
                run_id: run_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(RunHandle { run_id, handle })
    }

    /// Runs a pipeline on a worker thread and waits for it.
    pub fn run(&self, pipeline: Arc<Pipeline>, context: Context) -> Result<Context, EngineError> {
        self.spawn(pipeline, context)?.join()
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of a worker thread.
fn execute_run(
    pipeline: &Pipeline,
    mut context: Context,
    broadcaster: &ProgressBroadcaster,
    run_id: &str,
) -> Result<Context, EngineError> {
    let started = Instant::now();

    match pipeline.run(&mut context, broadcaster) {
        Ok(()) => {
            info!(
                "Run '{}' completed: {} steps in {:.2?}",
                run_id,
                context.metrics().len(),
                started.elapsed()
            );
            broadcaster.publish_event(
                run_id,
                &ProgressEvent::Completed {
                    run_id: run_id.to_string(),
                },
            );
            Ok(context)
        }
        Err(e) => {
            error!("Run '{}' failed after {:.2?}: {}", run_id, started.elapsed(), e);
            broadcaster.publish_event(
                run_id,
                &ProgressEvent::Failed {
                    run_id: run_id.to_string(),
                    step: e.failed_step().map(str::to_string),
                    error: e.to_string(),
                },
            );
            Err(e)
        }
    }
}

/// Handle to a run executing on a worker thread.
pub struct RunHandle {
    run_id: String,
    handle: JoinHandle<Result<Context, EngineError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run, returning its final context or first error.
    pub fn join(self) -> Result<Context, EngineError> {
        self.handle.join().map_err(|_| EngineError::Worker {
            run_id: self.run_id.clone(),
            reason: "worker thread panicked".to_string(),
        })?
    }
}

/// Marks a run identifier as active until dropped.
struct ActiveRun {
    active: Arc<Mutex<HashSet<String>>>,
    run_id: String,
}

impl ActiveRun {
    fn claim(active: Arc<Mutex<HashSet<String>>>, run_id: &str) -> Result<Self, EngineError> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.to_string());

        if !inserted {
            return Err(EngineError::RunAlreadyActive(run_id.to_string()));
        }

        Ok(Self {
            active,
            run_id: run_id.to_string(),
        })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.run_id);
    }
}
