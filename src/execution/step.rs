//! Leaf Step Execution
//!
//! Runs a single leaf step inside a run:
//! - Precondition checks (run identifier, scheduler handle)
//! - Input computation
//! - Timing and memory measurement around `execute`
//! - Metrics hand-off to the scheduler

use std::time::Instant;

use log::{debug, error};

use crate::error::{EngineError, StepError};
use crate::monitoring::MetricsSample;
use crate::pipeline::{Context, Step};

/// Runs one leaf step against the context.
///
/// # Returns
///
/// * `Ok(())` - The step executed and its metrics sample was recorded
/// * `Err` - A precondition failed, or the step's input or execution failed
///
/// A sample is recorded only when `execute` returns successfully, so a
/// failing run holds exactly one sample per step that completed before it.
pub(crate) fn run_leaf(step: &dyn Step, context: &mut Context) -> Result<(), EngineError> {
    let scheduler = context
        .scheduler()
        .cloned()
        .ok_or_else(|| EngineError::MissingScheduler {
            step: step.name().to_string(),
        })?;
    let run_id = context.require_run_id()?.to_string();

    debug!("Run '{}': starting step '{}'", run_id, step.name());

    let input = step.input(context).map_err(|source| failed(step, source))?;

    let baseline = context.probe_mut().resident_bytes();
    let started = Instant::now();

    step.execute(input, context).map_err(|source| {
        error!("Run '{}': step '{}' failed: {}", run_id, step.name(), source);
        failed(step, source)
    })?;

    let duration = started.elapsed();
    let memory_delta = context.probe_mut().resident_bytes() as i64 - baseline as i64;

    let sample = MetricsSample::new(step.name(), step.description(), duration, memory_delta);
    debug!(
        "Run '{}': step '{}' completed in {:.3}s ({:+.2} MB)",
        run_id,
        step.name(),
        sample.duration_secs,
        sample.memory_delta_mb
    );

    context.push_metrics(sample.clone());
    scheduler.record(&run_id, sample);

    Ok(())
}

fn failed(step: &dyn Step, source: StepError) -> EngineError {
    EngineError::StepFailed {
        step: step.name().to_string(),
        description: step.description().to_string(),
        source,
    }
}
