//! Error Types
//!
//! Errors raised by the engine, the context, the metrics stores and the
//! declarative pipeline loader.

use thiserror::Error;

/// Error type returned by leaf step code and input transformers.
///
/// Boxed so domain steps can propagate any error with `?`.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by a pipeline run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The context has no run identifier.
    #[error("Context has no run identifier; set one before running a pipeline")]
    MissingRunId,

    /// The context has no scheduler handle for metrics hand-off.
    #[error("Context has no scheduler handle; step '{step}' cannot record metrics")]
    MissingScheduler { step: String },

    /// A leaf step (or its input transformer) failed.
    #[error("Step '{step}' ({description}) failed: {source}")]
    StepFailed {
        step: String,
        description: String,
        #[source]
        source: StepError,
    },

    /// No builder is registered under this pipeline name.
    #[error("Pipeline '{0}' not found")]
    UnknownPipeline(String),

    /// Another run with the same identifier is still executing.
    #[error("Run '{0}' is already executing")]
    RunAlreadyActive(String),

    /// The worker thread could not be started or panicked.
    #[error("Worker for run '{run_id}' failed: {reason}")]
    Worker { run_id: String, reason: String },

    /// A declarative pipeline definition was rejected.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl EngineError {
    /// Returns the name of the step that failed, if this is a step failure.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            Self::MissingScheduler { step } => Some(step),
            _ => None,
        }
    }
}

/// Errors raised when reading from a [`Context`](crate::pipeline::Context).
#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("Context key '{0}' is missing")]
    MissingKey(String),

    #[error("Context path '{path}' does not resolve (stopped at '{segment}')")]
    MissingPath { path: String, segment: String },

    #[error("Context value at '{path}' is not {expected}")]
    WrongType { path: String, expected: &'static str },
}

/// Errors raised by a [`MetricsStore`](crate::store::MetricsStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Metrics store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics document '{path}' belongs to run '{found}', not '{expected}'")]
    RunMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

/// Errors raised while loading or validating a declarative pipeline.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read pipeline file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pipeline YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Pipeline '{0}' has no steps")]
    EmptyPipeline(String),

    #[error("A step under '{parent}' has an empty name")]
    EmptyName { parent: String },

    #[error("Duplicate step name '{name}' under '{parent}'")]
    DuplicateName { parent: String, name: String },

    #[error("Step '{step}' uses unknown action '{action}'")]
    UnknownAction { step: String, action: String },

    #[error("Step '{0}': input must set exactly one of 'from', 'value' or 'fields'")]
    AmbiguousInput(String),
}
