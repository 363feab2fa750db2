//! StepRunner - Hierarchical Step Pipeline Engine
//!
//! Runs ordered pipelines of named steps sharing a mutable key/value
//! context. Pipelines nest, and loop and foreach composites repeat a
//! template. Every leaf step is measured (wall time, resident memory delta),
//! and observers receive a live executed/running snapshot before each step.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`pipeline`]: Steps, composites, context and YAML definitions
//! - [`execution`]: Leaf measurement, progress cursor and worker-thread runs
//! - [`monitoring`]: Memory probe, metrics hand-off, progress broadcasting
//! - [`store`]: Persistent per-run metric collections
//! - [`error`]: Error types shared by the modules above
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use steprunner::execution::Runner;
//! use steprunner::monitoring::MetricsRecorder;
//! use steprunner::pipeline::{Context, FnStep, ForeachStep, Pipeline};
//! use steprunner::store::InMemoryMetricsStore;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(
//!         "words",
//!         "Upper-cases every word",
//!         vec![
//!             FnStep::new("split", "Splits the text", |_, ctx| {
//!                 let text = ctx.require("text")?.as_str().unwrap_or_default().to_string();
//!                 Ok(Some(text.split_whitespace().collect::<Vec<_>>().into()))
//!             })
//!             .into(),
//!             ForeachStep::new(
//!                 "each",
//!                 "Visits each word",
//!                 FnStep::new("upper", "Upper-cases", |input, _| {
//!                     Ok(Some(input.as_str().unwrap_or_default().to_uppercase().into()))
//!                 })
//!                 .with_input(|ctx| Ok(ctx.require_path("current")?.clone())),
//!             )
//!             .with_input(|ctx| Ok(ctx.require("split")?.clone()))
//!             .into(),
//!         ],
//!     );
//!
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let store = Arc::new(InMemoryMetricsStore::new());
//!     let (recorder, _drain) = MetricsRecorder::spawn(store, runtime.handle());
//!
//!     let context = Context::new()
//!         .with_run_id("r1")
//!         .with_scheduler(recorder)
//!         .with_value("text", "hello pipeline world");
//!
//!     let context = Runner::new().run(Arc::new(pipeline), context)?;
//!     println!("{:?}", context.get("upper"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use error::{ContextError, DefinitionError, EngineError, StepError, StoreError};
pub use execution::{RunHandle, Runner};
pub use pipeline::{load_pipeline, Context, FnStep, ForeachStep, LoopStep, Pipeline, Step};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "StepRunner";
