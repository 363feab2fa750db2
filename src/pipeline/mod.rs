//! Pipeline Definition Module
//!
//! Data structures for composing pipelines out of steps, and for loading
//! them from declarative YAML definitions.
//!
//! # Structure
//!
//! - [`context`]: Shared key/value state of one run
//! - [`step`]: The leaf step contract and closure-backed steps
//! - [`iteration`]: Loop and foreach composites
//! - [`model`]: Pipeline tree and flattening
//! - [`actions`]: Named built-in actions for declarative pipelines
//! - [`parser`]: YAML parsing and building
//! - [`validator`]: Structural checks on definitions
//! - [`registry`]: Named pipeline builders

pub mod actions;
pub mod context;
pub mod iteration;
pub mod model;
pub mod parser;
pub mod registry;
pub mod step;
pub mod validator;

pub use actions::{ActionFn, ActionLibrary, ActionStep};
pub use context::{Context, CURRENT_KEY, LOOP_COUNT_KEY, LOOP_INDEX_KEY};
pub use iteration::{ForeachStep, LoopStep, DEFAULT_LOOP_TIMES};
pub use model::{Node, Pipeline};
pub use parser::{
    build_pipeline, load_pipeline, parse_definition, parse_pipeline, InputDefinition,
    PipelineDefinition, StepDefinition, StepKind,
};
pub use registry::{PipelineRegistry, PipelineSummary};
pub use step::{empty_input, FnStep, InputTransformer, Step, StepFn, StepInfo};
pub use validator::{quick_validate, validate_definition};
