//! Run Context
//!
//! The shared state threaded through every step of a single run. It holds
//! two kinds of data:
//!
//! - **Step results and caller inputs**: a free-form map from string keys to
//!   JSON values. A step stores its result under its own name.
//! - **Control fields**: run identifier, scheduler handle, the current
//!   foreach element, the current loop index and the in-run metrics list.
//!   These are typed fields, never keys in the result map, so unrelated
//!   steps cannot collide with them.
//!
//! The context is never copied for isolation: a mutation by one step is
//! visible to every step that runs after it.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::{ContextError, EngineError};
use crate::monitoring::{MemoryProbe, MetricsRecorder, MetricsSample};

/// Control field holding the element of the innermost running foreach.
pub const CURRENT_KEY: &str = "current";

/// Control field holding the zero-based counter of the innermost running loop.
pub const LOOP_INDEX_KEY: &str = "loop_index";

/// Result key a loop reads its iteration count from.
pub const LOOP_COUNT_KEY: &str = "n";

/// Shared, mutable state for one pipeline run.
///
/// # Example
///
/// ```rust
/// use steprunner::pipeline::Context;
///
/// let mut context = Context::new().with_run_id("r1");
/// context.set("text", "hello world");
///
/// assert_eq!(context.run_id(), Some("r1"));
/// assert_eq!(context.get("text").and_then(|v| v.as_str()), Some("hello world"));
/// ```
#[derive(Default)]
pub struct Context {
    values: HashMap<String, Value>,
    run_id: Option<String>,
    scheduler: Option<MetricsRecorder>,
    current: Option<Value>,
    loop_index: Option<Value>,
    metrics: Vec<MetricsSample>,
    probe: MemoryProbe,
}

impl Context {
    /// Creates an empty context with no run identifier and no scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Sets the scheduler handle that metrics samples are handed off to.
    pub fn with_scheduler(mut self, scheduler: MetricsRecorder) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Adds an initial value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Returns the run identifier or a precondition error.
    pub fn require_run_id(&self) -> Result<&str, EngineError> {
        self.run_id().ok_or(EngineError::MissingRunId)
    }

    pub fn scheduler(&self) -> Option<&MetricsRecorder> {
        self.scheduler.as_ref()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the value stored under `key`, or an error naming the key.
    pub fn require(&self, key: &str) -> Result<&Value, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::MissingKey(key.to_string()))
    }

    /// Stores a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns all stored results and inputs.
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Resolves a dotted path such as `split_text.0` or `current.title`.
    ///
    /// The first segment names a result key or one of the control fields
    /// `current` and `loop_index`. Later segments index into objects by key
    /// and into arrays by position.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.resolve(path).ok()
    }

    /// Like [`lookup`](Self::lookup), but reports which segment failed.
    pub fn require_path(&self, path: &str) -> Result<&Value, ContextError> {
        self.resolve(path)
    }

    fn resolve(&self, path: &str) -> Result<&Value, ContextError> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();

        let root = match head {
            CURRENT_KEY => self.current.as_ref(),
            LOOP_INDEX_KEY => self.loop_index.as_ref(),
            _ => self.values.get(head),
        };

        let mut value = root.ok_or_else(|| ContextError::MissingKey(head.to_string()))?;

        for segment in segments {
            let next = match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            value = next.ok_or_else(|| ContextError::MissingPath {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;
        }

        Ok(value)
    }

    /// Returns the element of the innermost running foreach.
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, item: Value) {
        self.current = Some(item);
    }

    /// Puts back the element an enclosing foreach had set, or clears it.
    pub(crate) fn restore_current(&mut self, previous: Option<Value>) {
        self.current = previous;
    }

    /// Returns the counter of the innermost running loop.
    pub fn loop_index(&self) -> Option<usize> {
        self.loop_index
            .as_ref()
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    pub(crate) fn set_loop_index(&mut self, index: usize) {
        self.loop_index = Some(Value::from(index));
    }

    pub(crate) fn restore_loop_index(&mut self, previous: Option<usize>) {
        self.loop_index = previous.map(Value::from);
    }

    /// Returns the metrics samples recorded so far in this run, in
    /// execution order.
    pub fn metrics(&self) -> &[MetricsSample] {
        &self.metrics
    }

    pub(crate) fn push_metrics(&mut self, sample: MetricsSample) {
        self.metrics.push(sample);
    }

    pub(crate) fn probe_mut(&mut self) -> &mut MemoryProbe {
        &mut self.probe
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();

        f.debug_struct("Context")
            .field("run_id", &self.run_id)
            .field("has_scheduler", &self.scheduler.is_some())
            .field("keys", &keys)
            .field("current", &self.current)
            .field("loop_index", &self.loop_index)
            .field("metrics", &self.metrics.len())
            .finish()
    }
}
