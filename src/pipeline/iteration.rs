//! Repeated and Per-Item Steps
//!
//! [`LoopStep`] runs its template a fixed number of times and
//! [`ForeachStep`] runs it once per element of a sequence computed at run
//! time. Both contribute their template's leaves exactly once to the
//! flattened plan.

use log::debug;
use serde_json::Value;

use super::context::{Context, LOOP_COUNT_KEY};
use super::model::Node;
use super::step::{empty_input, InputTransformer};
use crate::error::{ContextError, EngineError, StepError};
use crate::execution::ProgressTracker;

/// Iteration count used by [`LoopStep::with_default`].
pub const DEFAULT_LOOP_TIMES: usize = 3;

/// Largest count accepted from the context; anything above falls back to
/// the default.
pub const MAX_LOOP_TIMES: usize = 100_000;

/// Repeats a template node.
///
/// The count is read from the context key `n`; when that key is absent or
/// not an integer, the construction-time default applies.
pub struct LoopStep {
    name: String,
    description: String,
    default_times: usize,
    template: Box<Node>,
}

impl LoopStep {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        default_times: usize,
        template: impl Into<Node>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            default_times,
            template: Box::new(template.into()),
        }
    }

    /// Creates a loop repeating [`DEFAULT_LOOP_TIMES`] times by default.
    pub fn with_default(
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<Node>,
    ) -> Self {
        Self::new(name, description, DEFAULT_LOOP_TIMES, template)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn default_times(&self) -> usize {
        self.default_times
    }

    pub fn template(&self) -> &Node {
        &self.template
    }

    /// Resolves the iteration count for this run.
    pub fn times(&self, context: &Context) -> usize {
        context
            .get(LOOP_COUNT_KEY)
            .and_then(coerce_count)
            .unwrap_or(self.default_times)
    }

    /// Runs the template `times` times, setting `loop_index` before each.
    /// The enclosing loop's index is back in place when this returns.
    pub fn run(&self, context: &mut Context) -> Result<(), EngineError> {
        let times = self.times(context);
        debug!("Loop '{}': {} iterations", self.name, times);

        let outer = context.loop_index();
        let result = (0..times).try_for_each(|index| {
            context.set_loop_index(index);
            self.template.run(context)
        });
        context.restore_loop_index(outer);

        result
    }
}

/// Coerces integers, integral floats and numeric strings up to
/// [`MAX_LOOP_TIMES`] to a count.
fn coerce_count(value: &Value) -> Option<usize> {
    let count = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= MAX_LOOP_TIMES as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;

    usize::try_from(count).ok().filter(|c| *c <= MAX_LOOP_TIMES)
}

/// Runs a template node once per element of a runtime sequence.
///
/// The input transformer produces either `{"items": [...]}` or the array
/// itself. A missing or null `items` means zero iterations.
pub struct ForeachStep {
    name: String,
    description: String,
    input: Option<InputTransformer>,
    template: Box<Node>,
}

impl ForeachStep {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<Node>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            input: None,
            template: Box::new(template.into()),
        }
    }

    /// Sets the transformer that yields the items.
    pub fn with_input<F>(mut self, transformer: F) -> Self
    where
        F: Fn(&Context) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        self.input = Some(Box::new(transformer));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn template(&self) -> &Node {
        &self.template
    }

    /// Evaluates the input transformer and extracts the items.
    pub fn items(&self, context: &Context) -> Result<Vec<Value>, EngineError> {
        let input = match &self.input {
            Some(transformer) => transformer(context).map_err(|source| self.failed(source))?,
            None => empty_input(),
        };

        let items = match input {
            Value::Array(items) => return Ok(items),
            Value::Object(mut map) => map.remove("items"),
            _ => None,
        };

        match items {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(self.failed(Box::new(ContextError::WrongType {
                path: "items".to_string(),
                expected: "an array",
            }))),
        }
    }

    /// Runs the template once per item without publishing progress.
    pub fn run(&self, context: &mut Context) -> Result<(), EngineError> {
        self.run_tracked(context, None)
    }

    /// Runs the template once per item, publishing a snapshot before each
    /// iteration.
    ///
    /// Each iteration advances the cursor by one slot, but never past the
    /// template's own slots; when the foreach finishes the cursor sits right
    /// after them. The enclosing foreach's `current` is restored on return.
    pub(crate) fn run_tracked(
        &self,
        context: &mut Context,
        mut tracker: Option<&mut ProgressTracker<'_>>,
    ) -> Result<(), EngineError> {
        let items = self.items(context)?;
        debug!("Foreach '{}': {} items", self.name, items.len());

        let end = tracker
            .as_deref()
            .map(|t| t.cursor() + self.template.leaf_count());
        let outer = context.current().cloned();

        let result = items.into_iter().try_for_each(|item| {
            context.set_current(item);

            if let Some(tracker) = tracker.as_deref_mut() {
                tracker.publish();
            }

            self.template.run(context)?;

            if let (Some(tracker), Some(end)) = (tracker.as_deref_mut(), end) {
                tracker.advance_within(1, end);
            }
            Ok::<(), EngineError>(())
        });
        context.restore_current(outer);
        result?;

        if let (Some(tracker), Some(end)) = (tracker, end) {
            tracker.set_cursor(end);
        }
        Ok(())
    }

    fn failed(&self, source: StepError) -> EngineError {
        EngineError::StepFailed {
            step: self.name.clone(),
            description: self.description.clone(),
            source,
        }
    }
}
