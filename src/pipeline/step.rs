//! Step Contract
//!
//! A step is the atomic unit of work: the leaf of the execution tree.
//! Concrete steps implement [`Step::execute`], read from their input and the
//! context, and store a result under their own name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::Context;
use crate::error::StepError;

/// Pure function computing a step's input from the context.
pub type InputTransformer = Box<dyn Fn(&Context) -> Result<Value, StepError> + Send + Sync>;

/// Closure body of an [`FnStep`]. A returned value is stored under the
/// step's name.
pub type StepFn = Box<dyn Fn(Value, &mut Context) -> Result<Option<Value>, StepError> + Send + Sync>;

/// Name and description of a step, as shown to progress observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub name: String,
    pub description: String,
}

impl StepInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Returns the input given to steps without an input transformer.
pub fn empty_input() -> Value {
    Value::Object(Map::new())
}

/// A unit of work in a pipeline.
///
/// Steps are built once when the pipeline is assembled and hold no run
/// state; anything they produce goes into the [`Context`].
///
/// # Example
///
/// ```rust
/// use serde_json::Value;
/// use steprunner::error::StepError;
/// use steprunner::pipeline::{Context, Step};
///
/// struct Shout;
///
/// impl Step for Shout {
///     fn name(&self) -> &str { "shout" }
///     fn description(&self) -> &str { "Upper-cases the text" }
///
///     fn input(&self, context: &Context) -> Result<Value, StepError> {
///         Ok(context.require("text")?.clone())
///     }
///
///     fn execute(&self, input: Value, context: &mut Context) -> Result<(), StepError> {
///         let text = input.as_str().unwrap_or_default().to_uppercase();
///         context.set(self.name(), text);
///         Ok(())
///     }
/// }
/// ```
pub trait Step: Send + Sync {
    /// Name, unique among the step's siblings.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Computes this step's input. Must not mutate the context.
    fn input(&self, _context: &Context) -> Result<Value, StepError> {
        Ok(empty_input())
    }

    /// Runs the step's work.
    fn execute(&self, input: Value, context: &mut Context) -> Result<(), StepError>;

    fn info(&self) -> StepInfo {
        StepInfo::new(self.name(), self.description())
    }
}

/// A step built from closures.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use steprunner::pipeline::{Context, FnStep};
///
/// let step = FnStep::new("greet", "Builds a greeting", |input, _ctx| {
///     Ok(Some(json!(format!("hello {}", input.as_str().unwrap_or("?")))))
/// })
/// .with_input(|ctx| Ok(ctx.require("name")?.clone()));
/// ```
pub struct FnStep {
    name: String,
    description: String,
    input: Option<InputTransformer>,
    action: StepFn,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, action: F) -> Self
    where
        F: Fn(Value, &mut Context) -> Result<Option<Value>, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            input: None,
            action: Box::new(action),
        }
    }

    /// Sets the input transformer.
    pub fn with_input<F>(mut self, transformer: F) -> Self
    where
        F: Fn(&Context) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        self.input = Some(Box::new(transformer));
        self
    }
}

impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input(&self, context: &Context) -> Result<Value, StepError> {
        match &self.input {
            Some(transformer) => transformer(context),
            None => Ok(empty_input()),
        }
    }

    fn execute(&self, input: Value, context: &mut Context) -> Result<(), StepError> {
        if let Some(result) = (self.action)(input, context)? {
            context.set(self.name.clone(), result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fn_step_stores_result_under_name() {
        let step = FnStep::new("double", "Doubles x", |input, _| {
            Ok(Some(json!(input.as_i64().unwrap_or(0) * 2)))
        })
        .with_input(|ctx| Ok(ctx.require("x")?.clone()));

        let mut context = Context::new().with_value("x", 21);
        let input = step.input(&context).unwrap();
        step.execute(input, &mut context).unwrap();

        assert_eq!(context.get("double"), Some(&json!(42)));
    }

    #[test]
    fn test_fn_step_without_result() {
        let step = FnStep::new("noop", "Does nothing", |_, _| Ok(None));
        let mut context = Context::new();

        step.execute(empty_input(), &mut context).unwrap();
        assert!(!context.contains("noop"));
    }

    #[test]
    fn test_default_input_is_empty_object() {
        let step = FnStep::new("s", "d", |_, _| Ok(None));
        assert_eq!(step.input(&Context::new()).unwrap(), json!({}));
    }

    #[test]
    fn test_input_transformer_error() {
        let step = FnStep::new("s", "d", |_, _| Ok(None))
            .with_input(|ctx| Ok(ctx.require("missing")?.clone()));

        let err = step.input(&Context::new()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_step_name_trimmed() {
        let step = FnStep::new("  spaced  ", "d", |_, _| Ok(None));
        assert_eq!(step.name(), "spaced");
        assert_eq!(step.info(), StepInfo::new("spaced", "d"));
    }
}
