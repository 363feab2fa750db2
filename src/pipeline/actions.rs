//! Built-in Actions
//!
//! Named, reusable step bodies that declarative pipelines refer to by the
//! `action` field of a leaf step.
//!
//! | Action    | Input                                  | Result stored under the step name |
//! |-----------|----------------------------------------|-----------------------------------|
//! | `echo`    | anything                               | the input                         |
//! | `sleep`   | seconds, or `{secs}` / `{millis}`      | nothing                           |
//! | `split`   | string, or `{text, separator}`         | array of non-empty parts          |
//! | `count`   | array, object or string                | its length                        |
//! | `collect` | anything                               | previous array plus the input     |
//! | `fail`    | message, or `{message}`                | never; always an error            |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use super::context::Context;
use super::step::{empty_input, InputTransformer, Step, StepInfo};
use crate::error::StepError;

/// Body of a named action.
pub type ActionFn =
    Arc<dyn Fn(&StepInfo, Value, &mut Context) -> Result<Option<Value>, StepError> + Send + Sync>;

/// Named actions available to declarative pipelines.
#[derive(Clone, Default)]
pub struct ActionLibrary {
    actions: BTreeMap<String, ActionFn>,
}

impl ActionLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a library holding the built-in actions.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        library.register("echo", echo);
        library.register("sleep", sleep);
        library.register("split", split);
        library.register("count", count);
        library.register("collect", collect);
        library.register("fail", fail);
        library
    }

    /// Adds or replaces an action.
    pub fn register<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&StepInfo, Value, &mut Context) -> Result<Option<Value>, StepError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Action names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }
}

/// Leaf step running a library action.
pub struct ActionStep {
    info: StepInfo,
    action: ActionFn,
    input: Option<InputTransformer>,
}

impl ActionStep {
    pub fn new(name: impl Into<String>, description: impl Into<String>, action: ActionFn) -> Self {
        Self {
            info: StepInfo::new(name.into().trim(), description),
            action,
            input: None,
        }
    }

    pub fn with_input(mut self, transformer: InputTransformer) -> Self {
        self.input = Some(transformer);
        self
    }
}

impl Step for ActionStep {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn input(&self, context: &Context) -> Result<Value, StepError> {
        match &self.input {
            Some(transformer) => transformer(context),
            None => Ok(empty_input()),
        }
    }

    fn execute(&self, input: Value, context: &mut Context) -> Result<(), StepError> {
        if let Some(result) = (self.action)(&self.info, input, context)? {
            context.set(self.info.name.clone(), result);
        }
        Ok(())
    }
}

fn echo(_step: &StepInfo, input: Value, _context: &mut Context) -> Result<Option<Value>, StepError> {
    Ok(Some(input))
}

fn sleep(step: &StepInfo, input: Value, _context: &mut Context) -> Result<Option<Value>, StepError> {
    let secs = match &input {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => match (map.get("secs"), map.get("millis")) {
            (Some(secs), _) => secs.as_f64(),
            (None, Some(millis)) => millis.as_f64().map(|ms| ms / 1000.0),
            (None, None) => Some(0.0),
        },
        _ => None,
    };

    let duration = secs
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| format!("{}: invalid sleep duration {}", step.name, input))?;

    thread::sleep(duration);
    Ok(None)
}

fn split(step: &StepInfo, input: Value, _context: &mut Context) -> Result<Option<Value>, StepError> {
    let (text, separator) = match &input {
        Value::String(text) => (text.as_str(), None),
        Value::Object(map) => (
            map.get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("{}: 'text' must be a string", step.name))?,
            map.get("separator").and_then(Value::as_str),
        ),
        other => return Err(format!("{}: cannot split {}", step.name, other).into()),
    };

    let parts: Vec<&str> = match separator {
        Some(sep) if !sep.is_empty() => text.split(sep).map(str::trim).filter(|p| !p.is_empty()).collect(),
        _ => text.split_whitespace().collect(),
    };
    Ok(Some(json!(parts)))
}

fn count(step: &StepInfo, input: Value, _context: &mut Context) -> Result<Option<Value>, StepError> {
    let length = match &input {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(text) => text.chars().count(),
        other => return Err(format!("{}: cannot count {}", step.name, other).into()),
    };
    Ok(Some(json!(length)))
}

fn collect(step: &StepInfo, input: Value, context: &mut Context) -> Result<Option<Value>, StepError> {
    let mut collected = match context.get(&step.name) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    collected.push(input);
    Ok(Some(Value::Array(collected)))
}

fn fail(step: &StepInfo, input: Value, _context: &mut Context) -> Result<Option<Value>, StepError> {
    let message = match &input {
        Value::String(message) => message.clone(),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => format!("{} failed", step.name),
        },
        _ => format!("{} failed", step.name),
    };
    Err(message.into())
}
