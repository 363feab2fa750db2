//! Pipeline Definition Parser
//!
//! Loads declarative pipelines from YAML and builds them into executable
//! [`Pipeline`]s using an [`ActionLibrary`].
//!
//! ```yaml
//! name: words
//! description: Splits a sentence and echoes each word
//! steps:
//!   - name: split_text
//!     kind: leaf
//!     action: split
//!     input: { from: text }
//!   - name: each_word
//!     kind: foreach
//!     items: split_text
//!     template:
//!       name: shout
//!       kind: leaf
//!       action: echo
//!       input: { from: current }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::actions::{ActionLibrary, ActionStep};
use super::context::Context;
use super::iteration::{ForeachStep, LoopStep, DEFAULT_LOOP_TIMES};
use super::model::{Node, Pipeline};
use super::step::InputTransformer;
use super::validator::validate_definition;
use crate::error::{DefinitionError, StepError};

/// Top-level pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// One node of a pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(flatten)]
    pub kind: StepKind,
}

/// Node variants, selected by the `kind` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Runs a library action
    Leaf {
        action: String,
        #[serde(default)]
        input: Option<InputDefinition>,
    },
    /// Repeats the template; `times` is the default when the context has no `n`
    Loop {
        #[serde(default = "default_times")]
        times: usize,
        template: Box<StepDefinition>,
    },
    /// Runs the template once per element of the array at `items`
    Foreach {
        #[serde(default)]
        items: Option<String>,
        template: Box<StepDefinition>,
    },
    /// Nested pipeline
    Pipeline {
        #[serde(default)]
        steps: Vec<StepDefinition>,
    },
}

fn default_times() -> usize {
    DEFAULT_LOOP_TIMES
}

/// Where a leaf step takes its input from. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    /// Dotted context path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Object built from context paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl InputDefinition {
    /// Number of sources set.
    pub fn source_count(&self) -> usize {
        [self.from.is_some(), self.value.is_some(), self.fields.is_some()]
            .iter()
            .filter(|set| **set)
            .count()
    }

    fn into_transformer(self) -> InputTransformer {
        if let Some(path) = self.from {
            return path_input(path);
        }
        if let Some(value) = self.value {
            return Box::new(move |_: &Context| -> Result<Value, StepError> { Ok(value.clone()) });
        }

        let fields = self.fields.unwrap_or_default();
        Box::new(move |context: &Context| -> Result<Value, StepError> {
            let mut object = Map::new();
            for (key, path) in &fields {
                object.insert(key.clone(), context.require_path(path)?.clone());
            }
            Ok(Value::Object(object))
        })
    }
}

fn path_input(path: String) -> InputTransformer {
    Box::new(move |context: &Context| -> Result<Value, StepError> {
        Ok(context.require_path(&path)?.clone())
    })
}

/// Loads, validates and builds a pipeline from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use steprunner::pipeline::{load_pipeline, ActionLibrary};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = load_pipeline("pipeline.yaml", &ActionLibrary::builtin())?;
///     println!("Loaded {} leaf steps", pipeline.leaf_count());
///     Ok(())
/// }
/// ```
pub fn load_pipeline(path: impl AsRef<Path>, library: &ActionLibrary) -> Result<Pipeline, DefinitionError> {
    let path = path.as_ref();
    info!("Loading pipeline from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.display().to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_pipeline(&yaml_content, library)
}

/// Parses, validates and builds a pipeline from YAML text.
pub fn parse_pipeline(yaml: &str, library: &ActionLibrary) -> Result<Pipeline, DefinitionError> {
    let definition = parse_definition(yaml)?;
    build_pipeline(&definition, library)
}

/// Parses YAML text into a definition without building it.
pub fn parse_definition(yaml: &str) -> Result<PipelineDefinition, DefinitionError> {
    let definition: PipelineDefinition = serde_yaml::from_str(yaml)?;
    info!(
        "Parsed pipeline '{}' with {} top-level steps",
        definition.name,
        definition.steps.len()
    );
    Ok(definition)
}

/// Validates a definition and builds it into an executable pipeline.
pub fn build_pipeline(definition: &PipelineDefinition, library: &ActionLibrary) -> Result<Pipeline, DefinitionError> {
    validate_definition(definition)?;

    let steps = definition
        .steps
        .iter()
        .map(|step| build_node(step, library))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline::new(&definition.name, &definition.description, steps))
}

fn build_node(definition: &StepDefinition, library: &ActionLibrary) -> Result<Node, DefinitionError> {
    let name = definition.name.as_str();
    let description = definition.description.as_str();

    let node = match &definition.kind {
        StepKind::Leaf { action, input } => {
            let body = library.get(action).ok_or_else(|| DefinitionError::UnknownAction {
                step: name.to_string(),
                action: action.clone(),
            })?;

            let mut step = ActionStep::new(name, description, body);
            if let Some(input) = input.clone() {
                step = step.with_input(input.into_transformer());
            }
            Node::leaf(step)
        }
        StepKind::Loop { times, template } => {
            LoopStep::new(name, description, *times, build_node(template, library)?).into()
        }
        StepKind::Foreach { items, template } => {
            let mut step = ForeachStep::new(name, description, build_node(template, library)?);
            if let Some(path) = items.clone() {
                step = step.with_input(path_input(path));
            }
            step.into()
        }
        StepKind::Pipeline { steps } => {
            let children = steps
                .iter()
                .map(|step| build_node(step, library))
                .collect::<Result<Vec<_>, _>>()?;
            Pipeline::new(name, description, children).into()
        }
    };

    Ok(node)
}

/// Serializes a definition back to YAML.
pub fn to_yaml(definition: &PipelineDefinition) -> Result<String, DefinitionError> {
    Ok(serde_yaml::to_string(definition)?)
}
