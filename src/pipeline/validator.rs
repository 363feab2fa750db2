//! Pipeline Definition Validation
//!
//! Structural checks run before a definition is built:
//! - Pipelines (top-level and nested) have at least one step
//! - Every step has a non-empty name
//! - Sibling names are unique
//! - Leaf inputs name exactly one source
//!
//! Action names are resolved later, when the definition is built against
//! an action library.

use std::collections::HashSet;

use log::{debug, info};

use super::parser::{PipelineDefinition, StepDefinition, StepKind};
use crate::error::DefinitionError;

/// Validates a whole definition, returning the first problem found.
pub fn validate_definition(definition: &PipelineDefinition) -> Result<(), DefinitionError> {
    info!(
        "Validating pipeline '{}' with {} top-level steps",
        definition.name,
        definition.steps.len()
    );

    if definition.name.trim().is_empty() {
        return Err(DefinitionError::EmptyName {
            parent: "<root>".to_string(),
        });
    }

    validate_siblings(&definition.name, &definition.steps)?;

    info!("Pipeline '{}' is valid", definition.name);
    Ok(())
}

/// Collects every problem instead of stopping at the first.
pub fn quick_validate(definition: &PipelineDefinition) -> Vec<String> {
    let mut problems = Vec::new();

    if definition.name.trim().is_empty() {
        problems.push(
            DefinitionError::EmptyName {
                parent: "<root>".to_string(),
            }
            .to_string(),
        );
    }

    collect_problems(&definition.name, &definition.steps, &mut problems);
    problems
}

fn validate_siblings(parent: &str, steps: &[StepDefinition]) -> Result<(), DefinitionError> {
    if steps.is_empty() {
        return Err(DefinitionError::EmptyPipeline(parent.to_string()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        let name = step.name.trim();
        if name.is_empty() {
            return Err(DefinitionError::EmptyName {
                parent: parent.to_string(),
            });
        }
        if !seen.insert(name) {
            return Err(DefinitionError::DuplicateName {
                parent: parent.to_string(),
                name: name.to_string(),
            });
        }
        validate_step(step)?;
    }

    Ok(())
}

fn validate_step(step: &StepDefinition) -> Result<(), DefinitionError> {
    match &step.kind {
        StepKind::Leaf { input, .. } => {
            if let Some(input) = input {
                if input.source_count() != 1 {
                    return Err(DefinitionError::AmbiguousInput(step.name.clone()));
                }
            }
            debug!("Step '{}' is a leaf", step.name);
            Ok(())
        }
        StepKind::Loop { template, .. } | StepKind::Foreach { template, .. } => {
            if template.name.trim().is_empty() {
                return Err(DefinitionError::EmptyName {
                    parent: step.name.clone(),
                });
            }
            validate_step(template)
        }
        StepKind::Pipeline { steps } => validate_siblings(&step.name, steps),
    }
}

fn collect_problems(parent: &str, steps: &[StepDefinition], problems: &mut Vec<String>) {
    if steps.is_empty() {
        problems.push(DefinitionError::EmptyPipeline(parent.to_string()).to_string());
        return;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        let name = step.name.trim();
        if name.is_empty() {
            problems.push(
                DefinitionError::EmptyName {
                    parent: parent.to_string(),
                }
                .to_string(),
            );
        } else if !seen.insert(name) {
            problems.push(
                DefinitionError::DuplicateName {
                    parent: parent.to_string(),
                    name: name.to_string(),
                }
                .to_string(),
            );
        }

        match &step.kind {
            StepKind::Leaf { input: Some(input), .. } if input.source_count() != 1 => {
                problems.push(DefinitionError::AmbiguousInput(step.name.clone()).to_string());
            }
            StepKind::Leaf { .. } => {}
            StepKind::Loop { template, .. } | StepKind::Foreach { template, .. } => {
                collect_problems(&step.name, std::slice::from_ref(template.as_ref()), problems);
            }
            StepKind::Pipeline { steps } => collect_problems(&step.name, steps, problems),
        }
    }
}
