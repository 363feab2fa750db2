//! Pipeline Registry
//!
//! Named pipeline builders. Every `create` call builds a fresh pipeline, so
//! concurrent runs never share step instances.

use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::actions::ActionLibrary;
use super::model::Pipeline;
use super::parser::load_pipeline;
use crate::error::{DefinitionError, EngineError};

/// Description recorded when a builder fails at registration.
pub const NO_DESCRIPTION: &str = "No description available";

/// Builds a fresh pipeline.
pub type PipelineBuilder = Box<dyn Fn() -> Result<Pipeline, DefinitionError> + Send + Sync>;

/// Listing entry for a registered pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub name: String,
    pub description: String,
}

struct Registration {
    summary: PipelineSummary,
    builder: PipelineBuilder,
}

/// Maps names to pipeline builders, in registration order.
#[derive(Default)]
pub struct PipelineRegistry {
    entries: Vec<Registration>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builder under `name`, replacing any previous one.
    ///
    /// The builder is invoked once to capture the pipeline description.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn() -> Result<Pipeline, DefinitionError> + Send + Sync + 'static,
    {
        let name = name.into();
        let description = match builder() {
            Ok(pipeline) => pipeline.description().to_string(),
            Err(e) => {
                warn!("Pipeline '{}' could not be built at registration: {}", name, e);
                NO_DESCRIPTION.to_string()
            }
        };

        let registration = Registration {
            summary: PipelineSummary {
                name: name.clone(),
                description,
            },
            builder: Box::new(builder),
        };

        match self.entries.iter_mut().find(|e| e.summary.name == name) {
            Some(existing) => *existing = registration,
            None => self.entries.push(registration),
        }
        info!("Registered pipeline '{}'", name);
    }

    /// Registers a YAML definition file, re-read on every `create`.
    pub fn register_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>, library: ActionLibrary) {
        let path = path.into();
        self.register(name, move || load_pipeline(&path, &library));
    }

    /// Builds a fresh instance of the named pipeline.
    pub fn create(&self, name: &str) -> Result<Pipeline, EngineError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.summary.name == name)
            .ok_or_else(|| EngineError::UnknownPipeline(name.to_string()))?;

        Ok((entry.builder)()?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.summary.name == name)
    }

    /// Registered pipelines in registration order.
    pub fn list(&self) -> Vec<PipelineSummary> {
        self.entries.iter().map(|e| e.summary.clone()).collect()
    }
}
