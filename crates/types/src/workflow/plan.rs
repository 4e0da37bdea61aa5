//! Plan documents as produced by the upstream plan compiler.
//!
//! A plan is accepted as YAML or JSON. Parsing and validation both happen before any
//! workflow record exists, so a rejected plan never leaves partial state behind.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::validation::validate_plan;
use super::{ProofType, Step, StepAction};

/// Ordered list of step descriptors plus a free-form description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDocument {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

/// One step as written in a plan document. `index` is optional and, when present,
/// must match the position of the step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_proof_of_type: Option<ProofType>,
}

/// Why a plan was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("{message}")]
    Parse { message: String },
    #[error("plan is invalid: {}", violations.join("; "))]
    Invalid { violations: Vec<String> },
}

impl PlanError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }
}

/// Serialization formats accepted for plan documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Yaml,
    Json,
}

impl PlanFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse a plan document. Without a format hint YAML is tried first, then JSON.
pub fn parse_plan(content: &str, format: Option<PlanFormat>) -> Result<PlanDocument, PlanError> {
    match format {
        Some(PlanFormat::Yaml) => serde_yaml::from_str(content).map_err(format_yaml_error),
        Some(PlanFormat::Json) => serde_json::from_str(content).map_err(format_json_error),
        None => {
            if let Ok(document) = serde_yaml::from_str::<PlanDocument>(content) {
                return Ok(document);
            }
            serde_json::from_str(content).map_err(format_json_error)
        }
    }
}

impl PlanDocument {
    /// Validate the document and turn it into immutable, indexed steps.
    pub fn compile(self) -> Result<(String, Vec<Step>), PlanError> {
        let violations = validate_plan(&self);
        if !violations.is_empty() {
            return Err(PlanError::Invalid { violations });
        }
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| Step {
                index,
                description: descriptor.description,
                action: descriptor.action,
                requires_proof_of_type: descriptor.requires_proof_of_type,
            })
            .collect();
        Ok((self.description, steps))
    }
}

fn format_yaml_error(error: serde_yaml::Error) -> PlanError {
    if let Some(location) = error.location() {
        return PlanError::parse(format!(
            "parse yaml plan at line {}, column {}: {}",
            location.line(),
            location.column(),
            error
        ));
    }
    PlanError::parse(format!("parse yaml plan: {error}"))
}

fn format_json_error(error: serde_json::Error) -> PlanError {
    PlanError::parse(format!("parse json plan at line {}, column {}: {}", error.line(), error.column(), error))
}
