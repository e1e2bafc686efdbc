use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentLoomError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Agent,
    Tool,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Agent => f.write_str("agent"),
            ComponentKind::Tool => f.write_str("tool"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentLoomError {
    #[error(
        "{kind} `{name}` already registered from {existing}; registration from {rejected} rejected \
         (first-registered-wins: earlier namespace roots take priority over later ones)"
    )]
    DuplicateName {
        kind: ComponentKind,
        name: String,
        existing: String,
        rejected: String,
    },
    #[error("{kind} `{name}` not registered")]
    NotFound { kind: ComponentKind, name: String },
    #[error("symbol `{symbol}` in `{module}` does not satisfy the {kind} contract: {reason}")]
    ContractMismatch {
        kind: ComponentKind,
        module: String,
        symbol: String,
        reason: String,
    },
    #[error("workflow document `{source_path}` failed validation: {detail}")]
    Validation { source_path: String, detail: String },
    #[error(
        "synthesized agent `{name}` (template `{template_id}`) \
         would overwrite a hand-authored agent"
    )]
    SynthesisCollision { name: String, template_id: String },
    #[error("{kind} `{name}` already received its injected instance")]
    InstanceSealed { kind: ComponentKind, name: String },
    #[error("{kind} dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle {
        kind: ComponentKind,
        chain: Vec<String>,
    },
    #[error("agent `{0}` is registered but has not been assembled yet")]
    NotAssembled(String),
    #[error("workflow `{workflow_id}` failed: {summary}")]
    WorkflowFailed {
        workflow_id: String,
        summary: String,
        /// The serialized run, including the results gathered before the failure.
        run: Box<serde_json::Value>,
    },
    #[error("task `{task_id}` timed out after {secs}s")]
    TaskTimeout { task_id: String, secs: u64 },
    #[error("no invocable unit named `{0}`")]
    UnknownUnit(String),
    #[error("assembly produced no agents and no tools")]
    EmptySurface,
    #[error("invalid parameters for tool `{tool}`: {message}")]
    InvalidParameters { tool: String, message: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentLoomError {
    pub fn not_found(kind: ComponentKind, name: impl Into<String>) -> Self {
        AgentLoomError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn validation(source_path: impl Into<String>, detail: impl Into<String>) -> Self {
        AgentLoomError::Validation {
            source_path: source_path.into(),
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for AgentLoomError {
    fn from(error: serde_json::Error) -> Self {
        AgentLoomError::Serialization(error.to_string())
    }
}

impl From<serde_yaml::Error> for AgentLoomError {
    fn from(error: serde_yaml::Error) -> Self {
        AgentLoomError::Serialization(error.to_string())
    }
}

/// Pipeline stage at which an item was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Import,
    Contract,
    Registration,
    Compile,
    Synthesis,
    Assembly,
}

/// A locally recovered failure, kept so callers can see what was left out and why.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedItem {
    pub stage: SkipStage,
    pub subject: String,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(stage: SkipStage, subject: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}
