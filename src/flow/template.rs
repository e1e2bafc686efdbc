use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Where a workflow definition was contributed from, read off the first
/// segment of its id (`core.health_check`, `contrib.triage`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowSource {
    Core,
    Contrib,
    Unknown,
}

impl WorkflowSource {
    pub fn from_id(id: &str) -> Self {
        match id.split('.').next() {
            Some("core") => WorkflowSource::Core,
            Some("contrib") => WorkflowSource::Contrib,
            _ => WorkflowSource::Unknown,
        }
    }
}

impl fmt::Display for WorkflowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowSource::Core => "core",
            WorkflowSource::Contrib => "contrib",
            WorkflowSource::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentDependency {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub capabilities: Vec<String>,
    pub tools: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub bound_agent: String,
    pub bound_capability: Option<String>,
    /// Everything else the document put on the task (`goal`, `prompt`,
    /// free-form parameters), passed through untouched.
    pub parameters: Map<String, Value>,
    pub expected_output: Option<String>,
    pub depends_on: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Task {
    /// Text handed to the bound agent: `goal`, then `prompt`, then the title.
    pub fn goal(&self) -> &str {
        ["goal", "prompt"]
            .iter()
            .find_map(|key| self.parameters.get(*key).and_then(Value::as_str))
            .unwrap_or(&self.title)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Phase {
    /// Key of the phase under `core_phases`.
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub parallel: bool,
    pub max_parallel: Option<usize>,
    pub tasks: Vec<Task>,
    /// Task indices in an order that respects `depends_on`, grouped into
    /// waves: every task in a wave depends only on tasks in earlier waves.
    pub execution_order: Vec<Vec<usize>>,
}

impl Phase {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.task_id == task_id)
    }
}

/// A compiled, validated workflow document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub source: WorkflowSource,
    pub source_path: String,
    pub primary_agent: Option<String>,
    /// Phases in execution order.
    pub phases: Vec<Phase>,
    pub declared_agent_dependencies: BTreeMap<String, AgentDependency>,
    /// Non-fatal findings from compilation.
    pub warnings: Vec<String>,
}

impl WorkflowTemplate {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|phase| phase.name == name || phase.key == name)
    }

    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.tasks.len()).sum()
    }

    /// Every agent a task is bound to, sorted and deduplicated.
    pub fn referenced_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().map(|task| task.bound_agent.clone()))
            .collect();
        agents.sort();
        agents.dedup();
        agents
    }
}
