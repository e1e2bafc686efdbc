use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::agent::Agent;
use crate::discovery::DiscoveryReport;
use crate::error::{AgentLoomError, ComponentKind, Result, SkippedItem};
use crate::flow::SynthesisReport;
use crate::registry::{ParamSpec, ParamType};
use crate::schema::{validate_value, Schema};
use crate::tools::{invoke_checked, Tool};

/// One entry of the coordinated surface, callable by name with JSON input.
#[async_trait]
pub trait Invocable: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    fn description(&self) -> &str;

    fn schema(&self) -> &Schema;

    async fn invoke(&self, input: Value) -> Result<Value>;
}

/// Exposes an agent as `{ "goal": string, "context": object }`. A bare
/// string input is taken as the goal.
pub struct AgentCallable {
    agent: Arc<dyn Agent>,
    description: String,
    schema: Schema,
}

impl AgentCallable {
    pub fn new(agent: Arc<dyn Agent>, description: impl Into<String>) -> Self {
        let mut params = BTreeMap::new();
        params.insert("goal".to_string(), ParamSpec::new(ParamType::String).required());
        params.insert("context".to_string(), ParamSpec::new(ParamType::Object));
        Self {
            schema: Schema::from_params(&params).with_name(agent.name().to_string()),
            agent,
            description: description.into(),
        }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }
}

#[async_trait]
impl Invocable for AgentCallable {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Agent
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        let input = match input {
            Value::String(goal) => serde_json::json!({ "goal": goal }),
            other => other,
        };
        validate_value(&self.schema, &input).map_err(|err| err.for_tool(self.name()))?;
        let goal = input.get("goal").and_then(Value::as_str).unwrap_or_default();
        let context = input
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        self.agent.execute(goal, &context).await
    }
}

pub struct ToolCallable {
    tool: Arc<dyn Tool>,
    description: String,
}

impl ToolCallable {
    pub fn new(tool: Arc<dyn Tool>, description: impl Into<String>) -> Self {
        Self {
            tool,
            description: description.into(),
        }
    }
}

#[async_trait]
impl Invocable for ToolCallable {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Tool
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Schema {
        self.tool.schema()
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        invoke_checked(self.tool.as_ref(), input).await
    }
}

#[derive(Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub discovery: DiscoveryReport,
    pub synthesis: SynthesisReport,
    /// Items dropped by assembly itself.
    pub skipped: Vec<SkippedItem>,
    pub root_tools: Vec<String>,
    pub agent_tools: BTreeMap<String, Vec<String>>,
}

impl AssemblyReport {
    /// Everything left out across discovery, synthesis and assembly.
    pub fn all_skipped(&self) -> impl Iterator<Item = &SkippedItem> {
        self.discovery
            .skipped
            .iter()
            .chain(&self.synthesis.skipped)
            .chain(&self.skipped)
    }

    pub fn skipped_count(&self) -> usize {
        self.all_skipped().count()
    }

    pub fn skipped_reasons(&self) -> Vec<String> {
        self.all_skipped()
            .map(|item| format!("[{:?}] {}: {}", item.stage, item.subject, item.reason))
            .collect()
    }
}

/// The flat list of units handed to the external executor.
#[derive(Clone)]
pub struct CoordinatedSurface {
    pub units: Vec<Arc<dyn Invocable>>,
    pub report: AssemblyReport,
}

impl CoordinatedSurface {
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Invocable>> {
        self.units.iter().find(|unit| unit.name() == name)
    }

    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value> {
        let unit = self
            .find(name)
            .ok_or_else(|| AgentLoomError::UnknownUnit(name.to_string()))?;
        unit.invoke(input).await
    }

    pub fn agent_units(&self) -> impl Iterator<Item = &Arc<dyn Invocable>> {
        self.units.iter().filter(|unit| unit.kind() == ComponentKind::Agent)
    }

    pub fn tool_units(&self) -> impl Iterator<Item = &Arc<dyn Invocable>> {
        self.units.iter().filter(|unit| unit.kind() == ComponentKind::Tool)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
