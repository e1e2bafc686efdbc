use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tools::Tool;

/// Free-form key/value context handed to an agent alongside its goal.
pub type AgentContext = Map<String, Value>;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, goal: &str, context: &AgentContext) -> Result<Value>;

    /// Names of the tools attached to this instance.
    fn tools(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Name-based access to sibling agents.
///
/// This is the only handle an agent gets on the rest of the assembled
/// system; it never stores other agent instances directly.
pub trait AgentLookup: Send + Sync {
    fn agent(&self, name: &str) -> Result<Arc<dyn Agent>>;

    fn agent_names(&self) -> Vec<String>;

    fn has_agent(&self, name: &str) -> bool {
        self.agent_names().iter().any(|n| n == name)
    }
}

/// Construction arguments for an agent.
#[derive(Clone, Default)]
pub struct AgentInit {
    pub tools: Vec<Arc<dyn Tool>>,
    pub lookup: Option<Arc<dyn AgentLookup>>,
}

impl AgentInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn AgentLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }
}
