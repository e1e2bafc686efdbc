use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::{Agent, AgentContext, AgentInit, AgentLookup};
use crate::discovery::{ComponentNamespace, Export};
use crate::error::{AgentLoomError, Result};
use crate::registry::{AgentConstructor, ComponentMetadata, ToolConstructor};
use crate::schema::Schema;
use crate::tools::builtin::{EchoTool, TextStatsTool};
use crate::tools::{invoke_checked, Tool};

pub const BUILTIN_ROOT: &str = "builtin";

/// Context key naming a sibling agent that should handle the goal instead.
pub const DELEGATE_KEY: &str = "delegate_to";

/// Reports its goal and context back, running every attached tool on the goal.
///
/// When the context carries [`DELEGATE_KEY`], the goal is forwarded to that
/// agent through the injected lookup.
pub struct EchoAgent {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    lookup: Option<Arc<dyn AgentLookup>>,
}

impl EchoAgent {
    pub const NAME: &'static str = "echo";

    pub fn new(name: impl Into<String>, init: AgentInit) -> Self {
        Self {
            name: name.into(),
            tools: init.tools,
            lookup: init.lookup,
        }
    }

    pub fn metadata() -> ComponentMetadata {
        ComponentMetadata::builder(Self::NAME)
            .description("Echoes goals and exercises its attached tools")
            .tag("builtin")
            .tag("debug")
            .capability("echo")
            .build()
    }

    async fn delegate(&self, target: &str, goal: &str, context: &AgentContext) -> Result<Value> {
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| AgentLoomError::NotAssembled(target.to_string()))?;
        let mut forwarded = context.clone();
        forwarded.remove(DELEGATE_KEY);
        forwarded.insert("delegated_by".into(), Value::String(self.name.clone()));
        debug!(agent = %self.name, target = %target, "delegating goal");
        let agent = lookup.agent(target)?;
        agent.execute(goal, &forwarded).await
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, goal: &str, context: &AgentContext) -> Result<Value> {
        if let Some(target) = context.get(DELEGATE_KEY).and_then(Value::as_str) {
            return self.delegate(target, goal, context).await;
        }

        let mut tool_outputs = serde_json::Map::new();
        for tool in &self.tools {
            let output = invoke_checked(tool.as_ref(), json!({ "message": goal })).await?;
            tool_outputs.insert(tool.name().to_string(), output);
        }
        Ok(json!({
            "agent": self.name,
            "goal": goal,
            "context": context,
            "tools": tool_outputs,
        }))
    }

    fn tools(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }
}

const ECHO_TOOL: &str = "echo_tool";

/// The namespace shipped with the crate: an `echo` agent owning `echo_tool`
/// by module layout, plus the root-level `text_stats` tool.
pub fn namespace() -> ComponentNamespace {
    ComponentNamespace::new(BUILTIN_ROOT)
        .static_module("builtin.echo", || {
            let ctor: AgentConstructor = Arc::new(|init| {
                Ok(Arc::new(EchoAgent::new(EchoAgent::NAME, init)) as Arc<dyn Agent>)
            });
            Ok(vec![Export::agent("EchoAgent", EchoAgent::metadata(), ctor)])
        })
        .static_module("builtin.echo.tools", || {
            let ctor: ToolConstructor = Arc::new(|init| {
                Ok(Arc::new(EchoTool::from_init(ECHO_TOOL, init)?) as Arc<dyn Tool>)
            });
            Ok(vec![Export::tool(
                "EchoTool",
                EchoTool::metadata(ECHO_TOOL),
                Schema::from_params(&EchoTool::params()),
                ctor,
            )])
        })
        .static_module("builtin.shared", || {
            let ctor: ToolConstructor =
                Arc::new(|_init| Ok(Arc::new(TextStatsTool::new()) as Arc<dyn Tool>));
            Ok(vec![
                Export::tool(
                    "TextStatsTool",
                    TextStatsTool::metadata(),
                    Schema::from_params(&TextStatsTool::metadata().parameter_schema),
                    ctor,
                ),
                Export::opaque("DEFAULT_ENCODING"),
            ])
        })
}
