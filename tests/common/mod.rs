#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use agentloom::{
    Agent, AgentConstructor, AgentContext, AgentInit, AgentLoomError, AgentLookup,
    ComponentMetadata, ComponentNamespace, Export, ParamSpec, ParamType, Result, Schema, Tool,
    ToolConstructor,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Records every call as `agent:task_id` and fails the tasks it is told to.
pub struct ScriptedAgent {
    pub name: String,
    pub log: CallLog,
    pub failing_tasks: BTreeSet<String>,
    pub delay_ms: u64,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub tools: Vec<String>,
}

impl ScriptedAgent {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            failing_tasks: BTreeSet::new(),
            delay_ms: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            tools: Vec::new(),
        }
    }

    pub fn failing(mut self, task_id: &str) -> Self {
        self.failing_tasks.insert(task_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn sharing_peak(mut self, in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Self {
        self.in_flight = in_flight;
        self.peak = peak;
        self
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, goal: &str, context: &AgentContext) -> Result<Value> {
        let task = context
            .get("task_id")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log.lock().push(format!("start {}:{task}", self.name));
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(format!("end {}:{task}", self.name));

        if self.failing_tasks.contains(&task) {
            return Err(AgentLoomError::Other(anyhow::anyhow!("task {task} failed on purpose")));
        }
        Ok(json!({ "agent": self.name, "task": task, "goal": goal }))
    }

    fn tools(&self) -> Vec<String> {
        self.tools.clone()
    }
}

/// Lookup over a fixed set of ready-made agents.
#[derive(Default)]
pub struct FixedLookup {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl FixedLookup {
    pub fn with(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.insert(agent.name().to_string(), Arc::new(agent));
        self
    }
}

impl AgentLookup for FixedLookup {
    fn agent(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| AgentLoomError::not_found(agentloom::ComponentKind::Agent, name))
    }

    fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

/// Agent that reports the names of its tools and of the agents it can see.
pub struct SiblingAgent {
    name: String,
    init: AgentInit,
}

#[async_trait::async_trait]
impl Agent for SiblingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, goal: &str, context: &AgentContext) -> Result<Value> {
        if let Some(target) = context.get("ask").and_then(Value::as_str) {
            let lookup = self
                .init
                .lookup
                .as_ref()
                .ok_or_else(|| AgentLoomError::NotAssembled(target.to_string()))?;
            let sibling = lookup.agent(target)?;
            return sibling.execute(goal, &AgentContext::new()).await;
        }
        Ok(json!({
            "agent": self.name,
            "goal": goal,
            "tools": self.init.tool_names(),
        }))
    }

    fn tools(&self) -> Vec<String> {
        self.init.tool_names()
    }
}

pub fn sibling_ctor(name: &str) -> AgentConstructor {
    let name = name.to_string();
    Arc::new(move |init| {
        Ok(Arc::new(SiblingAgent {
            name: name.clone(),
            init,
        }) as Arc<dyn Agent>)
    })
}

pub struct StaticTool {
    name: String,
    schema: Schema,
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        Ok(json!({ "tool": self.name, "params": params }))
    }
}

pub fn tool_ctor(name: &str) -> ToolConstructor {
    let name = name.to_string();
    Arc::new(move |_init| {
        Ok(Arc::new(StaticTool {
            name: name.clone(),
            schema: Schema::any_object(),
        }) as Arc<dyn Tool>)
    })
}

pub fn agent_export(name: &str) -> Export {
    Export::agent(
        format!("{name}_agent"),
        ComponentMetadata::builder(name).tag("test").build(),
        sibling_ctor(name),
    )
}

pub fn tool_export(name: &str, owner: Option<&str>) -> Export {
    let mut metadata = ComponentMetadata::builder(name)
        .param("query", ParamSpec::new(ParamType::String))
        .tag("test");
    if let Some(owner) = owner {
        metadata = metadata.owner(owner);
    }
    Export::tool(
        format!("{name}_tool"),
        metadata.build(),
        Schema::any_object(),
        tool_ctor(name),
    )
}

/// A namespace whose modules each export the given symbols.
pub fn namespace(root: &str, modules: Vec<(&str, Vec<Export>)>) -> ComponentNamespace {
    modules
        .into_iter()
        .fold(ComponentNamespace::new(root), |ns, (module, exports)| {
            ns.static_module(module, move || Ok(exports.clone()))
        })
}

pub fn write_doc(dir: &Path, file: &str, document: &Value) -> PathBuf {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let text = if file.ends_with(".json") {
        serde_json::to_string_pretty(document).unwrap()
    } else {
        serde_yaml::to_string(document).unwrap()
    };
    fs::write(&path, text).unwrap();
    path
}

/// A small valid workflow bound to `agent`.
pub fn simple_workflow(id: &str, agent: &str) -> Value {
    json!({
        "workflow_id": id,
        "workflow_name": format!("{id} flow"),
        "core_phases": {
            "collect": {
                "tasks": [
                    { "task_id": "gather", "agent": agent, "goal": "collect the data" }
                ]
            }
        }
    })
}
