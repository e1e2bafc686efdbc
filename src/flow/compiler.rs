//! Turns a raw workflow document into a [`WorkflowTemplate`].
//!
//! Checks run in a fixed order and the first failure rejects the whole
//! document: field shapes, phase and task uniqueness, agent references,
//! then phase ordering and intra-phase task dependencies. Nothing is
//! instantiated here.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AgentLoomError, Result};
use crate::flow::template::{AgentDependency, Phase, Task, WorkflowSource, WorkflowTemplate};
use crate::registry::{AgentRegistry, ToolRegistry};

/// Answers which agent and capability names a document may bind to.
pub trait AgentResolver {
    fn has_agent(&self, name: &str) -> bool;

    /// Whether a task's `tool` binding names something known. Resolvers
    /// without capability knowledge accept everything.
    fn capability_known(&self, _name: &str) -> bool {
        true
    }
}

impl AgentResolver for BTreeSet<String> {
    fn has_agent(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Resolves against the live registries plus names that will be
/// registered later in the same startup pass.
pub struct RegistryResolver<'a> {
    agents: &'a AgentRegistry,
    tools: Option<&'a ToolRegistry>,
    pending: BTreeSet<String>,
}

impl<'a> RegistryResolver<'a> {
    pub fn new(agents: &'a AgentRegistry) -> Self {
        Self {
            agents,
            tools: None,
            pending: BTreeSet::new(),
        }
    }

    pub fn with_tools(mut self, tools: &'a ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_pending(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.pending.extend(names);
        self
    }
}

impl AgentResolver for RegistryResolver<'_> {
    fn has_agent(&self, name: &str) -> bool {
        self.pending.contains(name) || self.agents.contains(name)
    }

    fn capability_known(&self, name: &str) -> bool {
        let Some(tools) = self.tools else {
            return true;
        };
        if tools.contains(name) || self.has_agent(name) {
            return true;
        }
        self.agents
            .list_all()
            .values()
            .any(|entry| entry.metadata().has_capability(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value> {
    let value = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(value)
}

pub fn load_document(path: &Path) -> Result<Value> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        AgentLoomError::validation(path.display().to_string(), "unsupported document extension")
    })?;
    let text = fs::read_to_string(path)?;
    parse_document(&text, format)
}

const TASK_FIELDS: [&str; 9] = [
    "task_id",
    "title",
    "agent",
    "tool",
    "expected_output",
    "depends_on",
    "timeout_sec",
    "timeout_secs",
    "parameters",
];

pub struct WorkflowCompiler<'r> {
    resolver: &'r dyn AgentResolver,
    registered_as: Option<String>,
}

impl<'r> WorkflowCompiler<'r> {
    pub fn new(resolver: &'r dyn AgentResolver) -> Self {
        Self {
            resolver,
            registered_as: None,
        }
    }

    /// Names the agent the compiled template will be registered as; tasks
    /// bound to that name are rejected.
    pub fn registered_as(mut self, name: impl Into<String>) -> Self {
        self.registered_as = Some(name.into());
        self
    }

    pub fn compile(&self, document: &Value, source_path: &str) -> Result<WorkflowTemplate> {
        let fail = |detail: String| AgentLoomError::validation(source_path, detail);
        let mut warnings = Vec::new();

        let root = document
            .as_object()
            .ok_or_else(|| fail("document must be a mapping".into()))?;
        let id = required_str(root, "workflow_id").map_err(&fail)?;
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(fail(format!(
                "workflow_id `{id}` may only contain letters, digits, `_`, `.` and `-`"
            )));
        }
        let name = required_str(root, "workflow_name").map_err(&fail)?;
        let version = optional_str(root, "version").map_err(&fail)?;
        let description = optional_str(root, "description").map_err(&fail)?;
        let primary_agent = optional_str(root, "agent").map_err(&fail)?;
        let dependencies = parse_dependencies(root).map_err(&fail)?;
        let phase_table = match root.get("core_phases") {
            Some(Value::Object(phases)) if !phases.is_empty() => phases,
            Some(Value::Object(_)) => return Err(fail("`core_phases` must not be empty".into())),
            Some(_) => return Err(fail("`core_phases` must be a mapping".into())),
            None => return Err(fail("missing required field `core_phases`".into())),
        };

        let mut phases = Vec::with_capacity(phase_table.len());
        let mut phase_names = BTreeSet::new();
        for (key, raw) in phase_table {
            let phase = parse_phase(key, raw, primary_agent.as_deref()).map_err(&fail)?;
            if !phase_names.insert(phase.name.clone()) {
                return Err(fail(format!("duplicate phase name `{}`", phase.name)));
            }
            phases.push(phase);
        }

        for dependency in dependencies.values() {
            if self.resolver.has_agent(&dependency.name) {
                continue;
            }
            if dependency.required {
                return Err(fail(format!(
                    "required agent dependency `{}` does not resolve to a registered agent",
                    dependency.name
                )));
            }
            warnings.push(format!(
                "optional agent dependency `{}` is not registered",
                dependency.name
            ));
        }
        for phase in &phases {
            for task in &phase.tasks {
                self.check_task_bindings(phase, task, &dependencies, &mut warnings)
                    .map_err(&fail)?;
            }
        }

        let mut phases = order_phases(root, phases, &mut warnings).map_err(&fail)?;
        for phase in &mut phases {
            phase.execution_order = task_waves(phase).map_err(&fail)?;
        }

        for warning in &warnings {
            warn!(template = %id, source = %source_path, "{warning}");
        }
        debug!(template = %id, phases = phases.len(), "compiled workflow template");

        Ok(WorkflowTemplate {
            source: WorkflowSource::from_id(&id),
            id,
            name,
            version,
            description,
            source_path: source_path.to_string(),
            primary_agent,
            phases,
            declared_agent_dependencies: dependencies,
            warnings,
        })
    }

    fn check_task_bindings(
        &self,
        phase: &Phase,
        task: &Task,
        dependencies: &BTreeMap<String, AgentDependency>,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<(), String> {
        let agent = &task.bound_agent;
        if self.registered_as.as_deref() == Some(agent.as_str()) {
            return Err(format!(
                "task `{}` in phase `{}` is bound to `{agent}`, the workflow's own agent",
                task.task_id, phase.name
            ));
        }
        if !self.resolver.has_agent(agent) {
            match dependencies.get(agent) {
                Some(dependency) if !dependency.required => warnings.push(format!(
                    "task `{}` in phase `{}` is bound to optional agent `{agent}`, \
                     which is not registered",
                    task.task_id, phase.name
                )),
                _ => {
                    return Err(format!(
                        "task `{}` in phase `{}` is bound to unknown agent `{agent}`",
                        task.task_id, phase.name
                    ))
                }
            }
        }
        if let Some(capability) = &task.bound_capability {
            if !self.resolver.capability_known(capability) {
                warnings.push(format!(
                    "task `{}` uses capability `{capability}`, \
                     which no registered component provides",
                    task.task_id
                ));
            }
        }
        Ok(())
    }
}

type FieldResult<T> = std::result::Result<T, String>;

fn required_str(object: &Map<String, Value>, field: &str) -> FieldResult<String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("`{field}` must not be empty")),
        Some(_) => Err(format!("`{field}` must be a string")),
        None => Err(format!("missing required field `{field}`")),
    }
}

fn optional_str(object: &Map<String, Value>, field: &str) -> FieldResult<Option<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(format!("`{field}` must be a string")),
    }
}

fn optional_bool(object: &Map<String, Value>, field: &str, default: bool) -> FieldResult<bool> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(format!("`{field}` must be a boolean")),
    }
}

fn optional_u64(object: &Map<String, Value>, field: &str) -> FieldResult<Option<u64>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("`{field}` must be a non-negative integer")),
    }
}

fn string_list(object: &Map<String, Value>, field: &str) -> FieldResult<Vec<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("`{field}` must contain only strings"))
            })
            .collect(),
        Some(_) => Err(format!("`{field}` must be a list of strings")),
    }
}

fn parse_dependencies(root: &Map<String, Value>) -> FieldResult<BTreeMap<String, AgentDependency>> {
    let table = match root.get("agent_dependencies") {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(table)) => table,
        Some(_) => return Err("`agent_dependencies` must be a mapping".into()),
    };
    table
        .iter()
        .map(|(name, raw)| {
            let object = raw
                .as_object()
                .ok_or_else(|| format!("agent dependency `{name}` must be a mapping"))?;
            let dependency = AgentDependency {
                name: name.clone(),
                description: optional_str(object, "description")?.unwrap_or_default(),
                required: optional_bool(object, "required", true)?,
                capabilities: string_list(object, "capabilities")?,
                tools: string_list(object, "tools")?,
            };
            Ok((name.clone(), dependency))
        })
        .collect()
}

fn parse_phase(key: &str, raw: &Value, primary_agent: Option<&str>) -> FieldResult<Phase> {
    let object = raw
        .as_object()
        .ok_or_else(|| format!("phase `{key}` must be a mapping"))?;
    let in_phase = |detail: String| format!("phase `{key}`: {detail}");

    let name = optional_str(object, "name").map_err(in_phase)?.unwrap_or_else(|| key.to_string());
    let parallel = optional_bool(object, "parallel", false).map_err(in_phase)?;
    let max_parallel = optional_u64(object, "max_parallel").map_err(in_phase)?;
    match max_parallel {
        Some(0) => return Err(in_phase("`max_parallel` must be at least 1".into())),
        Some(n) if n > 1 && !parallel => {
            return Err(in_phase("`max_parallel` above 1 requires `parallel: true`".into()))
        }
        _ => {}
    }

    let raw_tasks = match object.get("tasks") {
        Some(Value::Array(tasks)) if !tasks.is_empty() => tasks,
        Some(Value::Array(_)) => return Err(in_phase("must contain at least one task".into())),
        Some(_) => return Err(in_phase("`tasks` must be a list".into())),
        None => return Err(in_phase("missing required field `tasks`".into())),
    };
    let mut tasks = Vec::with_capacity(raw_tasks.len());
    let mut seen = BTreeSet::new();
    for (index, raw_task) in raw_tasks.iter().enumerate() {
        let task = parse_task(index, raw_task, primary_agent).map_err(in_phase)?;
        if !seen.insert(task.task_id.clone()) {
            return Err(in_phase(format!("duplicate task_id `{}`", task.task_id)));
        }
        tasks.push(task);
    }

    Ok(Phase {
        key: key.to_string(),
        name,
        description: optional_str(object, "description").map_err(in_phase)?,
        mandatory: optional_bool(object, "mandatory", true).map_err(in_phase)?,
        parallel,
        max_parallel: max_parallel.map(|n| n as usize),
        tasks,
        execution_order: Vec::new(),
    })
}

fn parse_task(index: usize, raw: &Value, primary_agent: Option<&str>) -> FieldResult<Task> {
    let object = raw
        .as_object()
        .ok_or_else(|| format!("task #{index} must be a mapping"))?;
    let task_id = required_str(object, "task_id").map_err(|e| format!("task #{index}: {e}"))?;
    let in_task = |detail: String| format!("task `{task_id}`: {detail}");

    let bound_agent = match optional_str(object, "agent").map_err(in_task)? {
        Some(agent) => agent,
        None => primary_agent.map(str::to_string).ok_or_else(|| {
            in_task("no `agent` and the workflow declares no primary agent".into())
        })?,
    };
    let timeout_secs = match optional_u64(object, "timeout_secs").map_err(in_task)? {
        Some(secs) => Some(secs),
        None => optional_u64(object, "timeout_sec").map_err(in_task)?,
    };

    let mut parameters: Map<String, Value> = object
        .iter()
        .filter(|(field, _)| !TASK_FIELDS.contains(&field.as_str()))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    match object.get("parameters") {
        None | Some(Value::Null) => {}
        Some(Value::Object(extra)) => {
            for (field, value) in extra {
                parameters.entry(field.clone()).or_insert_with(|| value.clone());
            }
        }
        Some(_) => return Err(in_task("`parameters` must be a mapping".into())),
    }

    Ok(Task {
        title: optional_str(object, "title").map_err(in_task)?.unwrap_or_else(|| task_id.clone()),
        bound_agent,
        bound_capability: optional_str(object, "tool").map_err(in_task)?,
        parameters,
        expected_output: optional_str(object, "expected_output").map_err(in_task)?,
        depends_on: string_list(object, "depends_on").map_err(in_task)?,
        timeout_secs,
        task_id,
    })
}

/// Applies `execution_flow.sequential_phases` when present. Listed phases
/// come first in list order; unlisted ones follow in declaration order.
fn order_phases(
    root: &Map<String, Value>,
    phases: Vec<Phase>,
    warnings: &mut Vec<String>,
) -> FieldResult<Vec<Phase>> {
    let Some(flow) = root.get("execution_flow").and_then(Value::as_object) else {
        return Ok(phases);
    };
    let order = string_list(flow, "sequential_phases").map_err(|e| format!("execution_flow: {e}"))?;
    if order.is_empty() {
        return Ok(phases);
    }

    let mut remaining: Vec<Option<Phase>> = phases.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());
    for wanted in &order {
        let slot = remaining
            .iter_mut()
            .find(|slot| {
                matches!(slot, Some(phase) if &phase.key == wanted || &phase.name == wanted)
            })
            .ok_or_else(|| {
                format!("execution_flow lists `{wanted}`, which is not a phase or is listed twice")
            })?;
        if let Some(phase) = slot.take() {
            ordered.push(phase);
        }
    }
    for phase in remaining.into_iter().flatten() {
        warnings.push(format!(
            "phase `{}` is not listed in execution_flow.sequential_phases; running it last",
            phase.key
        ));
        ordered.push(phase);
    }
    Ok(ordered)
}

/// Groups a phase's tasks into dependency waves, rejecting unknown
/// references and cycles.
fn task_waves(phase: &Phase) -> FieldResult<Vec<Vec<usize>>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..phase.tasks.len()).map(|i| graph.add_node(i)).collect();
    let index_of: BTreeMap<&str, usize> = phase
        .tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.task_id.as_str(), i))
        .collect();

    for (i, task) in phase.tasks.iter().enumerate() {
        for dependency in &task.depends_on {
            let &dep = index_of.get(dependency.as_str()).ok_or_else(|| {
                format!(
                    "task `{}` in phase `{}` depends on `{dependency}`, \
                     which is not a task of that phase",
                    task.task_id, phase.name
                )
            })?;
            if dep == i {
                return Err(format!("task `{}` depends on itself", task.task_id));
            }
            graph.update_edge(nodes[dep], nodes[i], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let task = &phase.tasks[graph[cycle.node_id()]];
        format!(
            "task dependencies in phase `{}` form a cycle through `{}`",
            phase.name, task.task_id
        )
    })?;

    let mut level = vec![0usize; phase.tasks.len()];
    for node in &sorted {
        let task = graph[*node];
        for dependency in &phase.tasks[task].depends_on {
            let dep = index_of[dependency.as_str()];
            level[task] = level[task].max(level[dep] + 1);
        }
    }
    let depth = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut waves = vec![Vec::new(); depth];
    for (task, wave) in level.iter().enumerate() {
        waves[*wave].push(task);
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn phase_with(tasks: Value) -> Phase {
        parse_phase("p", &json!({ "tasks": tasks, "parallel": true }), Some("worker")).unwrap()
    }

    #[test]
    fn waves_follow_dependencies_in_declaration_order() {
        let phase = phase_with(json!([
            { "task_id": "report", "depends_on": ["a", "b"] },
            { "task_id": "a" },
            { "task_id": "b", "depends_on": "a" },
            { "task_id": "c" },
        ]));
        assert_eq!(task_waves(&phase).unwrap(), vec![vec![1, 3], vec![2], vec![0]]);
    }

    #[test]
    fn cyclic_task_dependencies_are_rejected() {
        let phase = phase_with(json!([
            { "task_id": "a", "depends_on": ["b"] },
            { "task_id": "b", "depends_on": ["a"] },
        ]));
        assert!(task_waves(&phase).unwrap_err().contains("cycle"));
    }

    #[test]
    fn unknown_task_fields_become_parameters() {
        let phase = phase_with(json!([{
            "task_id": "q",
            "goal": "count errors",
            "search_query": "index=main",
            "parameters": { "earliest": "-1h", "goal": "shadowed" },
        }]));
        let task = &phase.tasks[0];
        assert_eq!(task.goal(), "count errors");
        assert_eq!(task.parameters["search_query"], "index=main");
        assert_eq!(task.parameters["earliest"], "-1h");
        assert_eq!(task.bound_agent, "worker");
    }

    #[test]
    fn format_is_picked_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.YML")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.json")), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.toml")), None);
    }
}
