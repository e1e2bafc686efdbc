//! Runs a compiled workflow by delegating each task to its bound agent.
//!
//! Phases run strictly one after another. Inside a phase, tasks run in
//! dependency waves; a parallel phase runs each wave concurrently up to its
//! limit, a sequential phase runs one task at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::agent::{Agent, AgentContext, AgentInit, AgentLookup};
use crate::error::{AgentLoomError, Result};
use crate::flow::template::{Phase, Task, WorkflowTemplate};

/// Context key listing the workflows a task was delegated through,
/// outermost first.
pub const DELEGATION_CHAIN_KEY: &str = "delegation_chain";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub default_max_parallel: usize,
    pub task_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_max_parallel: 4,
            task_timeout: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskRun {
    pub task_id: String,
    pub agent: String,
    pub success: bool,
    /// False when the task was failed without being started.
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRun {
    fn finished(task: &Task, result: Result<Value>) -> Self {
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            task_id: task.task_id.clone(),
            agent: task.bound_agent.clone(),
            success: error.is_none(),
            executed: true,
            output,
            error,
        }
    }

    fn not_started(task: &Task, reason: String) -> Self {
        Self {
            task_id: task.task_id.clone(),
            agent: task.bound_agent.clone(),
            success: false,
            executed: false,
            output: None,
            error: Some(reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseRun {
    pub name: String,
    pub mandatory: bool,
    pub success: bool,
    /// Task results in declaration order.
    pub tasks: Vec<TaskRun>,
}

impl PhaseRun {
    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|task| task.success).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.len() - self.succeeded()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub success: bool,
    pub phases: Vec<PhaseRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

impl WorkflowRun {
    pub fn phase(&self, name: &str) -> Option<&PhaseRun> {
        self.phases.iter().find(|phase| phase.name == name)
    }
}

/// The agent synthesized for one workflow template.
pub struct WorkflowAgent {
    name: String,
    template: Arc<WorkflowTemplate>,
    lookup: Option<Arc<dyn AgentLookup>>,
    settings: ExecutorSettings,
}

impl WorkflowAgent {
    pub fn new(
        name: impl Into<String>,
        template: Arc<WorkflowTemplate>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            lookup: None,
            settings,
        }
    }

    pub fn from_init(
        name: impl Into<String>,
        template: Arc<WorkflowTemplate>,
        settings: ExecutorSettings,
        init: AgentInit,
    ) -> Self {
        let mut agent = Self::new(name, template, settings);
        agent.lookup = init.lookup;
        agent
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn AgentLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn template(&self) -> &Arc<WorkflowTemplate> {
        &self.template
    }

    pub fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    #[instrument(skip_all, fields(workflow = %self.template.id))]
    pub async fn run(&self, goal: &str, context: &AgentContext) -> WorkflowRun {
        let mut run = WorkflowRun {
            workflow_id: self.template.id.clone(),
            success: true,
            phases: Vec::with_capacity(self.template.phases.len()),
            error_summary: None,
        };
        let Some(lookup) = self.lookup.as_deref() else {
            run.success = false;
            run.error_summary = Some("no agent lookup available to delegate tasks".into());
            return run;
        };

        let mut results = Map::new();
        for phase in &self.template.phases {
            let phase_run = self.run_phase(lookup, phase, goal, context, &mut results).await;
            let failed = !phase_run.success;
            let failures = phase_run.failed();
            run.phases.push(phase_run);
            if !failed {
                continue;
            }
            if phase.mandatory {
                warn!(phase = %phase.name, failures, "mandatory phase failed; stopping workflow");
                run.success = false;
                run.error_summary = Some(format!(
                    "mandatory phase `{}` failed ({failures} failed task(s))",
                    phase.name
                ));
                break;
            }
            warn!(phase = %phase.name, failures, "optional phase failed; continuing");
        }
        info!(success = run.success, phases = run.phases.len(), "workflow finished");
        run
    }

    async fn run_phase(
        &self,
        lookup: &dyn AgentLookup,
        phase: &Phase,
        goal: &str,
        context: &AgentContext,
        results: &mut Map<String, Value>,
    ) -> PhaseRun {
        let mut runs: Vec<Option<TaskRun>> = vec![None; phase.tasks.len()];
        let limit = if phase.parallel {
            phase
                .max_parallel
                .unwrap_or(self.settings.default_max_parallel)
                .max(1)
        } else {
            1
        };
        debug!(phase = %phase.name, waves = phase.execution_order.len(), limit, "starting phase");

        for wave in &phase.execution_order {
            let mut ready = Vec::with_capacity(wave.len());
            for &index in wave {
                let task = &phase.tasks[index];
                let blocked = task.depends_on.iter().find(|dep| {
                    phase
                        .tasks
                        .iter()
                        .position(|t| &t.task_id == *dep)
                        .and_then(|i| runs[i].as_ref())
                        .map_or(true, |run| !run.success)
                });
                match blocked {
                    Some(dep) => {
                        runs[index] = Some(TaskRun::not_started(
                            task,
                            format!("dependency `{dep}` did not succeed"),
                        ));
                    }
                    None => ready.push(index),
                }
            }

            if limit == 1 {
                for index in ready {
                    let task = &phase.tasks[index];
                    let task_context = self.task_context(phase, task, goal, context, results);
                    let run = self.run_task(lookup, task, task_context).await;
                    record(results, phase, &run);
                    runs[index] = Some(run);
                }
            } else {
                let snapshot = results.clone();
                let finished: Vec<(usize, TaskRun)> = stream::iter(ready)
                    .map(|index| {
                        let task = &phase.tasks[index];
                        let task_context = self.task_context(phase, task, goal, context, &snapshot);
                        async move { (index, self.run_task(lookup, task, task_context).await) }
                    })
                    .buffer_unordered(limit)
                    .collect()
                    .await;
                for (index, run) in finished {
                    record(results, phase, &run);
                    runs[index] = Some(run);
                }
            }
        }

        let tasks: Vec<TaskRun> = runs.into_iter().flatten().collect();
        PhaseRun {
            name: phase.name.clone(),
            mandatory: phase.mandatory,
            success: tasks.len() == phase.tasks.len() && tasks.iter().all(|t| t.success),
            tasks,
        }
    }

    async fn run_task(
        &self,
        lookup: &dyn AgentLookup,
        task: &Task,
        context: AgentContext,
    ) -> TaskRun {
        if task.bound_agent == self.name {
            return TaskRun::not_started(task, "a workflow cannot delegate to itself".into());
        }
        let chain = delegation_chain(&context);
        if chain.iter().any(|name| name == &task.bound_agent) {
            return TaskRun::not_started(
                task,
                format!(
                    "delegating to `{}` would re-enter the workflow chain {}",
                    task.bound_agent,
                    chain.join(" -> ")
                ),
            );
        }
        let agent = match lookup.agent(&task.bound_agent) {
            Ok(agent) => agent,
            Err(err) => return TaskRun::not_started(task, err.to_string()),
        };
        let timeout = task
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.settings.task_timeout);

        debug!(task = %task.task_id, agent = %task.bound_agent, "running task");
        let execution = agent.execute(task.goal(), &context);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err(AgentLoomError::TaskTimeout {
                    task_id: task.task_id.clone(),
                    secs: limit.as_secs(),
                }),
            },
            None => execution.await,
        };
        if let Err(err) = &result {
            warn!(task = %task.task_id, agent = %task.bound_agent, error = %err, "task failed");
        }
        TaskRun::finished(task, result)
    }

    fn task_context(
        &self,
        phase: &Phase,
        task: &Task,
        goal: &str,
        base: &AgentContext,
        results: &Map<String, Value>,
    ) -> AgentContext {
        let mut context = base.clone();
        context.insert(
            "workflow".into(),
            json!({ "id": self.template.id, "name": self.template.name, "goal": goal }),
        );
        context.insert("phase".into(), Value::String(phase.name.clone()));
        context.insert("task_id".into(), Value::String(task.task_id.clone()));
        if let Some(expected) = &task.expected_output {
            context.insert("expected_output".into(), Value::String(expected.clone()));
        }
        if let Some(capability) = &task.bound_capability {
            context.insert("tool".into(), Value::String(capability.clone()));
        }
        context.insert("parameters".into(), Value::Object(task.parameters.clone()));
        context.insert("previous_results".into(), Value::Object(results.clone()));
        let mut chain = delegation_chain(base);
        chain.push(self.name.clone());
        context.insert(DELEGATION_CHAIN_KEY.into(), json!(chain));
        context
    }
}

fn delegation_chain(context: &AgentContext) -> Vec<String> {
    context
        .get(DELEGATION_CHAIN_KEY)
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Keeps successful task output under `<phase>.<task_id>` for later tasks.
fn record(results: &mut Map<String, Value>, phase: &Phase, run: &TaskRun) {
    if let Some(output) = &run.output {
        results.insert(format!("{}.{}", phase.key, run.task_id), output.clone());
    }
}

#[async_trait]
impl Agent for WorkflowAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, goal: &str, context: &AgentContext) -> Result<Value> {
        let run = self.run(goal, context).await;
        let value = serde_json::to_value(&run)?;
        if run.success {
            Ok(value)
        } else {
            Err(AgentLoomError::WorkflowFailed {
                workflow_id: run.workflow_id,
                summary: run.error_summary.unwrap_or_default(),
                run: Box::new(value),
            })
        }
    }
}
