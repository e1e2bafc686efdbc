//! Workflow documents: compilation, execution and synthesis into agents.

pub mod compiler;
pub mod executor;
pub mod factory;
pub mod template;

pub use compiler::{
    load_document, parse_document, AgentResolver, DocumentFormat, RegistryResolver,
    WorkflowCompiler,
};
pub use executor::{
    ExecutorSettings, PhaseRun, TaskRun, WorkflowAgent, WorkflowRun, DELEGATION_CHAIN_KEY,
};
pub use factory::{
    derive_agent_name, AgentNamer, DynamicFactory, SynthesisReport, SynthesizedAgent,
    TemplateScanner,
};
pub use template::{AgentDependency, Phase, Task, WorkflowSource, WorkflowTemplate};
