pub mod agent;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod tools;
pub mod utils;

pub use agent::{Agent, AgentContext, AgentInit, AgentLookup};
pub use config::{EnvConfig, LoomConfig};
pub use discovery::{
    AgentExport, AgentToolMapping, ComponentModule, ComponentNamespace, DiscoveryEngine,
    DiscoveryReport, Export, NamespaceCatalog, StaticModule, ToolExport,
};
pub use error::{AgentLoomError, ComponentKind, Result, SkipStage, SkippedItem};
pub use flow::{
    derive_agent_name, load_document, parse_document, AgentNamer, AgentResolver, DocumentFormat,
    DynamicFactory, ExecutorSettings, Phase, PhaseRun, RegistryResolver, SynthesisReport,
    SynthesizedAgent, Task, TaskRun, TemplateScanner, WorkflowAgent, WorkflowCompiler,
    WorkflowRun, WorkflowSource, WorkflowTemplate,
};
pub use orchestrator::{
    AgentCallable, AssemblyReport, CoordinatedSurface, Invocable, Orchestrator, RegistryLookup,
    ToolCallable,
};
pub use registry::{
    AgentConstructor, AgentRegistry, ComponentMetadata, ComponentRegistry, EntryOrigin, ParamSpec,
    ParamType, RegisterOutcome, RegistryEntry, ToolConstructor, ToolRegistry,
};
pub use schema::{validate_value, Schema, SchemaError, SchemaKind};
pub use tools::{invoke_checked, Tool, ToolInit};
pub use utils::logging;
