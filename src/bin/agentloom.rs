use std::path::PathBuf;
use std::sync::Arc;

use agentloom::agent::builtin;
use agentloom::utils::LoggingConfig;
use agentloom::{
    load_document, Agent, AgentConstructor, AgentInit, AgentLoomError, AgentNamer, AgentRegistry,
    ComponentMetadata, DynamicFactory, EntryOrigin, LoomConfig, NamespaceCatalog, Orchestrator,
    ToolRegistry,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "agentloom", version, about = "Assemble agents, tools and workflows", author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile workflow documents and report the result for each.
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Agent names the documents may bind to.
        #[arg(long = "agent")]
        agents: Vec<String>,
        /// Supplies template extensions and skip patterns.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Assemble the built-in namespace plus templates and print a summary.
    Assemble {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long = "templates")]
        templates: Vec<PathBuf>,
    },
    /// Assemble, then invoke one unit of the surface.
    Invoke {
        name: String,
        /// JSON input; a plain string is passed as the goal.
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long = "templates")]
        templates: Vec<PathBuf>,
    },
    /// List workflow documents with the agent names they would get.
    Inspect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingConfig::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate {
            paths,
            agents,
            config,
        } => handle_validate(paths, agents, config)?,
        Command::Assemble { config, templates } => handle_assemble(config, templates)?,
        Command::Invoke {
            name,
            input,
            config,
            templates,
        } => handle_invoke(name, input, config, templates).await?,
        Command::Inspect { paths, config } => handle_inspect(paths, config)?,
    }
    Ok(())
}

fn load_config(config: Option<PathBuf>) -> anyhow::Result<LoomConfig> {
    let loom = match config {
        Some(path) => LoomConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LoomConfig::default(),
    };
    Ok(loom.with_env_overrides())
}

/// Runs a synthesis pass into scratch registries holding only the named
/// agents, so results match what assembly would accept.
fn handle_validate(
    paths: Vec<PathBuf>,
    agents: Vec<String>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let loom = load_config(config)?;
    let registry = Arc::new(AgentRegistry::agents());
    for name in agents {
        let constructor: AgentConstructor =
            Arc::new(|_init: AgentInit| -> agentloom::Result<Arc<dyn Agent>> {
                Err(AgentLoomError::Config("validation agents are never constructed".into()))
            });
        let metadata = ComponentMetadata::builder(name.clone()).build();
        registry.register(name, constructor, metadata, EntryOrigin::Manual)?;
    }
    let report = DynamicFactory::new(registry, Arc::new(ToolRegistry::tools()))
        .with_scanner(loom.scanner())
        .synthesize_all(&paths, None);

    let mut results: Vec<Value> = report
        .synthesized
        .values()
        .map(|agent| {
            json!({
                "path": agent.source_path,
                "valid": true,
                "workflow_id": agent.template_id,
                "agent_name": agent.name,
                "phases": agent.template.phases.len(),
                "tasks": agent.template.task_count(),
                "warnings": agent.template.warnings,
            })
        })
        .collect();
    for item in &report.skipped {
        results.push(json!({
            "path": item.subject,
            "valid": false,
            "stage": item.stage,
            "error": item.reason,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    if !report.skipped.is_empty() {
        anyhow::bail!("{} document(s) failed validation", report.skipped.len());
    }
    Ok(())
}

fn build_orchestrator(
    config: Option<PathBuf>,
    templates: Vec<PathBuf>,
) -> anyhow::Result<Orchestrator> {
    let mut loom = load_config(config)?;
    if loom.agent_roots.is_empty() {
        loom.agent_roots.push(builtin::BUILTIN_ROOT.to_string());
    }
    loom.template_paths.extend(templates);

    let catalog = NamespaceCatalog::new().with(builtin::namespace());
    Ok(Orchestrator::new(loom, catalog))
}

fn handle_assemble(config: Option<PathBuf>, templates: Vec<PathBuf>) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, templates)?;
    orchestrator.assemble()?;
    println!("{}", serde_json::to_string_pretty(&orchestrator.summary())?);
    Ok(())
}

async fn handle_invoke(
    name: String,
    input: String,
    config: Option<PathBuf>,
    templates: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, templates)?;
    let surface = orchestrator.assemble()?;
    let input = serde_json::from_str(&input).unwrap_or(Value::String(input));
    let output = surface.invoke(&name, input).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_inspect(paths: Vec<PathBuf>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let loom = load_config(config)?;
    let (files, missing) = loom.scanner().scan(&paths);
    let mut namer = AgentNamer::default();
    let mut listing = Vec::new();
    for path in files {
        let source = path.display().to_string();
        let document = match load_document(&path) {
            Ok(document) => document,
            Err(err) => {
                listing.push(json!({ "path": source, "error": err.to_string() }));
                continue;
            }
        };
        let id = document.get("workflow_id").and_then(Value::as_str);
        let agent_name = match namer.assign(id, &path) {
            Ok(name) => name,
            Err(reason) => {
                listing.push(json!({ "path": source, "workflow_id": id, "error": reason }));
                continue;
            }
        };
        listing.push(json!({
            "path": source,
            "workflow_id": id,
            "workflow_name": document.get("workflow_name"),
            "agent_name": agent_name,
        }));
    }
    for item in missing {
        listing.push(json!({ "path": item.subject, "error": item.reason }));
    }
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}
