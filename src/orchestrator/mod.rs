//! Startup assembly: discovery, synthesis, tool attachment and back-reference
//! injection, producing the one surface the external executor drives.

mod surface;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{Agent, AgentInit, AgentLookup};
use crate::config::LoomConfig;
use crate::discovery::{AgentToolMapping, DiscoveryEngine, NamespaceCatalog};
use crate::error::{AgentLoomError, ComponentKind, Result, SkipStage, SkippedItem};
use crate::flow::DynamicFactory;
use crate::registry::{
    AgentConstructor, AgentRegistry, ComponentMetadata, EntryOrigin, RegisterOutcome,
    ToolConstructor, ToolRegistry,
};
use crate::tools::{Tool, ToolInit};

pub use surface::{AgentCallable, AssemblyReport, CoordinatedSurface, Invocable, ToolCallable};

/// Name-based agent access backed by a weak handle on the agent registry.
///
/// Only instances installed by assembly are visible.
pub struct RegistryLookup {
    agents: Weak<AgentRegistry>,
}

impl RegistryLookup {
    pub fn new(agents: &Arc<AgentRegistry>) -> Self {
        Self {
            agents: Arc::downgrade(agents),
        }
    }

    fn registry(&self) -> Result<Arc<AgentRegistry>> {
        self.agents
            .upgrade()
            .ok_or_else(|| AgentLoomError::Config("agent registry is no longer alive".into()))
    }
}

impl AgentLookup for RegistryLookup {
    fn agent(&self, name: &str) -> Result<Arc<dyn Agent>> {
        let registry = self.registry()?;
        let entry = registry.get(name)?;
        entry
            .cached()
            .ok_or_else(|| AgentLoomError::NotAssembled(name.to_string()))
    }

    fn agent_names(&self) -> Vec<String> {
        self.registry().map(|r| r.names()).unwrap_or_default()
    }
}

pub struct Orchestrator {
    config: LoomConfig,
    catalog: Arc<NamespaceCatalog>,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    surface: OnceCell<CoordinatedSurface>,
    mapping: OnceCell<AgentToolMapping>,
}

impl Orchestrator {
    pub fn new(config: LoomConfig, catalog: NamespaceCatalog) -> Self {
        Self {
            config,
            catalog: Arc::new(catalog),
            agents: Arc::new(AgentRegistry::agents()),
            tools: Arc::new(ToolRegistry::tools()),
            surface: OnceCell::new(),
            mapping: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &LoomConfig {
        &self.config
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn is_assembled(&self) -> bool {
        self.surface.get().is_some()
    }

    /// Adds a hand-authored agent outside any namespace. Only allowed before
    /// assembly.
    pub fn register_agent(
        &self,
        metadata: ComponentMetadata,
        constructor: AgentConstructor,
    ) -> Result<RegisterOutcome> {
        self.ensure_open()?;
        self.agents
            .register(metadata.name.clone(), constructor, metadata, EntryOrigin::Manual)
    }

    pub fn register_tool(
        &self,
        metadata: ComponentMetadata,
        constructor: ToolConstructor,
    ) -> Result<RegisterOutcome> {
        self.ensure_open()?;
        self.tools
            .register(metadata.name.clone(), constructor, metadata, EntryOrigin::Manual)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_assembled() {
            return Err(AgentLoomError::Config(
                "registries are read-only once assembly has run".into(),
            ));
        }
        Ok(())
    }

    pub fn lookup(&self) -> Arc<dyn AgentLookup> {
        Arc::new(RegistryLookup::new(&self.agents))
    }

    /// Runs assembly on first call; later calls return the same surface.
    pub fn assemble(&self) -> Result<&CoordinatedSurface> {
        self.surface.get_or_try_init(|| self.build_surface())
    }

    pub fn mapping(&self) -> Option<&AgentToolMapping> {
        self.mapping.get()
    }

    fn build_surface(&self) -> Result<CoordinatedSurface> {
        self.config.validate()?;
        let mut report = AssemblyReport::default();

        let engine = DiscoveryEngine::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.agents),
            Arc::clone(&self.tools),
        );
        report.discovery = engine.discover_all(&self.config.agent_roots, &self.config.tool_roots);

        let lookup = self.lookup();
        report.synthesis = DynamicFactory::new(Arc::clone(&self.agents), Arc::clone(&self.tools))
            .with_scanner(self.config.scanner())
            .with_settings(self.config.executor_settings())
            .synthesize_all(&self.config.template_paths, Some(Arc::clone(&lookup)));

        let mapping = engine.get_agent_tool_mapping();
        for (owner, tools) in mapping.orphans(&self.agents) {
            for tool in tools {
                report.skipped.push(SkippedItem::new(
                    SkipStage::Assembly,
                    tool,
                    format!("owning agent `{owner}` is not registered"),
                ));
            }
        }

        let root_tools = mapping.root_eligible(&self.tools);
        let mut units: Vec<Arc<dyn Invocable>> = Vec::new();

        for name in self.agents.names() {
            let owned = mapping.get_agent_tools(&name);
            let attached = self.instantiate_tools(owned, &mut report.skipped);
            let init = AgentInit {
                tools: attached.iter().map(|(_, tool)| Arc::clone(tool)).collect(),
                lookup: Some(Arc::clone(&lookup)),
            };
            // Synthesized workflows already hold the lookup.
            let prebuilt = report
                .synthesis
                .synthesized
                .get(&name)
                .and_then(|synthesized| synthesized.instance.clone())
                .map(|instance| instance as Arc<dyn Agent>);
            match self.install_agent(&name, prebuilt, init) {
                Ok((agent, description)) => {
                    report
                        .agent_tools
                        .insert(name.clone(), attached.into_iter().map(|(tool, _)| tool).collect());
                    units.push(Arc::new(AgentCallable::new(agent, description)));
                }
                Err(err) => report.skipped.push(SkippedItem::new(SkipStage::Assembly, name, err)),
            }
        }

        for (name, tool) in self.instantiate_tools(root_tools, &mut report.skipped) {
            if self.agents.contains(&name) {
                report.skipped.push(SkippedItem::new(
                    SkipStage::Assembly,
                    name,
                    "an agent with the same name is already on the surface",
                ));
                continue;
            }
            let description = self
                .tools
                .get(&name)
                .map(|entry| entry.metadata().description.clone())
                .unwrap_or_default();
            report.root_tools.push(name);
            units.push(Arc::new(ToolCallable::new(tool, description)));
        }

        for item in &report.skipped {
            warn!(subject = %item.subject, reason = %item.reason, "assembly skipped item");
        }
        if units.is_empty() {
            if self.config.fail_on_empty {
                return Err(AgentLoomError::EmptySurface);
            }
            warn!("assembly produced an empty surface");
        }

        info!(
            agents = report.agent_tools.len(),
            root_tools = report.root_tools.len(),
            skipped = report.skipped_count(),
            "assembly finished"
        );
        let _ = self.mapping.set(mapping);
        Ok(CoordinatedSurface { units, report })
    }

    fn instantiate_tools(
        &self,
        names: impl IntoIterator<Item = String>,
        skipped: &mut Vec<SkippedItem>,
    ) -> Vec<(String, Arc<dyn Tool>)> {
        names
            .into_iter()
            .filter_map(|name| match self.tools.get_or_create_instance(&name, ToolInit::default()) {
                Ok(tool) => Some((name, tool)),
                Err(err) => {
                    skipped.push(SkippedItem::new(SkipStage::Assembly, name, err));
                    None
                }
            })
            .collect()
    }

    /// Installs the canonical instance of `name` as the entry's single
    /// permitted overwrite, constructing it unless one is supplied.
    fn install_agent(
        &self,
        name: &str,
        prebuilt: Option<Arc<dyn Agent>>,
        init: AgentInit,
    ) -> Result<(Arc<dyn Agent>, String)> {
        let entry = self.agents.get(name)?;
        let agent = match prebuilt {
            Some(agent) => agent,
            None => entry.construct(init)?,
        };
        self.agents.install_instance(name, Arc::clone(&agent))?;
        Ok((agent, entry.metadata().description.clone()))
    }

    pub fn summary(&self) -> Value {
        let agents = self.agents.summary();
        let tools = self.tools.summary();
        let Some(surface) = self.surface.get() else {
            return json!({
                "assembled": false,
                "agents": agents,
                "tools": tools,
            });
        };
        let report = &surface.report;
        let owned: BTreeMap<String, String> =
            self.mapping.get().map(|m| m.owned_tools()).unwrap_or_default();
        json!({
            "assembled": true,
            "agents": agents,
            "tools": tools,
            "surface": surface.names(),
            "root_tools": report.root_tools,
            "agent_tools": report.agent_tools,
            "tool_owners": owned,
            "discovery": {
                "agents_found": report.discovery.agents_found,
                "tools_found": report.discovery.tools_found,
                "roots_scanned": report.discovery.roots_scanned,
            },
            "synthesized": report.synthesis.synthesized.keys().collect::<Vec<_>>(),
            "skipped_count": report.skipped_count(),
            "skipped": report.skipped_reasons(),
        })
    }
}

impl AgentLookup for Orchestrator {
    fn agent(&self, name: &str) -> Result<Arc<dyn Agent>> {
        if !self.is_assembled() {
            return Err(AgentLoomError::NotAssembled(name.to_string()));
        }
        self.agents
            .get(name)?
            .cached()
            .ok_or_else(|| AgentLoomError::not_found(ComponentKind::Agent, name))
    }

    fn agent_names(&self) -> Vec<String> {
        self.agents.names()
    }
}
