//! Scans namespace roots for agent and tool exports and registers them.
//!
//! Roots are scanned in the order given, agent roots before tool roots.
//! Any single failure (a module that fails to load, a symbol that does not
//! meet its contract, a name already taken) is logged and recorded in the
//! report; the scan always runs to completion.

mod mapping;
mod namespace;

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AgentLoomError, ComponentKind, Result, SkipStage, SkippedItem};
use crate::registry::{
    AgentRegistry, ComponentMetadata, EntryOrigin, RegisterOutcome, ToolRegistry,
};

pub use mapping::AgentToolMapping;
pub use namespace::{
    AgentExport, ComponentModule, ComponentNamespace, Export, NamespaceCatalog, StaticModule,
    ToolExport,
};

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiscoveryReport {
    /// Agent exports that are present in the registry after the pass.
    pub agents_found: usize,
    pub tools_found: usize,
    /// Exports that matched an entry from an earlier pass.
    pub unchanged: usize,
    pub roots_scanned: Vec<String>,
    pub skipped: Vec<SkippedItem>,
}

impl DiscoveryReport {
    fn skip(
        &mut self,
        stage: SkipStage,
        subject: impl Into<String>,
        reason: impl std::fmt::Display,
    ) {
        let item = SkippedItem::new(stage, subject, reason);
        warn!(
            stage = ?item.stage,
            subject = %item.subject,
            reason = %item.reason,
            "discovery skipped item"
        );
        self.skipped.push(item);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RootRole {
    Agents,
    Tools,
}

pub struct DiscoveryEngine {
    catalog: Arc<NamespaceCatalog>,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
}

impl DiscoveryEngine {
    pub fn new(
        catalog: Arc<NamespaceCatalog>,
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            catalog,
            agents,
            tools,
        }
    }

    /// Agent roots may export agents and tools; tool roots may export tools
    /// only. A root listed in both is scanned once, as an agent root.
    pub fn discover_all(&self, agent_roots: &[String], tool_roots: &[String]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut seen = BTreeSet::new();
        let passes = agent_roots
            .iter()
            .map(|root| (root, RootRole::Agents))
            .chain(tool_roots.iter().map(|root| (root, RootRole::Tools)));

        for (root, role) in passes {
            if !seen.insert(root.clone()) {
                debug!(root = %root, "root already scanned in this pass");
                continue;
            }
            self.scan_root(root, role, &mut report);
        }

        info!(
            agents = report.agents_found,
            tools = report.tools_found,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "discovery pass finished"
        );
        report
    }

    pub fn get_agent_tool_mapping(&self) -> AgentToolMapping {
        AgentToolMapping::compute(&self.agents, &self.tools)
    }

    fn scan_root(&self, root: &str, role: RootRole, report: &mut DiscoveryReport) {
        let Some(namespace) = self.catalog.get(root) else {
            report.skip(SkipStage::Import, root, "namespace root is not in the catalog");
            return;
        };
        report.roots_scanned.push(root.to_string());
        debug!(root = %root, modules = namespace.modules().len(), "scanning namespace root");

        for module in namespace.modules() {
            let exports = match load_isolated(module.as_ref()) {
                Ok(exports) => exports,
                Err(err) => {
                    report.skip(SkipStage::Import, module.name(), err);
                    continue;
                }
            };
            for export in exports {
                self.accept(root, module.name(), role, export, report);
            }
        }
    }

    fn accept(
        &self,
        root: &str,
        module: &str,
        role: RootRole,
        export: Export,
        report: &mut DiscoveryReport,
    ) {
        let subject = format!("{module}::{}", export.symbol());
        let result = match export {
            Export::Opaque { symbol } => {
                debug!(module = %module, symbol = %symbol, "ignoring non-component symbol");
                return;
            }
            Export::Agent(export) if role == RootRole::Tools => Err(contract(
                ComponentKind::Agent,
                module,
                &export.symbol,
                "agents cannot be exported from a tool root",
            )),
            Export::Agent(export) => self.register_agent(root, module, export),
            Export::Tool(export) => self.register_tool(root, module, export),
        };

        match result {
            Ok((kind, outcome)) => {
                match kind {
                    ComponentKind::Agent => report.agents_found += 1,
                    ComponentKind::Tool => report.tools_found += 1,
                }
                if outcome == RegisterOutcome::Unchanged {
                    report.unchanged += 1;
                }
            }
            Err(err @ AgentLoomError::ContractMismatch { .. }) => {
                report.skip(SkipStage::Contract, subject, err)
            }
            Err(err) => report.skip(SkipStage::Registration, subject, err),
        }
    }

    fn register_agent(
        &self,
        root: &str,
        module: &str,
        export: AgentExport,
    ) -> Result<(ComponentKind, RegisterOutcome)> {
        let kind = ComponentKind::Agent;
        let metadata = checked_metadata(kind, module, &export.symbol, export.metadata)?;
        let constructor = export.constructor.ok_or_else(|| {
            contract(kind, module, &export.symbol, "no `execute(goal, context)` entry point")
        })?;
        let origin = EntryOrigin::discovered(root, module, &export.symbol);
        let outcome = self
            .agents
            .register(metadata.name.clone(), constructor, metadata, origin)?;
        Ok((kind, outcome))
    }

    fn register_tool(
        &self,
        root: &str,
        module: &str,
        export: ToolExport,
    ) -> Result<(ComponentKind, RegisterOutcome)> {
        let kind = ComponentKind::Tool;
        let metadata = checked_metadata(kind, module, &export.symbol, export.metadata)?;
        if export.schema.is_none() {
            return Err(contract(kind, module, &export.symbol, "no parameter schema"));
        }
        let constructor = export.constructor.ok_or_else(|| {
            contract(kind, module, &export.symbol, "no typed `execute(params)` entry point")
        })?;
        let origin = EntryOrigin::discovered(root, module, &export.symbol);
        let outcome = self
            .tools
            .register(metadata.name.clone(), constructor, metadata, origin)?;
        Ok((kind, outcome))
    }
}

/// Runs a module's import step, turning a panic into an ordinary error.
fn load_isolated(module: &dyn ComponentModule) -> Result<Vec<Export>> {
    match panic::catch_unwind(AssertUnwindSafe(|| module.load())) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AgentLoomError::Other(anyhow::anyhow!(
                "module `{}` panicked while loading: {message}",
                module.name()
            )))
        }
    }
}

fn checked_metadata(
    kind: ComponentKind,
    module: &str,
    symbol: &str,
    metadata: Option<ComponentMetadata>,
) -> Result<ComponentMetadata> {
    let metadata =
        metadata.ok_or_else(|| contract(kind, module, symbol, "no metadata descriptor"))?;
    if metadata.name.trim().is_empty() {
        return Err(contract(kind, module, symbol, "metadata name is empty"));
    }
    if metadata.name.trim() != metadata.name {
        return Err(contract(kind, module, symbol, "metadata name has surrounding whitespace"));
    }
    if metadata.disabled {
        return Err(AgentLoomError::Config(format!(
            "{kind} `{}` is disabled in its metadata",
            metadata.name
        )));
    }
    Ok(metadata)
}

fn contract(kind: ComponentKind, module: &str, symbol: &str, reason: &str) -> AgentLoomError {
    AgentLoomError::ContractMismatch {
        kind,
        module: module.to_string(),
        symbol: symbol.to_string(),
        reason: reason.to_string(),
    }
}
