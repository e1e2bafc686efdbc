use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentInit, AgentLookup};
use crate::error::{AgentLoomError, SkipStage, SkippedItem};
use crate::flow::compiler::{load_document, DocumentFormat, RegistryResolver, WorkflowCompiler};
use crate::flow::executor::{ExecutorSettings, WorkflowAgent};
use crate::flow::template::WorkflowTemplate;
use crate::registry::{
    AgentConstructor, AgentRegistry, ComponentMetadata, EntryOrigin, RegisterOutcome, ToolRegistry,
};

/// Finds workflow documents under a set of search paths.
#[derive(Clone, Debug)]
pub struct TemplateScanner {
    extensions: Vec<String>,
    skip_patterns: Vec<String>,
}

impl Default for TemplateScanner {
    fn default() -> Self {
        Self::new(
            vec!["json".into(), "yaml".into(), "yml".into()],
            vec!["template".into(), "example".into()],
        )
    }
}

impl TemplateScanner {
    pub fn new(extensions: Vec<String>, skip_patterns: Vec<String>) -> Self {
        Self {
            extensions: extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
            skip_patterns: skip_patterns.into_iter().map(|p| p.to_ascii_lowercase()).collect(),
        }
    }

    /// Documents in path order; directories are walked recursively with
    /// entries sorted by name. Missing paths are reported as skipped.
    pub fn scan(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<SkippedItem>) {
        let mut found = Vec::new();
        let mut skipped = Vec::new();
        for path in paths {
            if path.is_dir() {
                if let Err(err) = self.walk(path, &mut found) {
                    let subject = path.display().to_string();
                    skipped.push(SkippedItem::new(SkipStage::Import, subject, err));
                }
            } else if path.is_file() {
                // Explicitly named files bypass the skip patterns.
                if self.has_extension(path) {
                    found.push(path.clone());
                }
            } else {
                skipped.push(SkippedItem::new(
                    SkipStage::Import,
                    path.display().to_string(),
                    "template search path does not exist",
                ));
            }
        }
        (found, skipped)
    }

    fn walk(&self, dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                self.walk(&path, found)?;
            } else if self.accepts(&path) {
                found.push(path);
            }
        }
        Ok(())
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .is_some_and(|e| self.extensions.contains(&e))
    }

    fn accepts(&self, path: &Path) -> bool {
        if !self.has_extension(path) {
            return false;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if let Some(pattern) = self.skip_patterns.iter().find(|p| stem.contains(p.as_str())) {
            debug!(path = %path.display(), pattern = %pattern, "ignoring document by name");
            return false;
        }
        true
    }
}

/// Registry name for the agent synthesized from `workflow_id`.
pub fn derive_agent_name(workflow_id: &str) -> String {
    let name: String = workflow_id
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "workflow".to_string()
    } else {
        name
    }
}

/// Assigns registry names to workflow documents in scan order.
///
/// The first document with a given `workflow_id` keeps it; a derived name
/// already handed out gets a numeric suffix.
#[derive(Debug, Default)]
pub struct AgentNamer {
    seen_ids: BTreeMap<String, PathBuf>,
    taken: BTreeSet<String>,
}

impl AgentNamer {
    /// Returns the name for the document at `path`, or the reason it is
    /// skipped as a duplicate.
    pub fn assign(
        &mut self,
        workflow_id: Option<&str>,
        path: &Path,
    ) -> std::result::Result<String, String> {
        let Some(id) = workflow_id else {
            // Compilation reports the missing id.
            return Ok(self.unique("workflow"));
        };
        if let Some(first) = self.seen_ids.get(id) {
            return Err(format!("workflow_id `{id}` already loaded from {}", first.display()));
        }
        self.seen_ids.insert(id.to_string(), path.to_path_buf());
        Ok(self.unique(&derive_agent_name(id)))
    }

    fn unique(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut suffix = 2;
        while self.taken.contains(&name) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        if name != base {
            warn!(
                derived = %base,
                assigned = %name,
                "derived agent name already used in this pass"
            );
        }
        self.taken.insert(name.clone());
        name
    }
}

#[derive(Clone, Serialize)]
pub struct SynthesizedAgent {
    pub name: String,
    pub template_id: String,
    pub source_path: String,
    pub outcome: RegisterOutcome,
    #[serde(skip)]
    pub template: Arc<WorkflowTemplate>,
    /// Present when a lookup was supplied to the synthesis pass.
    #[serde(skip)]
    pub instance: Option<Arc<WorkflowAgent>>,
}

#[derive(Clone, Default, Serialize)]
pub struct SynthesisReport {
    pub documents: usize,
    pub synthesized: BTreeMap<String, SynthesizedAgent>,
    pub skipped: Vec<SkippedItem>,
}

struct Candidate {
    path: PathBuf,
    document: Value,
    name: String,
}

/// Compiles workflow documents and registers one [`WorkflowAgent`] per
/// template into the agent registry.
pub struct DynamicFactory {
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    scanner: TemplateScanner,
    settings: ExecutorSettings,
}

impl DynamicFactory {
    pub fn new(agents: Arc<AgentRegistry>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            agents,
            tools,
            scanner: TemplateScanner::default(),
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_scanner(mut self, scanner: TemplateScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs one synthesis pass.
    ///
    /// Names are derived for every readable document before any is compiled,
    /// so a workflow may bind tasks to agents synthesized in the same pass.
    /// Compilation repeats until no further document fails: a document that
    /// fails takes its name out of the pending set, and every workflow bound
    /// to that name is compiled again against the smaller set. Only the
    /// survivors are registered.
    pub fn synthesize_all(
        &self,
        search_paths: &[PathBuf],
        lookup: Option<Arc<dyn AgentLookup>>,
    ) -> SynthesisReport {
        let (paths, mut skipped) = self.scanner.scan(search_paths);
        let mut report = SynthesisReport {
            documents: paths.len(),
            ..SynthesisReport::default()
        };
        let candidates = self.collect_candidates(paths, &mut skipped);

        let (templates, failures) = self.compile_to_fixpoint(&candidates);
        for (candidate, outcome) in candidates.iter().zip(templates.into_iter().zip(failures)) {
            let source_path = candidate.path.display().to_string();
            let template = match outcome {
                (Some(template), None) => template,
                (_, Some(err)) => {
                    warn!(path = %source_path, error = %err, "skipping workflow document");
                    skipped.push(SkippedItem::new(SkipStage::Compile, source_path, err));
                    continue;
                }
                (None, None) => continue,
            };
            match self.register(&candidate.name, &template, lookup.as_ref()) {
                Ok(synthesized) => {
                    report.synthesized.insert(candidate.name.clone(), synthesized);
                }
                Err(item) => skipped.push(item),
            }
        }

        info!(
            documents = report.documents,
            synthesized = report.synthesized.len(),
            skipped = skipped.len(),
            "synthesis pass finished"
        );
        report.skipped = skipped;
        report
    }

    /// Compiles every candidate against the registries plus the names still
    /// pending, dropping failed names until a round adds no new failure.
    ///
    /// A name held by a hand-authored agent is never pending: that candidate
    /// will be rejected at registration, and bindings to the name resolve to
    /// the hand-authored agent.
    fn compile_to_fixpoint(
        &self,
        candidates: &[Candidate],
    ) -> (Vec<Option<Arc<WorkflowTemplate>>>, Vec<Option<AgentLoomError>>) {
        let mut pending: BTreeSet<String> = candidates
            .iter()
            .filter(|c| self.synthesis_may_claim(&c.name))
            .map(|c| c.name.clone())
            .collect();
        let mut templates: Vec<Option<Arc<WorkflowTemplate>>> = vec![None; candidates.len()];
        let mut failures: Vec<Option<AgentLoomError>> =
            candidates.iter().map(|_| None).collect();

        loop {
            let resolver = RegistryResolver::new(&self.agents)
                .with_tools(&self.tools)
                .with_pending(pending.iter().cloned());
            let mut dropped = false;
            for (index, candidate) in candidates.iter().enumerate() {
                if failures[index].is_some() {
                    continue;
                }
                let source_path = candidate.path.display().to_string();
                let compiled = WorkflowCompiler::new(&resolver)
                    .registered_as(candidate.name.clone())
                    .compile(&candidate.document, &source_path);
                match compiled {
                    Ok(template) => templates[index] = Some(Arc::new(template)),
                    Err(err) => {
                        templates[index] = None;
                        failures[index] = Some(err);
                        dropped |= pending.remove(&candidate.name);
                    }
                }
            }
            if !dropped {
                break;
            }
            debug!(pending = pending.len(), "recompiling after dropped workflow names");
        }
        (templates, failures)
    }

    fn synthesis_may_claim(&self, name: &str) -> bool {
        self.agents
            .get(name)
            .map_or(true, |entry| entry.origin().is_synthesized())
    }

    fn collect_candidates(
        &self,
        paths: Vec<PathBuf>,
        skipped: &mut Vec<SkippedItem>,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(paths.len());
        let mut namer = AgentNamer::default();

        for path in paths {
            let subject = path.display().to_string();
            if DocumentFormat::from_path(&path).is_none() {
                debug!(path = %subject, "no workflow parser for extension");
                continue;
            }
            let document = match load_document(&path) {
                Ok(document) => document,
                Err(err) => {
                    warn!(path = %subject, error = %err, "unreadable workflow document");
                    skipped.push(SkippedItem::new(SkipStage::Import, subject, err));
                    continue;
                }
            };
            let id = document.get("workflow_id").and_then(Value::as_str);
            let name = match namer.assign(id, &path) {
                Ok(name) => name,
                Err(reason) => {
                    skipped.push(SkippedItem::new(SkipStage::Synthesis, subject, reason));
                    continue;
                }
            };
            candidates.push(Candidate {
                path,
                document,
                name,
            });
        }
        candidates
    }

    fn register(
        &self,
        name: &str,
        template: &Arc<WorkflowTemplate>,
        lookup: Option<&Arc<dyn AgentLookup>>,
    ) -> std::result::Result<SynthesizedAgent, SkippedItem> {
        let settings = self.settings;
        let ctor_name = name.to_string();
        let ctor_template = Arc::clone(template);
        let constructor: AgentConstructor = Arc::new(move |init: AgentInit| {
            Ok(Arc::new(WorkflowAgent::from_init(
                ctor_name.clone(),
                Arc::clone(&ctor_template),
                settings,
                init,
            )) as Arc<dyn Agent>)
        });
        let origin = EntryOrigin::Synthesized {
            template_id: template.id.clone(),
            source_path: template.source_path.clone(),
        };

        let outcome = self
            .agents
            .register_synthesized(name, constructor, workflow_metadata(name, template), origin)
            .map_err(|err| {
                warn!(name = %name, template = %template.id, error = %err, "synthesis rejected");
                SkippedItem::new(SkipStage::Synthesis, template.source_path.clone(), err)
            })?;

        let instance = lookup.map(|lookup| {
            let agent = WorkflowAgent::new(name, Arc::clone(template), settings);
            Arc::new(agent.with_lookup(Arc::clone(lookup)))
        });
        Ok(SynthesizedAgent {
            name: name.to_string(),
            template_id: template.id.clone(),
            source_path: template.source_path.clone(),
            outcome,
            template: Arc::clone(template),
            instance,
        })
    }
}

fn workflow_metadata(name: &str, template: &WorkflowTemplate) -> ComponentMetadata {
    let mut builder = ComponentMetadata::builder(name)
        .description(template.description.clone().unwrap_or_else(|| template.name.clone()))
        .display_name(template.name.clone())
        .tag("workflow")
        .tag(template.source.to_string())
        .capability("workflow");
    if let Some(version) = &template.version {
        builder = builder.version(version.clone());
    }
    for agent in template.referenced_agents() {
        builder = builder.dependency(agent);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_names_are_lowercase_identifiers() {
        assert_eq!(derive_agent_name("core.Health-Check"), "core_health_check");
        assert_eq!(derive_agent_name("contrib.triage_v2"), "contrib_triage_v2");
        assert_eq!(derive_agent_name(""), "workflow");
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let mut namer = AgentNamer::default();
        let path = Path::new("flows/x.yaml");
        assert_eq!(namer.assign(Some("core.a-b"), path).unwrap(), "core_a_b");
        assert_eq!(namer.assign(Some("core.a_b"), path).unwrap(), "core_a_b_2");
        assert_eq!(namer.assign(Some("core.A.b"), path).unwrap(), "core_a_b_3");
        assert!(namer.assign(Some("core.a_b"), path).unwrap_err().contains("already loaded"));
        assert_eq!(namer.assign(None, path).unwrap(), "workflow");
    }

    #[test]
    fn scanner_skips_by_extension_and_name() {
        let scanner = TemplateScanner::default();
        assert!(scanner.accepts(Path::new("flows/health.yaml")));
        assert!(scanner.accepts(Path::new("flows/health.JSON")));
        assert!(!scanner.accepts(Path::new("flows/health.toml")));
        assert!(!scanner.accepts(Path::new("flows/workflow_template.json")));
        assert!(!scanner.accepts(Path::new("flows/example_flow.yml")));
    }
}
