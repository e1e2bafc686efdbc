//! Name-keyed component stores shared by discovery, synthesis and assembly.
//!
//! Entries are written during the single-threaded startup pass and read
//! concurrently afterwards. Every entry keeps the constructor it was
//! registered with plus an optional cached instance.

mod metadata;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentInit};
use crate::error::{AgentLoomError, ComponentKind, Result};
use crate::tools::{Tool, ToolInit};

pub use metadata::{ComponentMetadata, ComponentMetadataBuilder, ParamSpec, ParamType};

pub type Constructor<C, I> = Arc<dyn Fn(I) -> Result<Arc<C>> + Send + Sync>;
pub type AgentConstructor = Constructor<dyn Agent, AgentInit>;
pub type ToolConstructor = Constructor<dyn Tool, ToolInit>;

pub type AgentRegistry = ComponentRegistry<dyn Agent, AgentInit>;
pub type ToolRegistry = ComponentRegistry<dyn Tool, ToolInit>;
pub type AgentEntry = RegistryEntry<dyn Agent, AgentInit>;
pub type ToolEntry = RegistryEntry<dyn Tool, ToolInit>;

/// Where an entry came from. Two registrations with equal origins describe
/// the same component and are treated as one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum EntryOrigin {
    Discovered {
        root: String,
        module: String,
        symbol: String,
    },
    Manual,
    Synthesized {
        template_id: String,
        source_path: String,
    },
}

impl EntryOrigin {
    pub fn discovered(
        root: impl Into<String>,
        module: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        EntryOrigin::Discovered {
            root: root.into(),
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, EntryOrigin::Synthesized { .. })
    }

    pub fn root(&self) -> Option<&str> {
        match self {
            EntryOrigin::Discovered { root, .. } => Some(root),
            _ => None,
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            EntryOrigin::Discovered { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl fmt::Display for EntryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOrigin::Discovered {
                root,
                module,
                symbol,
            } => write!(f, "root `{root}` module `{module}` symbol `{symbol}`"),
            EntryOrigin::Manual => f.write_str("manual registration"),
            EntryOrigin::Synthesized {
                template_id,
                source_path,
            } => write!(f, "template `{template_id}` ({source_path})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered,
    /// Same name, same origin: a repeated discovery pass.
    Unchanged,
    /// A previous synthesis of the same name was superseded.
    Replaced,
}

struct InstanceSlot<C: ?Sized> {
    instance: Option<Arc<C>>,
    sealed: bool,
}

pub struct RegistryEntry<C: ?Sized, I> {
    name: String,
    metadata: ComponentMetadata,
    origin: EntryOrigin,
    constructor: Constructor<C, I>,
    slot: RwLock<InstanceSlot<C>>,
}

impl<C: ?Sized, I> RegistryEntry<C, I> {
    fn new(
        name: String,
        constructor: Constructor<C, I>,
        metadata: ComponentMetadata,
        origin: EntryOrigin,
    ) -> Self {
        Self {
            name,
            metadata,
            origin,
            constructor,
            slot: RwLock::new(InstanceSlot {
                instance: None,
                sealed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    pub fn origin(&self) -> &EntryOrigin {
        &self.origin
    }

    /// Builds a fresh instance without touching the cache.
    pub fn construct(&self, init: I) -> Result<Arc<C>> {
        (self.constructor)(init)
    }

    pub fn cached(&self) -> Option<Arc<C>> {
        self.slot.read().instance.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.slot.read().sealed
    }
}

impl<C: ?Sized, I> fmt::Debug for RegistryEntry<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("instantiated", &slot.instance.is_some())
            .field("sealed", &slot.sealed)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistrySummary {
    pub kind: ComponentKind,
    pub total: usize,
    pub instantiated: usize,
    pub synthesized: usize,
    pub by_tag: BTreeMap<String, usize>,
}

pub struct ComponentRegistry<C: ?Sized, I> {
    kind: ComponentKind,
    entries: RwLock<BTreeMap<String, Arc<RegistryEntry<C, I>>>>,
}

impl AgentRegistry {
    pub fn agents() -> Self {
        Self::new(ComponentKind::Agent)
    }
}

impl ToolRegistry {
    pub fn tools() -> Self {
        Self::new(ComponentKind::Tool)
    }
}

impl<C: ?Sized, I> ComponentRegistry<C, I> {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Adds a component under `name`.
    ///
    /// An existing entry with an identical origin yields
    /// [`RegisterOutcome::Unchanged`]; any other existing entry keeps its
    /// place and the new registration fails with `DuplicateName`.
    pub fn register(
        &self,
        name: impl Into<String>,
        constructor: Constructor<C, I>,
        metadata: ComponentMetadata,
        origin: EntryOrigin,
    ) -> Result<RegisterOutcome> {
        let name = name.into();
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&name) {
            if existing.origin == origin {
                debug!(
                    kind = %self.kind,
                    name = %name,
                    "registration repeated with identical origin"
                );
                return Ok(RegisterOutcome::Unchanged);
            }
            return Err(AgentLoomError::DuplicateName {
                kind: self.kind,
                name,
                existing: existing.origin.to_string(),
                rejected: origin.to_string(),
            });
        }
        info!(kind = %self.kind, name = %name, origin = %origin, "registered component");
        let entry = RegistryEntry::new(name.clone(), constructor, metadata, origin);
        entries.insert(name, Arc::new(entry));
        Ok(RegisterOutcome::Registered)
    }

    /// Adds or refreshes a synthesized component. Only a previous synthesized
    /// entry may be replaced; a hand-authored entry is left as it is.
    pub fn register_synthesized(
        &self,
        name: impl Into<String>,
        constructor: Constructor<C, I>,
        metadata: ComponentMetadata,
        origin: EntryOrigin,
    ) -> Result<RegisterOutcome> {
        let name = name.into();
        let template_id = match &origin {
            EntryOrigin::Synthesized { template_id, .. } => template_id.clone(),
            other => other.to_string(),
        };
        let mut entries = self.entries.write();
        let outcome = match entries.get(&name) {
            Some(existing) if !existing.origin.is_synthesized() => {
                return Err(AgentLoomError::SynthesisCollision { name, template_id });
            }
            Some(existing) => {
                if existing.origin != origin {
                    warn!(
                        name = %name,
                        previous = %existing.origin,
                        current = %origin,
                        "synthesized agent now backed by a different template",
                    );
                }
                RegisterOutcome::Replaced
            }
            None => RegisterOutcome::Registered,
        };
        info!(
            name = %name,
            template = %template_id,
            outcome = ?outcome,
            "registered synthesized agent"
        );
        let entry = RegistryEntry::new(name.clone(), constructor, metadata, origin);
        entries.insert(name, Arc::new(entry));
        Ok(outcome)
    }

    pub fn get(&self, name: &str) -> Result<Arc<RegistryEntry<C, I>>> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AgentLoomError::not_found(self.kind, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point-in-time copy of the entry table. Later registrations do not
    /// show up in a snapshot already taken.
    pub fn list_all(&self) -> BTreeMap<String, Arc<RegistryEntry<C, I>>> {
        self.entries.read().clone()
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<Arc<RegistryEntry<C, I>>> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.metadata.tags.contains(tag))
            .cloned()
            .collect()
    }

    /// Declared dependencies of `name`, transitively, with every component
    /// listed after the components it depends on. `name` itself comes last.
    pub fn resolve_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let entries = self.entries.read();
        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        let mut chain = Vec::new();
        self.visit(&entries, name, &mut chain, &mut done, &mut ordered)?;
        Ok(ordered)
    }

    fn visit(
        &self,
        entries: &BTreeMap<String, Arc<RegistryEntry<C, I>>>,
        name: &str,
        chain: &mut Vec<String>,
        done: &mut BTreeSet<String>,
        ordered: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if chain.iter().any(|visited| visited == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(AgentLoomError::DependencyCycle {
                kind: self.kind,
                chain: cycle,
            });
        }
        let entry = entries
            .get(name)
            .ok_or_else(|| AgentLoomError::not_found(self.kind, name))?;
        chain.push(name.to_string());
        for dependency in &entry.metadata.dependencies {
            self.visit(entries, dependency, chain, done, ordered)?;
        }
        chain.pop();
        done.insert(name.to_string());
        ordered.push(name.to_string());
        Ok(())
    }

    pub fn summary(&self) -> RegistrySummary {
        let entries = self.entries.read();
        let mut by_tag = BTreeMap::new();
        for entry in entries.values() {
            for tag in &entry.metadata.tags {
                *by_tag.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        RegistrySummary {
            kind: self.kind,
            total: entries.len(),
            instantiated: entries.values().filter(|e| e.cached().is_some()).count(),
            synthesized: entries.values().filter(|e| e.origin.is_synthesized()).count(),
            by_tag,
        }
    }

    /// Returns the cached instance of `name`, constructing and caching it on
    /// first use.
    pub fn get_or_create_instance(&self, name: &str, init: I) -> Result<Arc<C>> {
        let entry = self.get(name)?;
        if let Some(instance) = entry.cached() {
            return Ok(instance);
        }
        let built = entry.construct(init)?;
        let mut slot = entry.slot.write();
        match &slot.instance {
            Some(raced) => Ok(Arc::clone(raced)),
            None => {
                slot.instance = Some(Arc::clone(&built));
                debug!(kind = %self.kind, name = %name, "cached new instance");
                Ok(built)
            }
        }
    }

    pub fn cached_instance(&self, name: &str) -> Option<Arc<C>> {
        self.entries.read().get(name).and_then(|entry| entry.cached())
    }

    /// Replaces the cached instance of `name` and seals the entry. A sealed
    /// entry rejects any further installation.
    pub fn install_instance(&self, name: &str, instance: Arc<C>) -> Result<()> {
        let entry = self.get(name)?;
        let mut slot = entry.slot.write();
        if slot.sealed {
            return Err(AgentLoomError::InstanceSealed {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        slot.instance = Some(instance);
        slot.sealed = true;
        Ok(())
    }
}
