use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::registry::{AgentConstructor, ComponentMetadata, ToolConstructor};
use crate::schema::Schema;

/// A unit of component source. `load` is its import step: it may fail, and
/// on success lists every symbol the module exports.
pub trait ComponentModule: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> Result<Vec<Export>>;
}

/// An exported agent candidate. Missing parts make it fail the agent
/// contract during discovery.
#[derive(Clone)]
pub struct AgentExport {
    pub symbol: String,
    pub metadata: Option<ComponentMetadata>,
    pub constructor: Option<AgentConstructor>,
}

#[derive(Clone)]
pub struct ToolExport {
    pub symbol: String,
    pub metadata: Option<ComponentMetadata>,
    pub schema: Option<Schema>,
    pub constructor: Option<ToolConstructor>,
}

#[derive(Clone)]
pub enum Export {
    Agent(AgentExport),
    Tool(ToolExport),
    /// Anything else a module exposes: helpers, constants.
    Opaque { symbol: String },
}

impl Export {
    pub fn agent(
        symbol: impl Into<String>,
        metadata: ComponentMetadata,
        constructor: AgentConstructor,
    ) -> Self {
        Export::Agent(AgentExport {
            symbol: symbol.into(),
            metadata: Some(metadata),
            constructor: Some(constructor),
        })
    }

    pub fn tool(
        symbol: impl Into<String>,
        metadata: ComponentMetadata,
        schema: Schema,
        constructor: ToolConstructor,
    ) -> Self {
        Export::Tool(ToolExport {
            symbol: symbol.into(),
            metadata: Some(metadata),
            schema: Some(schema),
            constructor: Some(constructor),
        })
    }

    pub fn opaque(symbol: impl Into<String>) -> Self {
        Export::Opaque {
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Export::Agent(export) => &export.symbol,
            Export::Tool(export) => &export.symbol,
            Export::Opaque { symbol } => symbol,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Export::Agent(_) => "agent",
            Export::Tool(_) => "tool",
            Export::Opaque { .. } => "opaque",
        };
        f.debug_struct("Export")
            .field("kind", &kind)
            .field("symbol", &self.symbol())
            .finish()
    }
}

type Loader = Arc<dyn Fn() -> Result<Vec<Export>> + Send + Sync>;

/// A module whose exports come from a closure registered at init time.
pub struct StaticModule {
    name: String,
    loader: Loader,
}

impl StaticModule {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Vec<Export>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Arc::new(loader),
        }
    }
}

impl ComponentModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Vec<Export>> {
        (self.loader)()
    }
}

/// A root and its direct modules, scanned in insertion order.
#[derive(Clone)]
pub struct ComponentNamespace {
    root: String,
    modules: Vec<Arc<dyn ComponentModule>>,
}

impl ComponentNamespace {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            modules: Vec::new(),
        }
    }

    pub fn module(mut self, module: Arc<dyn ComponentModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn static_module<F>(self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Vec<Export>> + Send + Sync + 'static,
    {
        self.module(Arc::new(StaticModule::new(name, loader)))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn modules(&self) -> &[Arc<dyn ComponentModule>] {
        &self.modules
    }
}

/// Every namespace the process knows about, keyed by root name.
#[derive(Clone, Default)]
pub struct NamespaceCatalog {
    namespaces: BTreeMap<String, ComponentNamespace>,
}

impl NamespaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `namespace`, returning the one it replaced under the same root.
    pub fn insert(&mut self, namespace: ComponentNamespace) -> Option<ComponentNamespace> {
        self.namespaces.insert(namespace.root.clone(), namespace)
    }

    pub fn with(mut self, namespace: ComponentNamespace) -> Self {
        self.insert(namespace);
        self
    }

    pub fn get(&self, root: &str) -> Option<&ComponentNamespace> {
        self.namespaces.get(root)
    }

    pub fn roots(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }
}
