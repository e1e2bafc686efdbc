use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Descriptor attached to every agent and tool candidate.
///
/// Built once where the component is defined and never mutated after it is
/// handed to a registry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "ComponentMetadata::default_version")]
    pub version: String,
    #[serde(default = "ComponentMetadata::default_author")]
    pub author: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameter_schema: BTreeMap<String, ParamSpec>,
    /// Owning agent of a tool. `None` leaves the tool root-eligible unless
    /// the module layout assigns it to an agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl ComponentMetadata {
    pub fn builder(name: impl Into<String>) -> ComponentMetadataBuilder {
        ComponentMetadataBuilder::new(name)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    fn default_version() -> String {
        "1.0.0".into()
    }

    fn default_author() -> String {
        "unknown".into()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(kind: ParamType) -> Self {
        Self {
            kind,
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub struct ComponentMetadataBuilder {
    metadata: ComponentMetadata,
}

impl ComponentMetadataBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ComponentMetadata {
                name: name.into(),
                description: String::new(),
                version: ComponentMetadata::default_version(),
                author: ComponentMetadata::default_author(),
                tags: BTreeSet::new(),
                dependencies: Vec::new(),
                parameter_schema: BTreeMap::new(),
                owner: None,
                capabilities: Vec::new(),
                display_name: None,
                disabled: false,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = author.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.insert(tag.into());
        self
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.metadata.dependencies.push(dependency.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.metadata.parameter_schema.insert(name.into(), spec);
        self
    }

    pub fn owner(mut self, agent: impl Into<String>) -> Self {
        self.metadata.owner = Some(agent.into());
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.metadata.capabilities.push(capability.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.metadata.display_name = Some(display_name.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.metadata.disabled = disabled;
        self
    }

    pub fn build(self) -> ComponentMetadata {
        self.metadata
    }
}
