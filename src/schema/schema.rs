use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::{ParamSpec, ParamType};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchemaKind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array {
        items: Box<Schema>,
    },
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
        #[serde(default = "Schema::allow_additional")]
        additional: bool,
    },
    Any,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: SchemaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Schema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            name: None,
            kind,
            description: None,
        }
    }

    /// Object schema that accepts anything shaped like a JSON object.
    pub fn any_object() -> Self {
        Self::new(SchemaKind::Object {
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional: true,
        })
    }

    /// Builds the object schema a tool advertises from its metadata
    /// parameter table. Required parameters keep the table's sorted order.
    pub fn from_params(params: &BTreeMap<String, ParamSpec>) -> Self {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        for (name, spec) in params {
            let mut property = Schema::new(param_kind(spec.kind));
            if let Some(description) = &spec.description {
                property = property.with_description(description.clone());
            }
            properties.insert(name.clone(), property);
            if spec.required {
                required.push(name.clone());
            }
        }
        Self::new(SchemaKind::Object {
            properties,
            required,
            additional: true,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Forbids properties that the schema does not list. No-op for
    /// non-object schemas.
    pub fn closed(mut self) -> Self {
        if let SchemaKind::Object { additional, .. } = &mut self.kind {
            *additional = false;
        }
        self
    }

    pub fn required_properties(&self) -> &[String] {
        match &self.kind {
            SchemaKind::Object { required, .. } => required,
            _ => &[],
        }
    }

    fn allow_additional() -> bool {
        true
    }
}

fn param_kind(kind: ParamType) -> SchemaKind {
    match kind {
        ParamType::String => SchemaKind::String,
        ParamType::Integer => SchemaKind::Integer,
        ParamType::Number => SchemaKind::Number,
        ParamType::Boolean => SchemaKind::Boolean,
        ParamType::Array => SchemaKind::Array {
            items: Box::new(Schema::new(SchemaKind::Any)),
        },
        ParamType::Object => Schema::any_object().kind,
        ParamType::Any => SchemaKind::Any,
    }
}
