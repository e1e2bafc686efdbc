use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentLoomError, Result};
use crate::registry::{ComponentMetadata, ParamSpec, ParamType};
use crate::schema::Schema;
use crate::tools::tool::{Tool, ToolInit};

/// Returns its parameters unchanged, tagged with the tool name.
pub struct EchoTool {
    name: String,
    schema: Schema,
    prefix: String,
}

impl EchoTool {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            schema: Schema::from_params(&Self::params()).with_name(name.clone()),
            name,
            prefix: "Echo".to_string(),
        }
    }

    pub fn from_init(name: impl Into<String>, init: ToolInit) -> Result<Self> {
        let mut tool = Self::new(name);
        if let Some(config) = init.config {
            let prefix = config
                .get("prefix")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AgentLoomError::Config("echo tool `prefix` must be a string".into())
                })?;
            tool.prefix = prefix.to_string();
        }
        Ok(tool)
    }

    pub fn params() -> BTreeMap<String, ParamSpec> {
        let mut params = BTreeMap::new();
        params.insert(
            "message".to_string(),
            ParamSpec::new(ParamType::String)
                .required()
                .with_description("text to echo back"),
        );
        params
    }

    pub fn metadata(name: &str) -> ComponentMetadata {
        let mut builder = ComponentMetadata::builder(name)
            .description("Echoes the `message` parameter")
            .tag("builtin")
            .tag("debug");
        for (param, spec) in Self::params() {
            builder = builder.param(param, spec);
        }
        builder.build()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({
            "tool": self.name,
            "output": format!("{}: {}", self.prefix, message),
        }))
    }
}

/// Word, line and character counts for a piece of text.
pub struct TextStatsTool {
    schema: Schema,
}

impl TextStatsTool {
    pub const NAME: &'static str = "text_stats";

    pub fn new() -> Self {
        Self {
            schema: Schema::from_params(&Self::metadata().parameter_schema).with_name(Self::NAME),
        }
    }

    pub fn metadata() -> ComponentMetadata {
        ComponentMetadata::builder(Self::NAME)
            .description("Counts words, lines and characters")
            .tag("builtin")
            .tag("text")
            .param(
                "text",
                ParamSpec::new(ParamType::String).required(),
            )
            .build()
    }
}

impl Default for TextStatsTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TextStatsTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({
            "words": text.split_whitespace().count(),
            "lines": text.lines().count(),
            "chars": text.chars().count(),
        }))
    }
}
