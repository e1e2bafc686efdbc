use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::schema::{validate_value, Schema};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Parameters accepted by [`Tool::execute`].
    fn schema(&self) -> &Schema;

    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Construction arguments for a tool.
#[derive(Clone, Debug, Default)]
pub struct ToolInit {
    pub config: Option<Value>,
}

impl ToolInit {
    pub fn with_config(config: Value) -> Self {
        Self {
            config: Some(config),
        }
    }
}

/// Validates `params` against the tool's schema before running it.
pub async fn invoke_checked(tool: &dyn Tool, params: Value) -> Result<Value> {
    validate_value(tool.schema(), &params).map_err(|err| err.for_tool(tool.name()))?;
    tool.execute(params).await
}
