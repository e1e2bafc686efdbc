use thiserror::Error;

use crate::error::AgentLoomError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{message} at `{}`", display_path(.path))]
    Validation { message: String, path: Vec<String> },
}

impl SchemaError {
    pub(crate) fn at(message: impl Into<String>, path: &[String]) -> Self {
        SchemaError::Validation {
            message: message.into(),
            path: path.to_vec(),
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            SchemaError::Validation { path, .. } => path,
        }
    }

    /// Attributes a validation failure to the tool whose schema rejected it.
    pub fn for_tool(self, tool: impl Into<String>) -> AgentLoomError {
        AgentLoomError::InvalidParameters {
            tool: tool.into(),
            message: self.to_string(),
        }
    }
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        format!("$.{}", path.join("."))
    }
}
