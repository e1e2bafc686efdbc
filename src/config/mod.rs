//! Startup configuration: which namespace roots to scan, where workflow
//! documents live, and executor defaults.

mod env;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AgentLoomError, Result};
use crate::flow::{ExecutorSettings, TemplateScanner};

pub use env::{EnvConfig, DEBUG_VAR};

pub const AGENT_ROOTS_VAR: &str = "AGENTLOOM_AGENT_ROOTS";
pub const TOOL_ROOTS_VAR: &str = "AGENTLOOM_TOOL_ROOTS";
pub const TEMPLATE_PATHS_VAR: &str = "AGENTLOOM_TEMPLATE_PATHS";
pub const MAX_PARALLEL_VAR: &str = "AGENTLOOM_MAX_PARALLEL";
pub const TASK_TIMEOUT_VAR: &str = "AGENTLOOM_TASK_TIMEOUT";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    /// Scanned in order; earlier roots win name conflicts.
    pub agent_roots: Vec<String>,
    pub tool_roots: Vec<String>,
    pub template_paths: Vec<PathBuf>,
    pub template_extensions: Vec<String>,
    /// Documents whose file stem contains one of these are ignored.
    pub skip_patterns: Vec<String>,
    pub default_max_parallel: usize,
    pub task_timeout_secs: Option<u64>,
    /// Treat an assembly with no agents and no tools as an error.
    pub fail_on_empty: bool,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            agent_roots: Vec::new(),
            tool_roots: Vec::new(),
            template_paths: Vec::new(),
            template_extensions: vec!["json".into(), "yaml".into(), "yml".into()],
            skip_patterns: vec!["template".into(), "example".into()],
            default_max_parallel: 4,
            task_timeout_secs: Some(300),
            fail_on_empty: true,
        }
    }
}

impl LoomConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads a JSON or YAML file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Err(AgentLoomError::Config(format!(
                "unsupported config file `{}`",
                path.display()
            ))),
        }
    }

    /// Applies `AGENTLOOM_*` overrides. Numeric values that do not parse are
    /// logged and ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(roots) = EnvConfig::get_list(AGENT_ROOTS_VAR) {
            self.agent_roots = roots;
        }
        if let Some(roots) = EnvConfig::get_list(TOOL_ROOTS_VAR) {
            self.tool_roots = roots;
        }
        if let Some(paths) = EnvConfig::get_list(TEMPLATE_PATHS_VAR) {
            self.template_paths = paths.into_iter().map(PathBuf::from).collect();
        }
        if let Some(raw) = EnvConfig::get_env_optional(MAX_PARALLEL_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.default_max_parallel = n,
                _ => warn!(var = MAX_PARALLEL_VAR, value = %raw, "ignoring invalid override"),
            }
        }
        if let Some(raw) = EnvConfig::get_env_optional(TASK_TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.task_timeout_secs = None,
                Ok(secs) => self.task_timeout_secs = Some(secs),
                Err(_) => warn!(var = TASK_TIMEOUT_VAR, value = %raw, "ignoring invalid override"),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_parallel == 0 {
            return Err(AgentLoomError::Config(
                "`default_max_parallel` must be at least 1".into(),
            ));
        }
        if self.template_extensions.is_empty() {
            return Err(AgentLoomError::Config(
                "`template_extensions` must not be empty".into(),
            ));
        }
        let mut roots = self.agent_roots.iter().chain(&self.tool_roots);
        if let Some(root) = roots.find(|r| r.trim().is_empty()) {
            return Err(AgentLoomError::Config(format!("blank namespace root `{root}`")));
        }
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            default_max_parallel: self.default_max_parallel.max(1),
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn scanner(&self) -> TemplateScanner {
        TemplateScanner::new(self.template_extensions.clone(), self.skip_patterns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_defaults_for_missing_fields() {
        let config =
            LoomConfig::from_yaml_str("agent_roots: [core, contrib]\ntask_timeout_secs: 30\n")
                .unwrap();
        assert_eq!(config.agent_roots, vec!["core", "contrib"]);
        assert_eq!(config.task_timeout_secs, Some(30));
        assert_eq!(config.default_max_parallel, 4);
        assert_eq!(config.template_extensions, vec!["json", "yaml", "yml"]);
        assert!(config.fail_on_empty);
    }

    #[test]
    fn validation_rejects_zero_parallelism() {
        let config = LoomConfig {
            default_max_parallel: 0,
            ..LoomConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentLoomError::Config(_))));
        assert!(LoomConfig::default().validate().is_ok());
    }

    #[test]
    fn executor_settings_follow_config() {
        let config = LoomConfig::from_json_str(
            r#"{"default_max_parallel": 2, "task_timeout_secs": null}"#,
        )
        .unwrap();
        let settings = config.executor_settings();
        assert_eq!(settings.default_max_parallel, 2);
        assert_eq!(settings.task_timeout, None);
    }
}
