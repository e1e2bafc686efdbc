use std::env;

use crate::error::{AgentLoomError, Result};

pub const DEBUG_VAR: &str = "AGENTLOOM_DEBUG";

/// Environment variable access.
pub struct EnvConfig;

impl EnvConfig {
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key)
            .map_err(|_| AgentLoomError::Config(format!("environment variable `{key}` is not set")))
    }

    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// Comma-separated list; blank items are dropped. `None` when unset.
    pub fn get_list(key: &str) -> Option<Vec<String>> {
        Self::get_env_optional(key).map(|raw| split_list(&raw))
    }

    pub fn is_debug_mode() -> bool {
        env::var(DEBUG_VAR).is_ok()
    }
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_trimmed_and_blank_items_dropped() {
        assert_eq!(split_list(" core, contrib ,,tools "), vec!["core", "contrib", "tools"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn missing_variable_is_a_config_error() {
        let err = EnvConfig::get_env("AGENTLOOM_TEST_SURELY_UNSET").unwrap_err();
        assert!(matches!(err, AgentLoomError::Config(_)));
        assert!(EnvConfig::get_env_optional("AGENTLOOM_TEST_SURELY_UNSET").is_none());
    }
}
