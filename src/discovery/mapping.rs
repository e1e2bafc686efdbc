use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::registry::{AgentRegistry, EntryOrigin, ToolRegistry};

/// Which agent, if any, owns each registered tool.
///
/// An explicit `owner` in tool metadata always wins. Without one, a tool
/// from module `<pkg>.tools` (or `<pkg>.tools.<x>`) belongs to the single
/// agent discovered from `<pkg>` or `<pkg>.agent` in the same root. Anything
/// else is root-eligible.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AgentToolMapping {
    tool_owner: BTreeMap<String, Option<String>>,
    agent_tools: BTreeMap<String, BTreeSet<String>>,
}

impl AgentToolMapping {
    pub fn compute(agents: &AgentRegistry, tools: &ToolRegistry) -> Self {
        let mut by_module: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for (name, entry) in agents.list_all() {
            if let EntryOrigin::Discovered { root, module, .. } = entry.origin() {
                by_module
                    .entry((root.clone(), module.clone()))
                    .or_default()
                    .push(name);
            }
        }

        let mut mapping = Self::default();
        for (name, entry) in tools.list_all() {
            let owner = match &entry.metadata().owner {
                Some(owner) => Some(owner.clone()),
                None => conventional_owner(entry.origin(), &by_module),
            };
            if let Some(owner) = &owner {
                debug!(tool = %name, agent = %owner, "tool attached to agent");
                mapping
                    .agent_tools
                    .entry(owner.clone())
                    .or_default()
                    .insert(name.clone());
            }
            mapping.tool_owner.insert(name, owner);
        }
        mapping
    }

    pub fn get_tool_agent(&self, tool: &str) -> Option<&str> {
        self.tool_owner.get(tool).and_then(|owner| owner.as_deref())
    }

    pub fn get_agent_tools(&self, agent: &str) -> BTreeSet<String> {
        self.agent_tools.get(agent).cloned().unwrap_or_default()
    }

    pub fn is_root_eligible(&self, tool: &str) -> bool {
        self.get_tool_agent(tool).is_none()
    }

    /// Registered tools without an owner, sorted by name.
    pub fn root_eligible(&self, tools: &ToolRegistry) -> Vec<String> {
        tools
            .names()
            .into_iter()
            .filter(|name| self.is_root_eligible(name))
            .collect()
    }

    pub fn owned_tools(&self) -> BTreeMap<String, String> {
        self.tool_owner
            .iter()
            .filter_map(|(tool, owner)| owner.as_ref().map(|o| (tool.clone(), o.clone())))
            .collect()
    }

    /// Declared owners that are not registered agents, with their tools.
    pub fn orphans(&self, agents: &AgentRegistry) -> BTreeMap<String, BTreeSet<String>> {
        self.agent_tools
            .iter()
            .filter(|(agent, _)| !agents.contains(agent))
            .map(|(agent, tools)| (agent.clone(), tools.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tool_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tool_owner.is_empty()
    }
}

fn conventional_owner(
    origin: &EntryOrigin,
    agents_by_module: &BTreeMap<(String, String), Vec<String>>,
) -> Option<String> {
    let EntryOrigin::Discovered { root, module, .. } = origin else {
        return None;
    };
    let package = owning_package(module)?;
    let mut candidates = [package.to_string(), format!("{package}.agent")]
        .into_iter()
        .filter_map(|candidate| agents_by_module.get(&(root.clone(), candidate)))
        .flatten();
    let owner = candidates.next()?;
    if candidates.next().is_some() {
        debug!(module = %module, "several agents match tool package; leaving tool at root");
        return None;
    }
    Some(owner.clone())
}

/// `a.b.tools` and `a.b.tools.x` yield `a.b`; other module names yield nothing.
fn owning_package(module: &str) -> Option<&str> {
    let mut offset = 0;
    for segment in module.split('.') {
        if segment == "tools" && offset > 0 {
            return Some(&module[..offset - 1]);
        }
        offset += segment.len() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::owning_package;

    #[test]
    fn package_is_the_prefix_before_tools() {
        assert_eq!(owning_package("agents.search.tools"), Some("agents.search"));
        assert_eq!(owning_package("agents.search.tools.web"), Some("agents.search"));
        assert_eq!(owning_package("tools.web"), None);
        assert_eq!(owning_package("agents.search.toolshed"), None);
        assert_eq!(owning_package("agents.search"), None);
    }
}
