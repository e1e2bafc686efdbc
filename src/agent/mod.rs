mod agent;
pub mod builtin;

pub use agent::{Agent, AgentContext, AgentInit, AgentLookup};
