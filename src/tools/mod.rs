pub mod builtin;
mod tool;

pub use tool::{invoke_checked, Tool, ToolInit};
