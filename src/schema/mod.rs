//! Parameter schemas exposed by tools and checked before a tool is invoked.

mod error;
mod schema;
mod validation;

pub use error::SchemaError;
pub use schema::{Schema, SchemaKind};
pub use validation::validate_value;
