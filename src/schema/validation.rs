use serde_json::Value;

use super::error::SchemaError;
use super::schema::{Schema, SchemaKind};

/// Checks `value` against `schema`, reporting the first mismatch together
/// with the property path that produced it.
pub fn validate_value(schema: &Schema, value: &Value) -> Result<(), SchemaError> {
    let mut path = Vec::new();
    validate_at(schema, value, &mut path)
}

fn validate_at(schema: &Schema, value: &Value, path: &mut Vec<String>) -> Result<(), SchemaError> {
    let matches = match &schema.kind {
        SchemaKind::Null => value.is_null(),
        SchemaKind::Boolean => value.is_boolean(),
        SchemaKind::Integer => value.is_i64() || value.is_u64(),
        SchemaKind::Number => value.is_number(),
        SchemaKind::String => value.is_string(),
        SchemaKind::Any => true,
        SchemaKind::Array { items } => {
            let Some(array) = value.as_array() else {
                return Err(SchemaError::at("expected array", path));
            };
            for (idx, element) in array.iter().enumerate() {
                path.push(idx.to_string());
                validate_at(items, element, path)?;
                path.pop();
            }
            true
        }
        SchemaKind::Object {
            properties,
            required,
            additional,
        } => {
            let Some(object) = value.as_object() else {
                return Err(SchemaError::at("expected object", path));
            };
            if let Some(missing) = required.iter().find(|key| !object.contains_key(*key)) {
                path.push(missing.clone());
                return Err(SchemaError::at(
                    format!("missing required property `{missing}`"),
                    path,
                ));
            }
            for (key, field) in object {
                path.push(key.clone());
                match properties.get(key) {
                    Some(sub_schema) => validate_at(sub_schema, field, path)?,
                    None if !additional => {
                        return Err(SchemaError::at(format!("unexpected property `{key}`"), path));
                    }
                    None => {}
                }
                path.pop();
            }
            true
        }
    };

    if matches {
        Ok(())
    } else {
        Err(SchemaError::at(
            format!("expected {}", kind_label(&schema.kind)),
            path,
        ))
    }
}

fn kind_label(kind: &SchemaKind) -> &'static str {
    match kind {
        SchemaKind::Null => "null",
        SchemaKind::Boolean => "boolean",
        SchemaKind::Integer => "integer",
        SchemaKind::Number => "number",
        SchemaKind::String => "string",
        SchemaKind::Array { .. } => "array",
        SchemaKind::Object { .. } => "object",
        SchemaKind::Any => "any",
    }
}
