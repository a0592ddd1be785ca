//! Argument validation against a capability's declared JSON Schema.
//!
//! Supports the subset of JSON Schema that capability descriptors use:
//! `type`, `properties`, `required`, `enum`, `items`, `minimum`, `maximum`,
//! `minLength` and `additionalProperties: false`. Unknown keywords are
//! ignored.

use serde_json::Value;

/// A single schema violation, with the JSON path where it occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `value` against `schema`.
///
/// Returns the first violation found. A `null` value is treated as an empty
/// object when the schema expects an object, since models often omit the
/// argument payload for capabilities that take no required fields.
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    let empty = Value::Object(serde_json::Map::new());
    let value = if value.is_null() && expects_type(schema, "object") {
        &empty
    } else {
        value
    };
    validate_at(schema, value, "$")
}

fn expects_type(schema: &Value, ty: &str) -> bool {
    schema.get("type").and_then(Value::as_str) == Some(ty)
}

fn violation(path: &str, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        // 3.0 is an acceptable integer in JSON Schema.
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(ty) = schema.get("type") {
        let ok = match ty {
            Value::String(t) => matches_type(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| matches_type(t, value)),
            _ => true,
        };
        if !ok {
            return Err(violation(
                path,
                format!("expected {ty}, got {}", type_name(value)),
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(violation(path, format!("{value} is not one of {}", Value::Array(allowed.clone()))));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(violation(path, format!("{n} is below minimum {min}")));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(violation(path, format!("{n} is above maximum {max}")));
            }
        }
    }

    if let (Some(s), Some(min_len)) = (value.as_str(), schema.get("minLength").and_then(Value::as_u64)) {
        if (s.chars().count() as u64) < min_len {
            return Err(violation(path, format!("must be at least {min_len} characters")));
        }
    }

    if let Value::Object(map) = value {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) || map[name].is_null() {
                    return Err(violation(path, format!("missing required property '{name}'")));
                }
            }
        }

        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (key, child) in map {
            match properties.and_then(|p| p.get(key)) {
                Some(child_schema) => {
                    // Optional properties may be sent as explicit nulls.
                    if child.is_null() {
                        continue;
                    }
                    validate_at(child_schema, child, &format!("{path}.{key}"))?;
                }
                None if closed => {
                    return Err(violation(path, format!("unexpected property '{key}'")));
                }
                None => {}
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}
