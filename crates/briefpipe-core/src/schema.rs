//! Declared output shapes, walked by both the validator and the prompt-hint
//! renderer so the two can never drift apart.

use crate::{Error, Result};
use serde_json::Value;

/// Tagged description of a structured result shape.
#[derive(Debug, Clone)]
pub enum Shape {
    String,
    Number,
    Object(Vec<(&'static str, Shape)>),
    Array {
        item: Box<Shape>,
        min: Option<usize>,
        max: Option<usize>,
    },
    Optional(Box<Shape>),
}

impl Shape {
    pub fn array(item: Shape) -> Shape {
        Shape::Array {
            item: Box::new(item),
            min: None,
            max: None,
        }
    }

    pub fn array_min(item: Shape, min: usize) -> Shape {
        Shape::Array {
            item: Box::new(item),
            min: Some(min),
            max: None,
        }
    }

    pub fn array_bounded(item: Shape, min: usize, max: usize) -> Shape {
        Shape::Array {
            item: Box::new(item),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn optional(inner: Shape) -> Shape {
        Shape::Optional(Box::new(inner))
    }
}

/// Validate `value` against `shape`, returning the cleaned value.
///
/// Object validation requires every declared non-optional key; missing
/// optional keys become absent, not defaulted. Array validation coerces
/// object values (in insertion order) and bare scalars into sequences,
/// because model output does not reliably emit arrays. Undeclared object
/// keys are dropped; invalid declared keys fail with the offending path.
pub fn validate(shape: &Shape, value: &Value) -> Result<Value> {
    walk(shape, value, "$")
}

fn walk(shape: &Shape, value: &Value, path: &str) -> Result<Value> {
    match shape {
        Shape::String => match value.as_str() {
            Some(s) => Ok(Value::String(s.to_string())),
            None => Err(mismatch(path, "expected string")),
        },
        Shape::Number => {
            if value.is_number() {
                Ok(value.clone())
            } else {
                Err(mismatch(path, "expected number"))
            }
        }
        Shape::Optional(inner) => {
            if value.is_null() {
                Ok(Value::Null)
            } else {
                walk(inner, value, path)
            }
        }
        Shape::Object(fields) => {
            let obj = value
                .as_object()
                .ok_or_else(|| mismatch(path, "expected object"))?;
            let mut out = serde_json::Map::new();
            for (key, field_shape) in fields {
                let child = format!("{path}.{key}");
                let present = obj.get(*key).filter(|v| !v.is_null());
                match (present, field_shape) {
                    (None, Shape::Optional(_)) => {}
                    (None, _) => return Err(mismatch(&child, "missing required key")),
                    (Some(v), Shape::Optional(inner)) => {
                        out.insert((*key).to_string(), walk(inner, v, &child)?);
                    }
                    (Some(v), s) => {
                        out.insert((*key).to_string(), walk(s, v, &child)?);
                    }
                }
            }
            Ok(Value::Object(out))
        }
        Shape::Array { item, min, max } => {
            let items: Vec<Value> = match value {
                Value::Array(a) => a.clone(),
                Value::Object(m) => m.values().cloned().collect(),
                Value::Null => return Err(mismatch(path, "expected array")),
                other => vec![other.clone()],
            };
            if let Some(min) = min {
                if items.len() < *min {
                    return Err(mismatch(path, &format!("expected at least {min} items")));
                }
            }
            if let Some(max) = max {
                if items.len() > *max {
                    return Err(mismatch(path, &format!("expected at most {max} items")));
                }
            }
            let mut out = Vec::with_capacity(items.len());
            for (i, v) in items.iter().enumerate() {
                out.push(walk(item, v, &format!("{path}[{i}]"))?);
            }
            Ok(Value::Array(out))
        }
    }
}

fn mismatch(path: &str, message: &str) -> Error {
    Error::Schema(format!("{path}: {message}"))
}

/// Render `shape` as a compact JSON-schema-style hint for model prompts.
/// Optional fields render as their inner type; optionality is enforced only
/// on the validation side.
pub fn describe(shape: &Shape) -> String {
    match shape {
        Shape::String => r#"{"type":"string"}"#.to_string(),
        Shape::Number => r#"{"type":"number"}"#.to_string(),
        Shape::Optional(inner) => describe(inner),
        Shape::Array { item, .. } => {
            format!(r#"{{"type":"array","items":{}}}"#, describe(item))
        }
        Shape::Object(fields) => {
            let props: Vec<String> = fields
                .iter()
                .map(|(key, field)| format!(r#""{key}":{}"#, describe(field)))
                .collect();
            format!(r#"{{"type":"object","properties":{{{}}}}}"#, props.join(","))
        }
    }
}
