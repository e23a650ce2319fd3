use std::marker::PhantomData;

use jsonschema::JSONSchema;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::GenerateError;

/// Why a model answer was not accepted.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("response is empty")]
    Empty,
    #[error("response is not valid JSON: {0}")]
    Json(String),
    #[error("response violates the output schema: {0}")]
    Schema(String),
    #[error("response does not match the output type: {0}")]
    Shape(String),
}

/// The output schema of `T`, generated once and used both to constrain the
/// request and to check the answer.
pub struct SchemaContract<T> {
    schema: Value,
    compiled: JSONSchema,
    _output: PhantomData<fn() -> T>,
}

impl<T: JsonSchema + DeserializeOwned> SchemaContract<T> {
    pub fn new() -> Result<Self, GenerateError> {
        let schema = json_schema_for::<T>()?;
        let compiled =
            JSONSchema::compile(&schema).map_err(|e| GenerateError::Schema(e.to_string()))?;
        Ok(Self {
            schema,
            compiled,
            _output: PhantomData,
        })
    }

    /// The schema in the OpenAPI subset accepted as a Gemini `responseSchema`.
    pub fn response_schema(&self) -> Value {
        to_response_schema(&self.schema)
    }

    /// Repair, then validate. Repairs are limited to dropping a Markdown code
    /// fence around the JSON and trimming every string, so a whitespace-only
    /// field fails the length rules like an empty one.
    pub fn parse(&self, raw: &str) -> Result<T, Rejection> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(Rejection::Empty);
        }
        let mut value: Value =
            serde_json::from_str(body).map_err(|e| Rejection::Json(e.to_string()))?;
        trim_strings(&mut value);

        if let Err(errors) = self.compiled.validate(&value) {
            let reasons: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(Rejection::Schema(reasons.join("; ")));
        }

        serde_json::from_value(value).map_err(|e| Rejection::Shape(e.to_string()))
    }
}

fn json_schema_for<T: JsonSchema>() -> Result<Value, GenerateError> {
    let generator = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(schema).map_err(|e| GenerateError::Schema(e.to_string()))
}

const PASSTHROUGH_KEYS: &[&str] = &["description", "required", "minItems", "minLength"];

/// Gemini wants upper-case type names and rejects keywords outside its subset
/// (`$schema`, `title`, `format`, ...). Property order is pinned to the
/// declaration order of the Rust type.
pub fn to_response_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();
    if let Some(kind) = map.get("type").and_then(Value::as_str) {
        out.insert("type".into(), Value::String(kind.to_uppercase()));
    }
    if let Some(properties) = map.get("properties").and_then(Value::as_object) {
        let converted: Map<String, Value> = properties
            .iter()
            .map(|(name, sub)| (name.clone(), to_response_schema(sub)))
            .collect();
        let order: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
        out.insert("properties".into(), Value::Object(converted));
        out.insert("propertyOrdering".into(), Value::Array(order));
    }
    if let Some(items) = map.get("items") {
        out.insert("items".into(), to_response_schema(items));
    }
    for key in PASSTHROUGH_KEYS {
        if let Some(v) = map.get(*key) {
            out.insert((*key).to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Info string (```json), with or without a line break after it.
    let body = rest
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn trim_strings(value: &mut Value) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(trim_strings),
        Value::Object(map) => map.values_mut().for_each(trim_strings),
        _ => {}
    }
}
