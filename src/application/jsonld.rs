//! schema.org JSON-LD objects.

use serde_json::{Map, Value};
use thiserror::Error;

const SCHEMA_CONTEXT: &str = "https://schema.org";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JsonLdError {
    #[error("invalid schema.org type `{0}`")]
    InvalidType(String),
    #[error("property `{0}` is reserved")]
    ReservedProperty(String),
}

/// A single structured-data object of a schema.org type.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonLd {
    schema_type: String,
    properties: Map<String, Value>,
}

impl JsonLd {
    /// Build an object of `schema_type` seeded with `config` properties.
    ///
    /// Type names are alphanumeric (`WebPage`, `BlogPosting`); `@`-prefixed
    /// keys in `config` are rejected since `@context` and `@type` are owned
    /// by the object.
    pub fn create(schema_type: &str, config: Map<String, Value>) -> Result<Self, JsonLdError> {
        let schema_type = schema_type.trim();
        if schema_type.is_empty() || !schema_type.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(JsonLdError::InvalidType(schema_type.to_string()));
        }
        if let Some(reserved) = config.keys().find(|key| key.starts_with('@')) {
            return Err(JsonLdError::ReservedProperty(reserved.clone()));
        }
        Ok(Self {
            schema_type: schema_type.to_string(),
            properties: config,
        })
    }

    pub fn schema_type(&self) -> &str {
        &self.schema_type
    }

    /// Set a property; empty strings are skipped.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if !matches!(&value, Value::String(text) if text.is_empty()) {
            self.properties.insert(key.into(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.properties.len() + 2);
        object.insert("@context".to_string(), Value::from(SCHEMA_CONTEXT));
        object.insert("@type".to_string(), Value::from(self.schema_type.as_str()));
        for (key, value) in &self.properties {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Value nested inside another object: no `@context`.
    pub fn to_nested_value(&self) -> Value {
        let mut object = Map::with_capacity(self.properties.len() + 1);
        object.insert("@type".to_string(), Value::from(self.schema_type.as_str()));
        object.extend(self.properties.clone());
        Value::Object(object)
    }
}
