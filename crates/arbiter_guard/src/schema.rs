//! Schema strictness guard: JSON-schema-like argument validation.
//!
//! Schemas may be registered directly or fetched once from an async
//! provider and cached per tool name. With coercion enabled, safe type
//! mismatches repair the arguments instead of blocking.

use arbiter_core::{Arguments, CoreResult, GuardResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::chain::Guard;

/// Primitive types a property may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    /// UTF-8 string
    String,
    /// Whole number
    Integer,
    /// Any number
    Number,
    /// Boolean
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
}

impl SchemaType {
    /// Whether a JSON value satisfies this type without coercion.
    ///
    /// Integers satisfy `Number` (integer-to-number widening is implicit).
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{s}")
    }
}

/// Declared schema for one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Expected type
    pub schema_type: SchemaType,
    /// Allowed values, if the property is an enum
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    /// Create a property of the given type
    #[must_use]
    pub const fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            enum_values: None,
        }
    }

    /// Restrict the property to an enum of allowed values
    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Object-shaped argument schema for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArgumentSchema {
    /// Property schemas by field name
    pub properties: IndexMap<String, PropertySchema>,
    /// Required field names
    pub required: Vec<String>,
    /// Whether fields outside `properties` are accepted
    pub allow_extra_fields: bool,
}

impl ArgumentSchema {
    /// Create an empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Mark a field as required
    #[must_use]
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Accept fields not declared in `properties`
    #[must_use]
    pub const fn with_extra_fields(mut self, allow: bool) -> Self {
        self.allow_extra_fields = allow;
        self
    }
}

/// Source of tool schemas resolved on first use
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Fetch the schema for a tool, if one is declared
    async fn fetch(&self, tool_name: &str) -> CoreResult<Option<ArgumentSchema>>;
}

/// Violation handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Violations warn but do not stop execution
    Warn,
    /// Violations block execution
    #[default]
    Block,
}

/// Guard validating arguments against per-tool schemas
pub struct SchemaStrictnessGuard {
    mode: SchemaMode,
    coerce_types: bool,
    provider: Option<Arc<dyn SchemaProvider>>,
    // Caches provider lookups, including negative results.
    cache: RwLock<HashMap<String, Option<Arc<ArgumentSchema>>>>,
}

impl SchemaStrictnessGuard {
    /// Create a guard in `Block` mode with coercion disabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: SchemaMode::Block,
            coerce_types: false,
            provider: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Set the violation mode
    #[must_use]
    pub fn with_mode(mut self, mode: SchemaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable safe type coercion (repairs instead of blocking)
    #[must_use]
    pub fn with_coercion(mut self, coerce: bool) -> Self {
        self.coerce_types = coerce;
        self
    }

    /// Set the async schema provider
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register a schema at construction time, bypassing the provider
    #[must_use]
    pub fn with_schema(mut self, tool_name: impl Into<String>, schema: ArgumentSchema) -> Self {
        self.register_schema(tool_name, schema);
        self
    }

    /// Register a schema directly, bypassing the provider.
    ///
    /// Accesses the cache through `&mut self`, so it never locks and is safe
    /// to call from both sync and async contexts. Use
    /// [`register_schema_async`](Self::register_schema_async) once the guard
    /// is shared.
    pub fn register_schema(&mut self, tool_name: impl Into<String>, schema: ArgumentSchema) {
        self.cache
            .get_mut()
            .insert(tool_name.into(), Some(Arc::new(schema)));
    }

    /// Register a schema on a shared guard
    pub async fn register_schema_async(&self, tool_name: impl Into<String>, schema: ArgumentSchema) {
        self.cache
            .write()
            .await
            .insert(tool_name.into(), Some(Arc::new(schema)));
    }

    async fn resolve(&self, tool_name: &str) -> Option<Arc<ArgumentSchema>> {
        if let Some(cached) = self.cache.read().await.get(tool_name) {
            return cached.clone();
        }

        let fetched = match &self.provider {
            Some(provider) => match provider.fetch(tool_name).await {
                Ok(schema) => schema.map(Arc::new),
                Err(err) => {
                    debug!(tool = tool_name, error = %err, "schema fetch failed; treating as undeclared");
                    None
                }
            },
            None => None,
        };

        self.cache
            .write()
            .await
            .insert(tool_name.to_string(), fetched.clone());
        fetched
    }

    fn violation(&self, failures: Vec<String>) -> GuardResult {
        let summary = failures.join("; ");
        match self.mode {
            SchemaMode::Block => GuardResult::block(summary),
            SchemaMode::Warn => GuardResult::warn(summary),
        }
    }

    fn validate(&self, schema: &ArgumentSchema, args: &Arguments) -> GuardResult {
        let mut failures: Vec<String> = Vec::new();
        let mut repaired: Arguments = args.clone();
        let mut repairs: Vec<String> = Vec::new();

        for field in &schema.required {
            match args.get(field) {
                None => failures.push(format!("missing required field '{field}'")),
                Some(Value::String(s)) if s.is_empty() => {
                    failures.push(format!("required field '{field}' is an empty string"));
                }
                Some(_) => {}
            }
        }

        for (name, value) in args {
            let Some(property) = schema.properties.get(name) else {
                if !schema.allow_extra_fields {
                    failures.push(format!("unknown field '{name}'"));
                }
                continue;
            };

            let effective = if property.schema_type.matches(value) {
                value.clone()
            } else if self.coerce_types {
                match coerce(value, property.schema_type) {
                    Some(coerced) => {
                        repairs.push(format!(
                            "coerced '{name}' from {} to {}",
                            type_of(value),
                            property.schema_type
                        ));
                        repaired.insert(name.clone(), coerced.clone());
                        coerced
                    }
                    None => {
                        failures.push(format!(
                            "field '{name}' expected {} but got {}",
                            property.schema_type,
                            type_of(value)
                        ));
                        continue;
                    }
                }
            } else {
                failures.push(format!(
                    "field '{name}' expected {} but got {}",
                    property.schema_type,
                    type_of(value)
                ));
                continue;
            };

            if let Some(allowed) = &property.enum_values {
                if !allowed.contains(&effective) {
                    failures.push(format!(
                        "field '{name}' value {effective} is not one of the allowed values"
                    ));
                }
            }
        }

        if !failures.is_empty() {
            return self.violation(failures);
        }
        if !repairs.is_empty() {
            return GuardResult::repair(repairs.join("; "), repaired);
        }
        GuardResult::allow()
    }
}

impl Default for SchemaStrictnessGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for SchemaStrictnessGuard {
    fn name(&self) -> &str {
        "schema"
    }

    async fn check(&self, tool_name: &str, args: &Arguments) -> GuardResult {
        match self.resolve(tool_name).await {
            Some(schema) => self.validate(&schema, args),
            None => GuardResult::allow(),
        }
    }
}

fn type_of(value: &Value) -> &'static str {
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

/// Safe coercions only: string<->number, string->boolean, integer->number.
fn coerce(value: &Value, target: SchemaType) -> Option<Value> {
    match (value, target) {
        (Value::String(s), SchemaType::Integer) => s.trim().parse::<i64>().ok().map(Value::from),
        (Value::String(s), SchemaType::Number) => s.trim().parse::<f64>().ok().and_then(|f| {
            serde_json::Number::from_f64(f).map(Value::Number)
        }),
        (Value::String(s), SchemaType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (Value::Number(n), SchemaType::String) => Some(Value::String(n.to_string())),
        _ => None,
    }
}
