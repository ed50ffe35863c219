//! Tool input schemas.
//!
//! A schema is a flat map from field name to [`FieldSpec`]. It renders to a
//! JSON Schema object for `tools/list` and validates incoming arguments,
//! filling in declared defaults.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' must be of type {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("field '{field}' must be one of: {allowed}")]
    NotAllowed { field: String, allowed: String },
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Vec<Value>,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            allowed: Vec::new(),
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut property = Map::new();
        property.insert("type".into(), Value::from(self.field_type.as_str()));
        if let Some(description) = &self.description {
            property.insert("description".into(), Value::from(description.as_str()));
        }
        if !self.allowed.is_empty() {
            property.insert("enum".into(), Value::Array(self.allowed.clone()));
        }
        if let Some(default) = &self.default {
            property.insert("default".into(), default.clone());
        }
        Value::Object(property)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter()
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();
        let required: Vec<Value> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| Value::from(name.as_str()))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Checks `args` against the schema and returns them with defaults filled
    /// in. `null` is treated as an empty argument object.
    pub fn validate(&self, args: Value) -> Result<Value, SchemaError> {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(SchemaError::NotAnObject),
        };

        if let Some(unknown) = args.keys().find(|key| !self.fields.contains_key(*key)) {
            return Err(SchemaError::UnknownField(unknown.clone()));
        }

        for (name, spec) in &self.fields {
            match args.get(name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        args.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(SchemaError::MissingField(name.clone()));
                    } else {
                        args.remove(name);
                    }
                }
                Some(value) => {
                    if !spec.field_type.accepts(value) {
                        return Err(SchemaError::WrongType {
                            field: name.clone(),
                            expected: spec.field_type.as_str(),
                        });
                    }
                    if !spec.allowed.is_empty() && !spec.allowed.contains(value) {
                        let allowed = spec
                            .allowed
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        return Err(SchemaError::NotAllowed {
                            field: name.clone(),
                            allowed,
                        });
                    }
                }
            }
        }

        Ok(Value::Object(args))
    }
}
