//! Schema model: language-independent descriptions of record types.
//!
//! A [`Schema`] describes one record type as an ordered list of [`Property`]s
//! (name, stable name id, type, requiredness, enum symbols, nesting). Schemas
//! drive three things: binding string property bags into typed records
//! ([`crate::schema::bind`]), describing the next expected input of a
//! suspended workflow step, and rendering JSON-schema response formats for
//! structured model calls.
//!
//! Record types declare their schema explicitly via [`SchemaType`]; there is
//! no reflection. The [`SchemaRegistry`] caches schemas by id.

mod bind;
mod registry;

pub use bind::{bind_value, extract_value, PropertyBag};
pub use registry::{SchemaRegistry, SchemaType};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error from schema lookup or property binding.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// No schema registered under this id.
    #[error("unknown schema: {0}")]
    Unknown(String),
    /// Binding failed for a specific field: missing required value or
    /// unparseable text. Always names the offending field.
    #[error("bind failed for field `{field}`: {message}")]
    Bind { field: String, message: String },
}

impl SchemaError {
    pub(crate) fn bind(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<SchemaError> for crate::error::WorkflowError {
    fn from(err: SchemaError) -> Self {
        crate::error::WorkflowError::new(crate::error::ErrorKind::Validation, err.to_string())
    }
}

/// Value type of a [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Enum,
    Array,
    Object,
}

/// One field of a schema.
///
/// `name` is the user-facing field name; `name_id` is the stable,
/// language-independent identifier used for history inheritance
/// (`data_name_id` on chat properties). Enum symbols live in `enum_values`;
/// object nesting in `properties`; the array item shape in `items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub name_id: String,
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Property>>,
}

impl Property {
    /// New property of the given type; `name_id` defaults to `name`.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        let name = name.into();
        Self {
            name_id: name.clone(),
            name,
            kind,
            description: None,
            required: false,
            multi_select: false,
            enum_values: Vec::new(),
            properties: Vec::new(),
            items: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    /// Enum property with the given symbols.
    pub fn enumeration(
        name: impl Into<String>,
        symbols: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut p = Self::new(name, PropertyType::Enum);
        p.enum_values = symbols.into_iter().map(Into::into).collect();
        p
    }

    /// Array property whose items have the given shape.
    pub fn array(name: impl Into<String>, items: Property) -> Self {
        let mut p = Self::new(name, PropertyType::Array);
        p.items = Some(Box::new(items));
        p
    }

    /// Object property with nested fields.
    pub fn object(name: impl Into<String>, properties: Vec<Property>) -> Self {
        let mut p = Self::new(name, PropertyType::Object);
        p.properties = properties;
        p
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multi_select(mut self) -> Self {
        self.multi_select = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_name_id(mut self, name_id: impl Into<String>) -> Self {
        self.name_id = name_id.into();
        self
    }

    /// JSON-schema fragment for this property (used for model response
    /// formats and tool specs).
    pub fn to_json_schema(&self) -> serde_json::Value {
        let base = match self.kind {
            PropertyType::String => serde_json::json!({ "type": "string" }),
            PropertyType::Integer => serde_json::json!({ "type": "integer" }),
            PropertyType::Number => serde_json::json!({ "type": "number" }),
            PropertyType::Boolean => serde_json::json!({ "type": "boolean" }),
            PropertyType::Enum => {
                serde_json::json!({ "type": "string", "enum": self.enum_values })
            }
            PropertyType::Array => {
                let items = self
                    .items
                    .as_ref()
                    .map(|p| p.to_json_schema())
                    .unwrap_or_else(|| serde_json::json!({ "type": "string" }));
                serde_json::json!({ "type": "array", "items": items })
            }
            PropertyType::Object => {
                let mut props = serde_json::Map::new();
                let mut required = Vec::new();
                for p in &self.properties {
                    props.insert(p.name.clone(), p.to_json_schema());
                    if p.required {
                        required.push(serde_json::Value::String(p.name.clone()));
                    }
                }
                serde_json::json!({
                    "type": "object",
                    "properties": props,
                    "required": required,
                })
            }
        };
        let mut base = base;
        if self.multi_select && self.kind != PropertyType::Array {
            base = serde_json::json!({ "type": "array", "items": base });
        }
        if let Some(desc) = &self.description {
            if let Some(obj) = base.as_object_mut() {
                obj.insert(
                    "description".to_string(),
                    serde_json::Value::String(desc.clone()),
                );
            }
        }
        base
    }
}

/// Description of one record type: stable id plus ordered properties.
///
/// `composable` schemas can be split into one single-field schema per
/// property via [`Schema::decompose`] (each field then drives an independent
/// step). `system` marks system-generated schemas, as opposed to user-facing
/// input forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub composable: bool,
    #[serde(default)]
    pub system: bool,
    pub properties: Vec<Property>,
}

impl Schema {
    /// New empty schema with the given id.
    pub fn new(schema_id: impl Into<String>) -> Self {
        Self {
            schema_id: schema_id.into(),
            description: None,
            composable: false,
            system: false,
            properties: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn composable(mut self) -> Self {
        self.composable = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Appends a property; field order is declaration order.
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Looks up a property by name.
    pub fn property_by_name(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Splits a composable schema into one single-field schema per property,
    /// ids `<schema_id>.<field>`. Non-composable schemas yield themselves.
    pub fn decompose(&self) -> Vec<Schema> {
        if !self.composable {
            return vec![self.clone()];
        }
        self.properties
            .iter()
            .map(|p| Schema {
                schema_id: format!("{}.{}", self.schema_id, p.name),
                description: p.description.clone(),
                composable: false,
                system: self.system,
                properties: vec![p.clone()],
            })
            .collect()
    }

    /// Full JSON-schema document for this record type.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut props = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.properties {
            props.insert(p.name.clone(), p.to_json_schema());
            if p.required {
                required.push(serde_json::Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "title": self.schema_id,
            "properties": props,
            "required": required,
            "additionalProperties": false,
        })
    }
}
