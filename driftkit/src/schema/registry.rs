//! Schema registry: explicit registration, cached lookup, typed binding.
//!
//! Record types declare their shape via [`SchemaType`]; the registry caches
//! the resulting [`Schema`] by id (copy-on-write map, process-lifetime, no
//! eviction). Workflow step schemas are registered dynamically with
//! [`SchemaRegistry::register_schema`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::bind::{bind_value, extract_value, PropertyBag};
use super::{Schema, SchemaError};

/// Explicit schema declaration for a record type.
///
/// Replaces reflective discovery: each input/output record names its fields
/// once, in declaration order, and serde carries the values.
pub trait SchemaType: Serialize + DeserializeOwned {
    /// The schema for this record type. Must be deterministic.
    fn schema() -> Schema;
}

/// Registry of schemas by stable id.
///
/// Reads vastly outnumber writes; the map is cloned on mutation so lookups
/// never block registrations.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<Arc<HashMap<String, Arc<Schema>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`'s schema, returning the cached instance. Re-registering
    /// the same type is idempotent.
    pub fn register<T: SchemaType>(&self) -> Arc<Schema> {
        let schema = T::schema();
        self.register_schema(schema)
    }

    /// Registers a dynamically built schema under its id. An existing schema
    /// with the same id is kept and returned (ids are unique and stable).
    pub fn register_schema(&self, schema: Schema) -> Arc<Schema> {
        let id = schema.schema_id.clone();
        {
            let map = self.schemas.read().expect("schema registry poisoned");
            if let Some(existing) = map.get(&id) {
                return existing.clone();
            }
        }
        let entry = Arc::new(schema);
        let mut guard = self.schemas.write().expect("schema registry poisoned");
        let mut next = HashMap::clone(&guard);
        let stored = next.entry(id).or_insert_with(|| entry.clone()).clone();
        *guard = Arc::new(next);
        stored
    }

    /// Reverse lookup by schema id.
    pub fn schema_by_id(&self, schema_id: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .expect("schema registry poisoned")
            .get(schema_id)
            .cloned()
    }

    /// All registered schema ids, sorted.
    pub fn schema_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .schemas
            .read()
            .expect("schema registry poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Binds a property bag into a JSON record against the registered schema.
    pub fn bind(&self, schema_id: &str, bag: &PropertyBag) -> Result<Value, SchemaError> {
        let schema = self
            .schema_by_id(schema_id)
            .ok_or_else(|| SchemaError::Unknown(schema_id.to_string()))?;
        bind_value(&schema, bag)
    }

    /// Typed instantiate: bind then deserialize into `T`.
    pub fn instantiate<T: SchemaType>(&self, bag: &PropertyBag) -> Result<T, SchemaError> {
        let schema = self.register::<T>();
        let value = bind_value(&schema, bag)?;
        serde_json::from_value(value)
            .map_err(|e| SchemaError::bind(schema.schema_id.clone(), e.to_string()))
    }

    /// Flattens a JSON record into a property bag against the registered schema.
    pub fn extract(&self, schema_id: &str, value: &Value) -> Result<PropertyBag, SchemaError> {
        let schema = self
            .schema_by_id(schema_id)
            .ok_or_else(|| SchemaError::Unknown(schema_id.to_string()))?;
        Ok(extract_value(&schema, value))
    }

    /// Typed extract: serialize `record` then flatten. Null fields are omitted.
    pub fn extract_properties<T: SchemaType>(&self, record: &T) -> PropertyBag {
        let schema = self.register::<T>();
        let value = serde_json::to_value(record).unwrap_or(Value::Null);
        extract_value(&schema, &value)
    }

    /// Decomposes a composable schema into per-field schemas (registered
    /// schemas are returned as-is when not composable).
    pub fn decompose(&self, schema_id: &str) -> Result<Vec<Schema>, SchemaError> {
        let schema = self
            .schema_by_id(schema_id)
            .ok_or_else(|| SchemaError::Unknown(schema_id.to_string()))?;
        Ok(schema.decompose())
    }
}
