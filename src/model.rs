//! Model metadata and records
//!
//! These types stand in for the model framework: it owns field metadata,
//! builds records from rows, and exposes record state and identity. The
//! provider only reads metadata and attaches a state to records it loads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::FieldType;
use crate::value::Value;

/// Name of the engine-generated primary key column.
pub const ID_COLUMN: &str = "ID";

/// A raw result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Metadata for a single model field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    /// Declared type name as written in the model definition, e.g. `"String"`.
    #[serde(rename = "type")]
    pub declared_type: String,
    #[serde(default)]
    pub required: bool,
}

/// A model definition: its table name and ordered field metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub fields: Vec<FieldMeta>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, name: &str, declared_type: &str, required: bool) -> Self {
        self.fields.push(FieldMeta {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            required,
        });
        self
    }

    pub fn meta(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Build a record from a raw row, tagging it with `state`.
    ///
    /// The `ID` column becomes the record identity. Columns of declared type
    /// Boolean come back from the engine as 0/1 and are restored to booleans.
    pub fn create_record(self: &Arc<Self>, mut row: Row, state: RecordState) -> Record {
        let id = row.remove(ID_COLUMN).and_then(|v| v.as_i64());
        let values = row
            .into_iter()
            .map(|(column, value)| {
                let is_boolean = self
                    .meta(&column)
                    .map(|m| matches!(m.declared_type.parse::<FieldType>(), Ok(FieldType::Boolean)))
                    .unwrap_or(false);
                let value = match value {
                    Value::Integer(i) if is_boolean => Value::Boolean(i != 0),
                    other => other,
                };
                (column, value)
            })
            .collect();
        Record {
            model: self.clone(),
            id,
            state,
            values,
        }
    }
}

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    /// Never persisted
    New,
    /// Loaded from or in sync with storage
    Valid,
    /// Modified since loading
    Invalid,
    Destroyed,
}

/// An in-memory row of a model
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub model: Arc<ModelDescriptor>,
    pub id: Option<i64>,
    pub state: RecordState,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Create an unsaved record
    pub fn new(model: &Arc<ModelDescriptor>) -> Self {
        Self {
            model: model.clone(),
            id: None,
            state: RecordState::New,
            values: BTreeMap::new(),
        }
    }

    /// Set a field value
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Mark the record as persisted under `id`
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        if self.state == RecordState::New {
            self.state = RecordState::Valid;
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
        if self.state == RecordState::Valid {
            self.state = RecordState::Invalid;
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    /// Present fields in metadata order, skipping values with no metadata.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldMeta, &Value)> {
        self.model
            .fields
            .iter()
            .filter_map(move |meta| self.values.get(&meta.name).map(|value| (meta, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::new("Contact")
                .field("name", "String", true)
                .field("active", "Boolean", false)
                .field("age", "Integer", false),
        )
    }

    #[test]
    fn test_create_record_extracts_identity() {
        let model = contact();
        let mut row = Row::new();
        row.insert("ID".into(), Value::Integer(3));
        row.insert("name".into(), Value::Text("Ann".into()));
        row.insert("active".into(), Value::Integer(1));
        row.insert("age".into(), Value::Integer(1));

        let record = model.create_record(row, RecordState::Valid);
        assert_eq!(record.id, Some(3));
        assert_eq!(record.state, RecordState::Valid);
        assert!(record.get("ID").is_none());
        assert_eq!(record.get("active"), Some(&Value::Boolean(true)));
        assert_eq!(record.get("age"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_fields_follow_metadata_order() {
        let model = contact();
        let record = Record::new(&model)
            .with("age", 40)
            .with("name", "Ann")
            .with("nickname", "unmapped");
        let names: Vec<_> = record.fields().map(|(m, _)| m.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age"]);
    }

    #[test]
    fn test_set_invalidates_loaded_record() {
        let model = contact();
        let mut record = Record::new(&model).with("name", "Ann").with_id(1);
        assert_eq!(record.state, RecordState::Valid);
        record.set("name", "Bea");
        assert_eq!(record.state, RecordState::Invalid);
    }
}
