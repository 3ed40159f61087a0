//! Schema translation: model metadata to `CREATE TABLE` statements

use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;
use crate::model::{FieldMeta, ModelDescriptor, ID_COLUMN};

/// Column clause of the engine-generated primary key.
pub const PRIMARY_KEY_CLAUSE: &str = "INTEGER PRIMARY KEY ASC AUTOINCREMENT UNIQUE";

/// Declared field types understood by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Text,
    Float,
    Integer,
    Date,
    Boolean,
}

impl FieldType {
    /// Native column type keyword for this declared type
    pub fn column_type(&self) -> &'static str {
        match self {
            FieldType::String => "VARCHAR(255)",
            FieldType::Text => "TEXT",
            FieldType::Float => "FLOAT",
            FieldType::Integer => "INTEGER",
            FieldType::Date => "DATE",
            FieldType::Boolean => "BOOLEAN",
        }
    }

    /// String and Text values are bound as text regardless of their in-memory form.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }

    /// The field's declared type, or a configuration error naming the field.
    pub fn resolve(meta: &FieldMeta) -> Result<Self, ProviderError> {
        meta.declared_type
            .parse()
            .map_err(|()| ProviderError::Configuration {
                field: meta.name.clone(),
                declared: meta.declared_type.clone(),
            })
    }
}

impl FromStr for FieldType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "String" => Ok(FieldType::String),
            "Text" => Ok(FieldType::Text),
            "Float" => Ok(FieldType::Float),
            "Integer" => Ok(FieldType::Integer),
            "Date" => Ok(FieldType::Date),
            "Boolean" => Ok(FieldType::Boolean),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    NotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub constraints: Vec<ColumnConstraint>,
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.field_type.column_type())?;
        for constraint in &self.constraints {
            match constraint {
                ColumnConstraint::NotNull => write!(f, " NOT NULL")?,
            }
        }
        Ok(())
    }
}

/// Table layout derived from a model: an `ID` key plus one column per field
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Resolve every field's declared type. Unmapped types fail fast.
    pub fn from_model(model: &ModelDescriptor) -> Result<Self, ProviderError> {
        let columns = model
            .fields
            .iter()
            .map(|meta| {
                let field_type = FieldType::resolve(meta)?;
                let constraints = if meta.required {
                    vec![ColumnConstraint::NotNull]
                } else {
                    Vec::new()
                };
                Ok(ColumnDefinition {
                    name: meta.name.clone(),
                    field_type,
                    constraints,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(Self {
            name: model.name.clone(),
            columns,
        })
    }

    pub fn create_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {}",
            self.name, ID_COLUMN, PRIMARY_KEY_CLAUSE
        );
        for column in &self.columns {
            sql.push_str(", ");
            sql.push_str(&column.to_string());
        }
        sql.push_str(");");
        sql
    }
}

/// Build the `CREATE TABLE IF NOT EXISTS` statement for a model
pub fn create_table(model: &ModelDescriptor) -> Result<String, ProviderError> {
    Ok(TableDefinition::from_model(model)?.create_sql())
}
