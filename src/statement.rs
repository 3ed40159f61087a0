//! Statement building for records and constraints
//!
//! Every value travels as a positional `?` parameter. Table and column names
//! come from model metadata and are emitted verbatim.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::{FieldMeta, ModelDescriptor, Record, RecordState, ID_COLUMN};
use crate::schema::FieldType;
use crate::value::Value;

/// SQL text with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Caller-supplied filter fragment for `find`, e.g. `WHERE name = ?`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub statement: String,
    #[serde(default)]
    pub parameters: Option<Vec<Value>>,
}

impl Constraint {
    /// A literal fragment with no placeholders
    pub fn literal(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: None,
        }
    }

    /// A parameterized fragment
    pub fn new(statement: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Some(parameters),
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.statement.matches('?').count()
    }

    /// Check placeholders against parameters and hand back the parameter list.
    ///
    /// A fragment without parameters must not contain placeholders.
    pub fn validate(&self) -> Result<Vec<Value>, ProviderError> {
        let expected = self.placeholder_count();
        let parameters = self.parameters.clone().unwrap_or_default();
        if expected != parameters.len() {
            return Err(ProviderError::ParameterMismatch {
                expected,
                supplied: parameters.len(),
            });
        }
        Ok(parameters)
    }
}

/// Bind a field value the way its declared type is stored.
fn bind(meta: &FieldMeta, value: &Value) -> Result<Value, ProviderError> {
    let field_type = FieldType::resolve(meta)?;
    if field_type.is_textual() && !value.is_null() {
        if let Some(text) = value.to_text() {
            return Ok(Value::Text(text));
        }
    }
    Ok(value.clone())
}

/// INSERT or UPDATE depending on the record's state
pub fn save(record: &Record) -> Result<Statement, ProviderError> {
    if record.state == RecordState::New {
        insert(record)
    } else {
        update(record)
    }
}

pub fn insert(record: &Record) -> Result<Statement, ProviderError> {
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for (meta, value) in record.fields() {
        columns.push(meta.name.as_str());
        params.push(bind(meta, value)?);
    }

    if columns.is_empty() {
        return Ok(Statement::new(format!(
            "INSERT INTO {} DEFAULT VALUES;",
            record.model_name()
        )));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        record.model_name(),
        columns.join(", "),
        placeholders
    );
    Ok(Statement::new(sql).with_params(params))
}

/// Overwrite every present field of a persisted record, keyed by its ID.
pub fn update(record: &Record) -> Result<Statement, ProviderError> {
    let id = record
        .id
        .ok_or_else(|| ProviderError::MissingIdentity(record.model_name().to_string()))?;

    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for (meta, value) in record.fields() {
        assignments.push(format!("{} = ?", meta.name));
        params.push(bind(meta, value)?);
    }
    if assignments.is_empty() {
        assignments.push(format!("{ID_COLUMN} = {ID_COLUMN}"));
    }
    params.push(Value::Integer(id));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?;",
        record.model_name(),
        assignments.join(", "),
        ID_COLUMN
    );
    Ok(Statement::new(sql).with_params(params))
}

pub fn delete(record: &Record) -> Result<Statement, ProviderError> {
    let id = record
        .id
        .ok_or_else(|| ProviderError::MissingIdentity(record.model_name().to_string()))?;
    Ok(Statement::new(format!(
        "DELETE FROM {} WHERE {}={};",
        record.model_name(),
        ID_COLUMN,
        id
    )))
}

/// `SELECT <columns|*> FROM <model>` followed by the constraint fragment, if any.
pub fn select(
    model: &ModelDescriptor,
    columns: Option<&[String]>,
    constraint: Option<&Constraint>,
) -> Result<Statement, ProviderError> {
    let projection = match columns {
        Some(columns) if !columns.is_empty() => columns.join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!("SELECT {} FROM {}", projection, model.name);

    let mut params = Vec::new();
    if let Some(constraint) = constraint {
        params = constraint.validate()?;
        if !constraint.statement.is_empty() {
            if !constraint.statement.starts_with(char::is_whitespace) {
                sql.push(' ');
            }
            sql.push_str(&constraint.statement);
        }
    }

    Ok(Statement::new(sql).with_params(params))
}

pub fn max_id(model: &ModelDescriptor) -> Statement {
    Statement::new(format!(
        "SELECT MAX({id}) AS {id} FROM {};",
        model.name,
        id = ID_COLUMN
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn contact() -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::new("Contact")
                .field("name", "String", true)
                .field("notes", "Text", false)
                .field("age", "Integer", false)
                .field("score", "Float", false)
                .field("active", "Boolean", false),
        )
    }

    #[test]
    fn test_insert_has_no_stray_separators() {
        let record = Record::new(&contact())
            .with("name", "Ann")
            .with("age", 31)
            .with("active", true);
        let stmt = insert(&record).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO Contact (name, age, active) VALUES (?, ?, ?);"
        );
        assert!(!stmt.sql.contains(", )"));
        assert!(!stmt.sql.contains("(, "));
        assert_eq!(
            stmt.params,
            vec![
                Value::Text("Ann".into()),
                Value::Integer(31),
                Value::Boolean(true)
            ]
        );
    }

    #[test]
    fn test_insert_binds_textual_fields_as_text() {
        let record = Record::new(&contact())
            .with("name", 42)
            .with("notes", 1.5)
            .with("score", 1.5);
        let stmt = insert(&record).unwrap();

        assert_eq!(
            stmt.params,
            vec![
                Value::Text("42".into()),
                Value::Text("1.5".into()),
                Value::Real(1.5)
            ]
        );
    }

    #[test]
    fn test_insert_single_field() {
        let record = Record::new(&contact()).with("name", "Ann");
        let stmt = insert(&record).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO Contact (name) VALUES (?);");
    }

    #[test]
    fn test_insert_without_fields() {
        let stmt = insert(&Record::new(&contact())).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO Contact DEFAULT VALUES;");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_save_dispatches_on_state() {
        let model = contact();
        let fresh = Record::new(&model).with("name", "Ann");
        assert!(save(&fresh).unwrap().sql.starts_with("INSERT"));

        let loaded = Record::new(&model).with("name", "Ann").with_id(4);
        assert!(save(&loaded).unwrap().sql.starts_with("UPDATE"));
    }

    #[test]
    fn test_update_by_identity() {
        let record = Record::new(&contact())
            .with("name", "Ann")
            .with("age", 32)
            .with_id(9);
        let stmt = update(&record).unwrap();

        assert_eq!(stmt.sql, "UPDATE Contact SET name = ?, age = ? WHERE ID = ?;");
        assert_eq!(
            stmt.params,
            vec![Value::Text("Ann".into()), Value::Integer(32), Value::Integer(9)]
        );
    }

    #[test]
    fn test_update_requires_identity() {
        let mut record = Record::new(&contact()).with("name", "Ann");
        record.state = RecordState::Invalid;
        assert_eq!(
            update(&record).unwrap_err(),
            ProviderError::MissingIdentity("Contact".into())
        );
    }

    #[test]
    fn test_delete_statement() {
        let record = Record::new(&contact()).with_id(7);
        let stmt = delete(&record).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM Contact WHERE ID=7;");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_all() {
        let stmt = select(&contact(), None, None).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM Contact");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_columns() {
        let columns = vec!["name".to_string(), "age".to_string()];
        let stmt = select(&contact(), Some(&columns), None).unwrap();
        assert_eq!(stmt.sql, "SELECT name, age FROM Contact");

        let single = vec!["name".to_string()];
        let stmt = select(&contact(), Some(&single), None).unwrap();
        assert_eq!(stmt.sql, "SELECT name FROM Contact");
    }

    #[test]
    fn test_select_with_parameters() {
        let constraint = Constraint::new("WHERE name = ? AND age > ?", vec!["Ann".into(), 30.into()]);
        let stmt = select(&contact(), None, Some(&constraint)).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM Contact WHERE name = ? AND age > ?");
        assert_eq!(stmt.params, vec![Value::Text("Ann".into()), Value::Integer(30)]);
    }

    #[test]
    fn test_select_literal_constraint() {
        let constraint = Constraint::literal(" WHERE age > 30");
        let stmt = select(&contact(), None, Some(&constraint)).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM Contact WHERE age > 30");
    }

    #[test]
    fn test_select_parameter_mismatch() {
        let too_few = Constraint::new("WHERE name = ? AND age > ?", vec!["Ann".into()]);
        assert_eq!(
            select(&contact(), None, Some(&too_few)).unwrap_err(),
            ProviderError::ParameterMismatch {
                expected: 2,
                supplied: 1
            }
        );

        let too_many = Constraint::new("WHERE age > 3", vec![1.into()]);
        assert!(matches!(
            select(&contact(), None, Some(&too_many)),
            Err(ProviderError::ParameterMismatch { expected: 0, supplied: 1 })
        ));

        let missing = Constraint::literal("WHERE name = ?");
        assert!(matches!(
            select(&contact(), None, Some(&missing)),
            Err(ProviderError::ParameterMismatch { expected: 1, supplied: 0 })
        ));
    }

    #[test]
    fn test_max_id() {
        assert_eq!(max_id(&contact()).sql, "SELECT MAX(ID) AS ID FROM Contact;");
    }
}
