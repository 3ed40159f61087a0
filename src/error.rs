//! Error types for the SQL provider

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// A field declares a type with no column mapping.
    #[error("configuration error: field `{field}` declares unmapped type `{declared}`")]
    Configuration { field: String, declared: String },

    /// The constraint's `?` placeholders and its parameters disagree in number.
    #[error("parameter mismatch: statement has {expected} placeholder(s) but {supplied} parameter(s) were supplied")]
    ParameterMismatch { expected: usize, supplied: usize },

    #[error("database handle error: {0}")]
    Handle(String),

    #[error("statement error in `{sql}`: {message}")]
    Statement { sql: String, message: String },

    #[error("transaction error: {0}")]
    Transaction(String),

    /// Update and delete need a persisted record.
    #[error("record of model `{0}` has no identity")]
    MissingIdentity(String),
}

impl ProviderError {
    pub fn statement(sql: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ProviderError::Statement {
            sql: sql.into(),
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(err: rusqlite::Error) -> Self {
        ProviderError::Transaction(err.to_string())
    }
}
