//! The SQL engine seam
//!
//! The provider only talks to the engine through these traits. Nothing here
//! returns query results directly: a transaction takes a body plus error and
//! success callbacks, and each statement reports through its own callbacks.
//! Implementations must run the body later (not on the caller's stack frame)
//! and then fire exactly one of the two transaction callbacks.

use std::sync::Arc;

use crate::error::ProviderError;
use crate::model::Row;
use crate::value::Value;

/// Rows and counters produced by one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    pub rows_affected: usize,
    /// Row id assigned by an INSERT, if the statement inserted a row.
    pub insert_id: Option<i64>,
}

pub type StatementCallback = Box<dyn FnOnce(ResultSet) + Send + 'static>;
pub type StatementErrorCallback = Box<dyn FnOnce(ProviderError) + Send + 'static>;
pub type TransactionBody = Box<dyn FnOnce(&mut dyn TransactionContext) + Send + 'static>;
pub type TransactionErrorCallback = Box<dyn FnOnce(ProviderError) + Send + 'static>;
pub type TransactionSuccessCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handed to a transaction body for issuing statements
pub trait TransactionContext {
    /// Execute `sql` with positional parameters.
    ///
    /// When the statement fails and `on_error` is present, the error goes to
    /// `on_error` and the transaction carries on. Without `on_error`, the
    /// failure aborts the whole transaction.
    fn execute_sql(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        on_success: Option<StatementCallback>,
        on_error: Option<StatementErrorCallback>,
    );
}

/// An open database handle
pub trait Database: Send + Sync {
    fn transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    );

    /// Like [`Database::transaction`], but statements that write are rejected.
    fn read_transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    );
}

/// Opens database handles
pub trait SqlEngine: Send + Sync {
    fn open(
        &self,
        name: &str,
        version: &str,
        description: &str,
        size: u64,
    ) -> Result<Arc<dyn Database>, ProviderError>;
}
