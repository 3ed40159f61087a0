#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rust_sql_provider::engine::{
    Database, SqlEngine, StatementCallback, StatementErrorCallback, TransactionBody,
    TransactionContext, TransactionErrorCallback, TransactionSuccessCallback,
};
use rust_sql_provider::{ModelDescriptor, ProviderConfig, ProviderError, SqlProvider, Value};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // if LOG_LEVEL env var is set, use it
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt()
            .with_max_level(Level::from_str(&level).unwrap())
            .with_test_writer()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_test_writer()
            .init();
    }
}

pub fn contact_model() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("Contact")
            .field("name", "String", true)
            .field("notes", "Text", false)
            .field("age", "Integer", false)
            .field("score", "Float", false)
            .field("born", "Date", false)
            .field("active", "Boolean", false),
    )
}

/// Records every open and statement passed to the wrapped engine
#[derive(Clone)]
pub struct RecordingEngine {
    inner: Arc<dyn SqlEngine>,
    pub opens: Arc<AtomicUsize>,
    pub statements: Arc<Mutex<Vec<String>>>,
}

impl RecordingEngine {
    pub fn new(inner: impl SqlEngine + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            opens: Arc::new(AtomicUsize::new(0)),
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().unwrap().clear();
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.statements().iter().filter(|s| s.starts_with(prefix)).count()
    }
}

impl SqlEngine for RecordingEngine {
    fn open(
        &self,
        name: &str,
        version: &str,
        description: &str,
        size: u64,
    ) -> Result<Arc<dyn Database>, ProviderError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.open(name, version, description, size)?;
        Ok(Arc::new(RecordingDatabase {
            inner,
            statements: self.statements.clone(),
        }))
    }
}

struct RecordingDatabase {
    inner: Arc<dyn Database>,
    statements: Arc<Mutex<Vec<String>>>,
}

impl RecordingDatabase {
    fn wrap(&self, body: TransactionBody) -> TransactionBody {
        let statements = self.statements.clone();
        Box::new(move |tx: &mut dyn TransactionContext| {
            let mut recording = RecordingContext {
                inner: tx,
                statements,
            };
            body(&mut recording);
        })
    }
}

impl Database for RecordingDatabase {
    fn transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    ) {
        self.inner.transaction(self.wrap(body), on_error, on_success);
    }

    fn read_transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    ) {
        self.inner
            .read_transaction(self.wrap(body), on_error, on_success);
    }
}

struct RecordingContext<'a> {
    inner: &'a mut dyn TransactionContext,
    statements: Arc<Mutex<Vec<String>>>,
}

impl TransactionContext for RecordingContext<'_> {
    fn execute_sql(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        on_success: Option<StatementCallback>,
        on_error: Option<StatementErrorCallback>,
    ) {
        self.statements.lock().unwrap().push(sql.to_string());
        self.inner.execute_sql(sql, params, on_success, on_error);
    }
}

/// A configured provider over a recording in-memory engine. `db_name` must be
/// unique per test since in-memory databases are shared by name.
pub fn recording_provider(db_name: &str) -> (SqlProvider, RecordingEngine) {
    let engine = RecordingEngine::new(rust_sql_provider::SqliteEngine::memory());
    let provider = SqlProvider::new(Arc::new(engine.clone())).configure(ProviderConfig {
        db_name: db_name.to_string(),
        size: 5 * 1024 * 1024,
    });
    (provider, engine)
}
