//! The SQL data provider
//!
//! # Initialization
//!
//! Each model table moves through `Uninitialized -> Initializing -> Ready`.
//! The first request for a model opens the database handle (once per provider)
//! and issues `CREATE TABLE IF NOT EXISTS`. Requests that arrive meanwhile wait
//! in that table's pending queue. Once the table exists every pending request
//! is dispatched again, in arrival order, and now runs because the table is
//! Ready. A failed initialization reports to every pending request and leaves
//! the table Uninitialized; nothing is retried on its own.
//!
//! # Callbacks
//!
//! Every request carries optional success and error handlers. Exactly one of
//! them fires, at most once, usually from an engine thread after the call has
//! returned. Requests that cannot be built (unmapped types, placeholder
//! mismatches, missing identity) fail on the caller's stack without reaching
//! the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::engine::{Database, ResultSet, SqlEngine, TransactionContext};
use crate::error::ProviderError;
use crate::model::{ModelDescriptor, Record, RecordState};
use crate::schema;
use crate::statement::{self, Constraint, Statement};

pub const DB_VERSION: &str = "2.0";
pub const DB_DESCRIPTION: &str = "Database for application models";

/// Database selection for a provider instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub db_name: String,
    /// Estimated database size in bytes
    pub size: u64,
}

/// Outcome of a successful insert, update or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Identity of the written record. For inserts this is the engine-assigned ID.
    pub id: Option<i64>,
    pub rows_affected: usize,
}

pub type WriteCallback = Box<dyn FnOnce(WriteOutcome) + Send + 'static>;
pub type FindCallback = Box<dyn FnOnce(Vec<Record>) + Send + 'static>;
pub type ErrorCallback = Box<dyn FnOnce(ProviderError) + Send + 'static>;
pub type InitCallback = Box<dyn FnOnce(Result<(), ProviderError>) + Send + 'static>;

/// Insert a NEW record or update a persisted one
pub struct SaveRequest {
    pub record: Record,
    pub on_success: Option<WriteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl SaveRequest {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_success(mut self, f: impl FnOnce(WriteOutcome) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(ProviderError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// Delete a persisted record by identity
pub struct DeleteRequest {
    pub record: Record,
    pub on_success: Option<WriteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl DeleteRequest {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_success(mut self, f: impl FnOnce(WriteOutcome) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(ProviderError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// Load records of a model, optionally projected and filtered
pub struct FindRequest {
    pub model: Arc<ModelDescriptor>,
    pub columns: Option<Vec<String>>,
    pub constraint: Option<Constraint>,
    pub on_success: Option<FindCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl FindRequest {
    pub fn new(model: &Arc<ModelDescriptor>) -> Self {
        Self {
            model: model.clone(),
            columns: None,
            constraint: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(Vec<Record>) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(ProviderError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// A request waiting for its table, with the statement already built
enum PendingRequest {
    Init {
        model: Arc<ModelDescriptor>,
        callback: Option<InitCallback>,
    },
    Write {
        model: Arc<ModelDescriptor>,
        statement: Statement,
        /// Known identity for updates and deletes; inserts take the engine's.
        identity: Option<i64>,
        on_success: Option<WriteCallback>,
        on_error: Option<ErrorCallback>,
    },
    Read {
        model: Arc<ModelDescriptor>,
        statement: Statement,
        on_success: Option<FindCallback>,
        on_error: Option<ErrorCallback>,
    },
}

impl PendingRequest {
    fn model(&self) -> &Arc<ModelDescriptor> {
        match self {
            PendingRequest::Init { model, .. }
            | PendingRequest::Write { model, .. }
            | PendingRequest::Read { model, .. } => model,
        }
    }

    fn fail(self, err: ProviderError) {
        match self {
            PendingRequest::Init { callback, .. } => match callback {
                Some(callback) => callback(Err(err)),
                None => warn!(%err, "initialization failed without a callback"),
            },
            PendingRequest::Write { on_error, .. } | PendingRequest::Read { on_error, .. } => {
                report(on_error, err)
            }
        }
    }
}

fn report(on_error: Option<ErrorCallback>, err: ProviderError) {
    match on_error {
        Some(on_error) => on_error(err),
        None => warn!(%err, "request failed without an error callback"),
    }
}

enum TableState {
    Initializing(Vec<PendingRequest>),
    Ready,
}

#[derive(Default)]
struct ProviderState {
    handle: Option<Arc<dyn Database>>,
    tables: HashMap<String, TableState>,
}

/// Persists model records through an asynchronous SQL engine.
///
/// Clones share the same handle and table states. Use [`SqlProvider::configure`]
/// for an independent instance.
#[derive(Clone)]
pub struct SqlProvider {
    engine: Arc<dyn SqlEngine>,
    config: Option<ProviderConfig>,
    state: Arc<Mutex<ProviderState>>,
}

impl SqlProvider {
    /// The base provider. It has no database configured, so data operations
    /// fail with a handle error until [`SqlProvider::configure`] is used.
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self {
            engine,
            config: None,
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    /// A new provider carrying `config`, with its own handle and table states.
    /// `self` is left untouched.
    pub fn configure(&self, config: ProviderConfig) -> Self {
        debug!(db_name = %config.db_name, size = config.size, "configuring provider");
        Self {
            engine: self.engine.clone(),
            config: Some(config),
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    pub fn config(&self) -> Option<&ProviderConfig> {
        self.config.as_ref()
    }

    /// Whether the model's table has been created by this provider
    pub fn is_initialized(&self, model: &ModelDescriptor) -> bool {
        matches!(self.lock_state().tables.get(&model.name), Some(TableState::Ready))
    }

    /// Open the database and create the model's table. Once the table is
    /// Ready, further calls complete immediately without touching the engine.
    pub fn init(
        &self,
        model: &Arc<ModelDescriptor>,
        callback: impl FnOnce(Result<(), ProviderError>) + Send + 'static,
    ) {
        self.dispatch(PendingRequest::Init {
            model: model.clone(),
            callback: Some(Box::new(callback)),
        });
    }

    pub fn save(&self, request: SaveRequest) {
        let SaveRequest {
            record,
            on_success,
            on_error,
        } = request;
        let identity = match record.state {
            RecordState::New => None,
            _ => record.id,
        };
        match statement::save(&record) {
            Ok(statement) => self.dispatch(PendingRequest::Write {
                model: record.model.clone(),
                statement,
                identity,
                on_success,
                on_error,
            }),
            Err(err) => {
                error!(model = %record.model_name(), %err, "cannot build save statement");
                report(on_error, err);
            }
        }
    }

    pub fn del(&self, request: DeleteRequest) {
        let DeleteRequest {
            record,
            on_success,
            on_error,
        } = request;
        match statement::delete(&record) {
            Ok(statement) => self.dispatch(PendingRequest::Write {
                model: record.model.clone(),
                statement,
                identity: record.id,
                on_success,
                on_error,
            }),
            Err(err) => {
                error!(model = %record.model_name(), %err, "cannot build delete statement");
                report(on_error, err);
            }
        }
    }

    pub fn find(&self, request: FindRequest) {
        let FindRequest {
            model,
            columns,
            constraint,
            on_success,
            on_error,
        } = request;
        match statement::select(&model, columns.as_deref(), constraint.as_ref()) {
            Ok(statement) => self.dispatch(PendingRequest::Read {
                model,
                statement,
                on_success,
                on_error,
            }),
            Err(err) => {
                error!(model = %model.name, %err, "cannot build select statement");
                report(on_error, err);
            }
        }
    }

    /// Highest identity stored for the model, `None` for an empty table.
    pub fn max_id(
        &self,
        model: &Arc<ModelDescriptor>,
        on_success: impl FnOnce(Option<i64>) + Send + 'static,
        on_error: impl FnOnce(ProviderError) + Send + 'static,
    ) {
        self.dispatch(PendingRequest::Read {
            model: model.clone(),
            statement: statement::max_id(model),
            on_success: Some(Box::new(move |records: Vec<Record>| {
                on_success(records.first().and_then(|r| r.id))
            })),
            on_error: Some(Box::new(on_error)),
        });
    }

    pub async fn init_async(&self, model: &Arc<ModelDescriptor>) -> Result<(), ProviderError> {
        let (sender, receiver) = oneshot::channel();
        self.init(model, move |result| {
            let _ = sender.send(result);
        });
        receiver.await.map_err(dropped)?
    }

    pub async fn save_async(&self, record: Record) -> Result<WriteOutcome, ProviderError> {
        let (on_success, on_error, receiver) = completion();
        self.save(SaveRequest::new(record).on_success(on_success).on_error(on_error));
        receiver.await.map_err(dropped)?
    }

    pub async fn delete_async(&self, record: Record) -> Result<WriteOutcome, ProviderError> {
        let (on_success, on_error, receiver) = completion();
        self.del(DeleteRequest::new(record).on_success(on_success).on_error(on_error));
        receiver.await.map_err(dropped)?
    }

    /// Callback-free `find`. Any callbacks already set on `request` are replaced.
    pub async fn find_async(&self, request: FindRequest) -> Result<Vec<Record>, ProviderError> {
        let (on_success, on_error, receiver) = completion();
        self.find(request.on_success(on_success).on_error(on_error));
        receiver.await.map_err(dropped)?
    }

    pub async fn max_id_async(&self, model: &Arc<ModelDescriptor>) -> Result<Option<i64>, ProviderError> {
        let (on_success, on_error, receiver) = completion();
        self.max_id(model, on_success, on_error);
        receiver.await.map_err(dropped)?
    }

    fn lock_state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a request by its table's state
    fn dispatch(&self, request: PendingRequest) {
        let model = request.model().clone();
        let mut state = self.lock_state();
        match state.tables.get_mut(&model.name) {
            Some(TableState::Ready) => {
                let handle = state.handle.clone();
                drop(state);
                match handle {
                    Some(handle) => self.execute(handle, request),
                    None => request.fail(ProviderError::Handle("database handle is not open".into())),
                }
            }
            Some(TableState::Initializing(pending)) => {
                debug!(model = %model.name, queued = pending.len() + 1, "waiting for table initialization");
                pending.push(request);
            }
            None => {
                state
                    .tables
                    .insert(model.name.clone(), TableState::Initializing(vec![request]));
                drop(state);
                self.initialize(&model);
            }
        }
    }

    fn open_handle(&self) -> Result<Arc<dyn Database>, ProviderError> {
        let mut state = self.lock_state();
        if let Some(handle) = &state.handle {
            return Ok(handle.clone());
        }
        let config = self.config.as_ref().ok_or_else(|| {
            ProviderError::Handle("provider has no database configured".into())
        })?;
        let handle = self
            .engine
            .open(&config.db_name, DB_VERSION, DB_DESCRIPTION, config.size)?;
        state.handle = Some(handle.clone());
        Ok(handle)
    }

    fn initialize(&self, model: &Arc<ModelDescriptor>) {
        let sql = match schema::create_table(model) {
            Ok(sql) => sql,
            Err(err) => return self.abort_initialization(&model.name, err),
        };
        let handle = match self.open_handle() {
            Ok(handle) => handle,
            Err(err) => return self.abort_initialization(&model.name, err),
        };

        debug!(model = %model.name, %sql, "creating table");
        let on_success = {
            let provider = self.clone();
            let name = model.name.clone();
            move || provider.finish_initialization(&name)
        };
        let on_error = {
            let provider = self.clone();
            let name = model.name.clone();
            move |err: ProviderError| provider.abort_initialization(&name, err)
        };
        handle.transaction(
            Box::new(move |tx: &mut dyn TransactionContext| {
                tx.execute_sql(&sql, Vec::new(), None, None)
            }),
            Some(Box::new(on_error)),
            Some(Box::new(on_success)),
        );
    }

    /// Replay the pending queue, then mark the table Ready. Requests arriving
    /// during the replay join the queue, so engine submission follows arrival.
    fn finish_initialization(&self, name: &str) {
        let mut replayed = 0;
        loop {
            let (handle, pending) = {
                let mut state = self.lock_state();
                let handle = state.handle.clone();
                match state.tables.get_mut(name) {
                    Some(TableState::Initializing(pending)) if !pending.is_empty() => {
                        (handle, std::mem::take(pending))
                    }
                    _ => {
                        state.tables.insert(name.to_string(), TableState::Ready);
                        break;
                    }
                }
            };
            replayed += pending.len();
            for request in pending {
                match &handle {
                    Some(handle) => self.execute(handle.clone(), request),
                    None => request.fail(ProviderError::Handle("database handle is not open".into())),
                }
            }
        }
        info!(model = name, replayed, "table ready");
    }

    fn abort_initialization(&self, name: &str, err: ProviderError) {
        error!(model = name, %err, "table initialization failed");
        let previous = self.lock_state().tables.remove(name);
        if let Some(TableState::Initializing(pending)) = previous {
            for request in pending {
                request.fail(err.clone());
            }
        }
    }

    fn execute(&self, handle: Arc<dyn Database>, request: PendingRequest) {
        match request {
            PendingRequest::Init { callback, .. } => {
                if let Some(callback) = callback {
                    callback(Ok(()));
                }
            }
            PendingRequest::Write {
                statement,
                identity,
                on_success,
                on_error,
                ..
            } => execute_write(handle.as_ref(), statement, identity, on_success, on_error),
            PendingRequest::Read {
                model,
                statement,
                on_success,
                on_error,
            } => execute_read(handle.as_ref(), model, statement, on_success, on_error),
        }
    }
}

fn execute_write(
    handle: &dyn Database,
    statement: Statement,
    identity: Option<i64>,
    on_success: Option<WriteCallback>,
    on_error: Option<ErrorCallback>,
) {
    let Statement { sql, params } = statement;
    debug!(%sql, "executing write");

    let outcome = Arc::new(Mutex::new(WriteOutcome {
        id: identity,
        rows_affected: 0,
    }));
    let body = {
        let outcome = outcome.clone();
        let sql = sql.clone();
        move |tx: &mut dyn TransactionContext| {
            tx.execute_sql(
                &sql,
                params,
                Some(Box::new(move |result: ResultSet| {
                    let mut outcome = outcome.lock().unwrap_or_else(PoisonError::into_inner);
                    outcome.rows_affected = result.rows_affected;
                    if outcome.id.is_none() {
                        outcome.id = result.insert_id;
                    }
                })),
                None,
            )
        }
    };
    let on_transaction_error = move |err: ProviderError| {
        error!(%sql, %err, "write transaction failed");
        report(on_error, err);
    };
    let on_transaction_success = move || {
        let outcome = *outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(on_success) = on_success {
            on_success(outcome);
        }
    };
    handle.transaction(
        Box::new(body),
        Some(Box::new(on_transaction_error)),
        Some(Box::new(on_transaction_success)),
    );
}

fn execute_read(
    handle: &dyn Database,
    model: Arc<ModelDescriptor>,
    statement: Statement,
    on_success: Option<FindCallback>,
    on_error: Option<ErrorCallback>,
) {
    let Statement { sql, params } = statement;
    debug!(%sql, params = params.len(), "executing read");

    let records = Arc::new(Mutex::new(Vec::new()));
    let body = {
        let records = records.clone();
        let sql = sql.clone();
        move |tx: &mut dyn TransactionContext| {
            let failed_sql = sql.clone();
            tx.execute_sql(
                &sql,
                params,
                Some(Box::new(move |result: ResultSet| {
                    let mut records = records.lock().unwrap_or_else(PoisonError::into_inner);
                    records.extend(
                        result
                            .rows
                            .into_iter()
                            .map(|row| model.create_record(row, RecordState::Valid)),
                    );
                })),
                Some(Box::new(move |err: ProviderError| {
                    error!(sql = %failed_sql, %err, "statement failed");
                })),
            )
        }
    };
    let on_transaction_error = move |err: ProviderError| {
        error!(%sql, %err, "read transaction failed");
        report(on_error, err);
    };
    let on_transaction_success = move || {
        let records = std::mem::take(&mut *records.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(on_success) = on_success {
            on_success(records);
        }
    };
    handle.read_transaction(
        Box::new(body),
        Some(Box::new(on_transaction_error)),
        Some(Box::new(on_transaction_success)),
    );
}

fn dropped(_: oneshot::Canceled) -> ProviderError {
    ProviderError::Transaction("request dropped before completing".into())
}

/// Success and error handlers that resolve one shared receiver
#[allow(clippy::type_complexity)]
fn completion<T: Send + 'static>() -> (
    impl FnOnce(T) + Send + 'static,
    impl FnOnce(ProviderError) + Send + 'static,
    oneshot::Receiver<Result<T, ProviderError>>,
) {
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));
    let on_error = {
        let sender = sender.clone();
        move |err: ProviderError| {
            if let Some(sender) = sender.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = sender.send(Err(err));
            }
        }
    };
    let on_success = move |value: T| {
        if let Some(sender) = sender.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = sender.send(Ok(value));
        }
    };
    (on_success, on_error, receiver)
}
