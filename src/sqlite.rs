use rusqlite::{params_from_iter, Connection, Transaction};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::engine::{
    Database, ResultSet, SqlEngine, StatementCallback, StatementErrorCallback, TransactionBody,
    TransactionContext, TransactionErrorCallback, TransactionSuccessCallback,
};
use crate::error::ProviderError;
use crate::model::Row;
use crate::value::Value;

/// Where SQLite databases live
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteConfig {
    /// Named in-memory databases. Handles opened under the same name share
    /// one database for as long as any of them is alive.
    Memory,
    /// One `<name>.db` file per database inside this directory
    Directory(PathBuf),
}

/// SQLite engine that gives every open database its own worker thread
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    config: SqliteConfig,
}

impl SqliteEngine {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn memory() -> Self {
        Self::new(SqliteConfig::Memory)
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::new(SqliteConfig::Directory(path.into()))
    }

    fn connect(&self, name: &str) -> rusqlite::Result<Connection> {
        match &self.config {
            SqliteConfig::Memory => {
                Connection::open(format!("file:{}?mode=memory&cache=shared", name))
            }
            SqliteConfig::Directory(dir) => Connection::open(dir.join(format!("{}.db", name))),
        }
    }
}

impl SqlEngine for SqliteEngine {
    fn open(
        &self,
        name: &str,
        version: &str,
        description: &str,
        size: u64,
    ) -> Result<Arc<dyn Database>, ProviderError> {
        let connection = self
            .connect(name)
            .map_err(|e| ProviderError::Handle(format!("failed to open `{}`: {}", name, e)))?;

        let (sender, receiver) = unbounded_channel();
        let worker_name = name.to_string();
        thread::Builder::new()
            .name(format!("sqlite-{}", name))
            .spawn(move || worker_loop(&worker_name, connection, receiver))
            .map_err(|e| ProviderError::Handle(format!("failed to start worker for `{}`: {}", name, e)))?;

        info!(name, version, description, size, "opened sqlite database");
        Ok(Arc::new(SqliteDatabase { sender }))
    }
}

/// A transaction submitted to a database's worker
struct Job {
    read_only: bool,
    body: TransactionBody,
    on_error: Option<TransactionErrorCallback>,
    on_success: Option<TransactionSuccessCallback>,
}

/// An open SQLite database handle.
///
/// Transactions run one at a time on the handle's worker thread, in the order
/// they were submitted. The worker owns the connection and stops once the
/// handle is dropped and the queue is drained.
pub struct SqliteDatabase {
    sender: UnboundedSender<Job>,
}

impl SqliteDatabase {
    fn submit(&self, job: Job) {
        if let Err(rejected) = self.sender.send(job) {
            let job = rejected.0;
            let err = ProviderError::Handle("database worker has stopped".into());
            match job.on_error {
                Some(on_error) => on_error(err),
                None => warn!(%err, "transaction dropped without an error callback"),
            }
        }
    }
}

impl Database for SqliteDatabase {
    fn transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    ) {
        self.submit(Job {
            read_only: false,
            body,
            on_error,
            on_success,
        });
    }

    fn read_transaction(
        &self,
        body: TransactionBody,
        on_error: Option<TransactionErrorCallback>,
        on_success: Option<TransactionSuccessCallback>,
    ) {
        self.submit(Job {
            read_only: true,
            body,
            on_error,
            on_success,
        });
    }
}

fn worker_loop(name: &str, mut connection: Connection, mut receiver: UnboundedReceiver<Job>) {
    debug!(database = name, "worker started");
    while let Some(job) = receiver.blocking_recv() {
        let Job {
            read_only,
            body,
            on_error,
            on_success,
        } = job;
        // Callbacks run after commit or rollback, once the transaction is gone.
        match run_transaction(&mut connection, read_only, body) {
            Ok(()) => {
                if let Some(on_success) = on_success {
                    on_success();
                }
            }
            Err(err) => {
                debug!(database = name, %err, "transaction rolled back");
                match on_error {
                    Some(on_error) => on_error(err),
                    None => warn!(database = name, %err, "transaction failed without an error callback"),
                }
            }
        }
    }
    debug!(database = name, "worker stopped");
}

fn run_transaction(
    conn: &mut Connection,
    read_only: bool,
    body: TransactionBody,
) -> Result<(), ProviderError> {
    let tx = conn.transaction()?;
    let failure = {
        let mut context = SqliteTransaction {
            tx: &tx,
            read_only,
            failure: None,
        };
        body(&mut context);
        context.failure
    };
    if let Some(err) = failure {
        tx.rollback()?;
        return Err(ProviderError::Transaction(err.to_string()));
    }
    tx.commit()?;
    Ok(())
}

struct SqliteTransaction<'a> {
    tx: &'a Transaction<'a>,
    read_only: bool,
    /// First unhandled statement error; later statements are skipped.
    failure: Option<ProviderError>,
}

impl TransactionContext for SqliteTransaction<'_> {
    fn execute_sql(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        on_success: Option<StatementCallback>,
        on_error: Option<StatementErrorCallback>,
    ) {
        if self.failure.is_some() {
            debug!(sql, "skipping statement in failed transaction");
            return;
        }
        debug!(sql, params = params.len(), "executing statement");
        match execute_statement(self.tx, sql, &params, self.read_only) {
            Ok(result) => {
                if let Some(on_success) = on_success {
                    on_success(result);
                }
            }
            Err(err) => match on_error {
                Some(on_error) => on_error(err),
                None => self.failure = Some(err),
            },
        }
    }
}

fn execute_statement(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    read_only: bool,
) -> Result<ResultSet, ProviderError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ProviderError::statement(sql, e))?;
    if read_only && !stmt.readonly() {
        return Err(ProviderError::statement(
            sql,
            "write statement in read-only transaction",
        ));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let bound = params_from_iter(params.iter().map(Value::to_sql));

    if columns.is_empty() {
        let rows_affected = stmt
            .execute(bound)
            .map_err(|e| ProviderError::statement(sql, e))?;
        let is_insert = sql.trim_start().to_ascii_uppercase().starts_with("INSERT");
        let insert_id = (is_insert && rows_affected > 0).then(|| conn.last_insert_rowid());
        return Ok(ResultSet {
            rows: Vec::new(),
            rows_affected,
            insert_id,
        });
    }

    let mut rows = stmt
        .query(bound)
        .map_err(|e| ProviderError::statement(sql, e))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next().map_err(|e| ProviderError::statement(sql, e))? {
        let mut map = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value: rusqlite::types::Value =
                row.get(i).map_err(|e| ProviderError::statement(sql, e))?;
            map.insert(name.clone(), value.into());
        }
        result.push(map);
    }
    Ok(ResultSet {
        rows: result,
        rows_affected: 0,
        insert_id: None,
    })
}
