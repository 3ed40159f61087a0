//! Callback-driven SQL persistence for model records.
//!
//! # Intention
//!
//! - Map model metadata onto one table per model and keep record state in sync
//!   with it through insert, update, delete and select statements.
//! - Talk to the SQL engine only through its asynchronous transaction protocol:
//!   every outcome arrives through success or error callbacks.
//! - Create each table lazily, exactly once, before the first statement that
//!   needs it.
//!
//! # Architectural Boundaries
//!
//! - The engine is reached through the traits in [`engine`]; [`sqlite`] is the
//!   bundled SQLite implementation.
//! - Model metadata and record construction live in [`model`]; the provider
//!   never invents fields.
//! - No relationships, joins, migrations or connection pooling.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rust_sql_provider::{ModelDescriptor, ProviderConfig, Record, SqlProvider, SqliteEngine};
//!
//! let contact = Arc::new(ModelDescriptor::new("Contact").field("name", "String", true));
//! let provider = SqlProvider::new(Arc::new(SqliteEngine::memory()))
//!     .configure(ProviderConfig { db_name: "app".into(), size: 5 * 1024 * 1024 });
//! provider.save_async(Record::new(&contact).with("name", "Ann")).await?;
//! ```

pub mod engine;
pub mod error;
pub mod model;
pub mod provider;
pub mod schema;
pub mod sqlite;
pub mod statement;
pub mod value;

pub use error::ProviderError;
pub use model::{FieldMeta, ModelDescriptor, Record, RecordState, Row};
pub use provider::{
    DeleteRequest, FindRequest, ProviderConfig, SaveRequest, SqlProvider, WriteOutcome,
};
pub use sqlite::{SqliteConfig, SqliteEngine};
pub use statement::{Constraint, Statement};
pub use value::Value;
