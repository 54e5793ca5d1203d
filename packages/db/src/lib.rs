//! SurrealDB integration for the budget-generation pipeline.
//!
//! This crate provides database connectivity and repositories for the job
//! queue, the notification outbox and the default collaborator tables.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket

mod connection;
mod record;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError};
pub use schema::init_schema;

/// Connect with the given configuration and apply the schema.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = Database::connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

impl From<DbError> for pipeline_core::PortError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => pipeline_core::PortError::NotFound(what),
            other => pipeline_core::PortError::Failed(other.to_string()),
        }
    }
}
