//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path" or "ws://host:port"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "budgets".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `DATABASE_URL` (default: `mem://`)
    /// - `DATABASE_NAMESPACE` (default: `budgets`)
    /// - `DATABASE_NAME` (default: `main`)
    /// - `DATABASE_USER` / `DATABASE_PASS` (optional root credentials, both required)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let credentials = match (
            std::env::var("DATABASE_USER").ok(),
            std::env::var("DATABASE_PASS").ok(),
        ) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };

        Self {
            endpoint: std::env::var("DATABASE_URL").unwrap_or(defaults.endpoint),
            namespace: std::env::var("DATABASE_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("DATABASE_NAME").unwrap_or(defaults.database),
            credentials,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Surreal(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Shared handle to a SurrealDB connection.
///
/// Cloning is cheap; every repository holds its own clone.
#[derive(Debug, Clone)]
pub struct Database {
    client: Surreal<Any>,
}

impl Database {
    /// Connect, authenticate and select the namespace/database.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let client = connect(config.endpoint.as_str()).await?;

        if let Some((username, password)) = &config.credentials {
            client
                .signin(Root {
                    username,
                    password,
                })
                .await?;
        }

        client
            .use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(Self { client })
    }

    /// Fresh in-memory database with the schema applied.
    pub async fn memory() -> Result<Self, DbError> {
        let db = Self::connect(&DbConfig::memory()).await?;
        crate::init_schema(&db).await?;
        Ok(db)
    }

    pub(crate) fn client(&self) -> &Surreal<Any> {
        &self.client
    }
}
