//! Database connection management.

use jobs_core::{JobError, JobId, JobStatus};
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle. Cheap to clone.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "file://path" or "rocksdb://path"
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
            namespace: "jobqueue".to_string(),
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

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from `JOBS_DB_*` environment variables, falling back
    /// to the in-memory defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup("JOBS_DB_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(namespace) = lookup("JOBS_DB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = lookup("JOBS_DB_DATABASE") {
            config.database = database;
        }
        if let (Some(user), Some(password)) = (lookup("JOBS_DB_USER"), lookup("JOBS_DB_PASSWORD")) {
            config.credentials = Some((user, password));
        }
        config
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
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database could not be reached.
    #[error("Connection error: {0}")]
    Connection(surrealdb::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// The database rejected a statement.
    #[error("Query error: {0}")]
    Query(String),
    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Job {id} is {status}")]
    NotCancellable { id: JobId, status: JobStatus },
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Whether the failure comes from reaching the backing store rather
    /// than from the request itself, so retrying may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::Unavailable(_))
    }
}

impl From<surrealdb::Error> for DbError {
    fn from(err: surrealdb::Error) -> Self {
        use surrealdb::error::{Api, Db};

        match err {
            surrealdb::Error::Api(Api::Http(_) | Api::Ws(_) | Api::ConnectionUninitialised) => {
                DbError::Connection(err)
            }
            surrealdb::Error::Db(Db::Serialization(msg)) => DbError::Serialization(msg),
            surrealdb::Error::Api(Api::FromValue { error, .. }) => DbError::Serialization(error),
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<DbError> for JobError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(e) => JobError::StoreUnavailable(e.to_string()),
            DbError::Unavailable(msg) => JobError::StoreUnavailable(msg),
            DbError::Query(msg) => JobError::Store(msg),
            DbError::Invalid(msg) => JobError::Config(msg),
            DbError::NotFound(id) => JobError::NotFound(id),
            DbError::NotCancellable { id, status } => JobError::NotCancellable { id, status },
            DbError::InvalidTransition { id, from, to } => {
                JobError::InvalidTransition { id, from, to }
            }
            DbError::Serialization(msg) => JobError::Encoding(msg),
        }
    }
}

/// Open a database connection and select the configured namespace.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root {
            username,
            password,
        })
        .await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
