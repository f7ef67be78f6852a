use jobs_core::{Job, JobId, Payload};
use jobs_db::{Database, DbConfig, DbError, QueueStore, StoreConfig, connect, init_schema};

/// Open a store on a fresh in-memory database.
pub async fn setup_store() -> Result<QueueStore, DbError> {
    setup_store_with(StoreConfig::default()).await
}

pub async fn setup_store_with(config: StoreConfig) -> Result<QueueStore, DbError> {
    let db_config = DbConfig::memory().with_database(format!("test_{}", JobId::new()));
    QueueStore::open(&db_config, config).await
}

/// Open a store and also hand back its raw connection.
pub async fn setup_db_and_store() -> Result<(Database, QueueStore), DbError> {
    let db_config = DbConfig::memory().with_database(format!("test_{}", JobId::new()));
    let db = connect(&db_config).await?;
    init_schema(&db).await?;
    Ok((db.clone(), QueueStore::new(db, StoreConfig::default())))
}

/// A queued job calling `noop` with one argument.
pub fn job(queue: &str, marker: &str) -> Job {
    let payload = Payload::new("noop").arg(marker).expect("string args encode");
    Job::from_payload(queue, &payload)
        .expect("payload encodes")
        .with_title(marker)
}
