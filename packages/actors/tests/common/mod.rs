#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobs_actors::{CallableRegistry, JobResult, Payload, QueueManager, WorkerConfig};
use jobs_core::JobId;
use jobs_db::{DbConfig, StoreConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Side effects recorded by the `record` callable, in call order.
pub type Marker = Arc<Mutex<Vec<String>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A manager on a fresh in-memory store.
pub async fn setup_manager(registry: CallableRegistry) -> QueueManager {
    init_tracing();
    let db_config = DbConfig::memory().with_database(format!("test_{}", JobId::new()));
    QueueManager::open(&db_config, StoreConfig::default(), registry)
        .await
        .expect("in-memory store opens")
}

/// Worker settings that keep tests fast.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig::default().with_poll_interval(Duration::from_millis(20))
}

/// Built-in callables plus a set of test callables:
///
/// - `record(text)` appends `text` to the marker
/// - `fail()` always errors
/// - `explode()` panics
/// - `sleep(ms)` sleeps
/// - `flaky(text)` fails on its first call, then records like `record`
pub fn test_registry(marker: Marker) -> CallableRegistry {
    let mut registry = CallableRegistry::with_builtins();

    let record_marker = marker.clone();
    registry.register_fn("record", move |payload: Payload| {
        let marker = record_marker.clone();
        async move { record(&marker, &payload) }
    });

    registry.register_fn("fail", |_| async {
        Err::<JobResult, _>("deliberate failure".to_string())
    });

    registry.register_fn("explode", |payload: Payload| async move {
        if payload.kwargs.is_empty() {
            panic!("kaboom");
        }
        Ok::<_, String>(JobResult::new("unreachable"))
    });

    registry.register_fn("sleep", |payload: Payload| async move {
        let ms = payload.get_arg(0).and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, String>(JobResult::new("slept"))
    });

    let calls = Arc::new(AtomicU32::new(0));
    registry.register_fn("flaky", move |payload: Payload| {
        let marker = marker.clone();
        let calls = calls.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("first call fails".to_string());
            }
            record(&marker, &payload)
        }
    });

    registry
}

fn record(marker: &Marker, payload: &Payload) -> Result<JobResult, String> {
    let text = payload
        .get_arg(0)
        .and_then(Value::as_str)
        .ok_or_else(|| "missing text argument".to_string())?;
    marker.lock().unwrap().push(text.to_string());
    Ok(JobResult::with_output("recorded", Value::from(text)))
}

pub fn record_payload(text: &str) -> Payload {
    Payload::new("record").arg(text).unwrap()
}

pub fn new_marker() -> Marker {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(marker: &Marker) -> Vec<String> {
    marker.lock().unwrap().clone()
}
