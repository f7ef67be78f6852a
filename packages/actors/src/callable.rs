//! Callables and the registry that resolves them by name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use jobs_core::{JobResult, Payload};
use serde_json::Value;

/// Name of the built-in no-op callable used by test jobs.
pub const TEST_JOB: &str = "test_job";

/// Result of running a callable. Errors are recorded on the job as text.
pub type CallResult = Result<JobResult, String>;

/// Future returned by a callable.
pub type CallFuture = BoxFuture<'static, CallResult>;

/// Something a worker can run for a job.
///
/// Implementations are looked up by [`Callable::name`], which is the stable
/// reference stored in a job's payload.
pub trait Callable: Send + Sync + 'static {
    /// Stable name of this callable.
    fn name(&self) -> &str;

    /// Run with the decoded arguments.
    fn call(&self, payload: Payload) -> CallFuture;
}

/// Maps callable names to implementations.
#[derive(Default)]
pub struct CallableRegistry {
    callables: HashMap<String, Arc<dyn Callable>>,
}

impl CallableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            callables: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in callables.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(FnCallable::new(TEST_JOB, test_job));
        registry
    }

    /// Register a callable, replacing any previous one with the same name.
    pub fn register<C: Callable>(&mut self, callable: C) {
        let name = callable.name().to_string();
        if self.callables.insert(name.clone(), Arc::new(callable)).is_some() {
            tracing::warn!("Callable '{}' registered twice, keeping the latest", name);
        }
    }

    /// Register an async function under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.register(FnCallable::new(name, move |payload| -> CallFuture {
            Box::pin(f(payload))
        }));
    }

    /// Look up a callable by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.callables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callables.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// A callable backed by a function returning a boxed future.
pub struct FnCallable<F>
where
    F: Fn(Payload) -> CallFuture + Send + Sync + 'static,
{
    name: String,
    f: F,
}

impl<F> FnCallable<F>
where
    F: Fn(Payload) -> CallFuture + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Callable for FnCallable<F>
where
    F: Fn(Payload) -> CallFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, payload: Payload) -> CallFuture {
        (self.f)(payload)
    }
}

/// Does nothing beyond logging its arguments.
fn test_job(payload: Payload) -> CallFuture {
    Box::pin(async move {
        tracing::info!("Test job called with {:?}", payload.args);
        Ok(JobResult::with_output("ok", Value::Array(payload.args)))
    })
}
