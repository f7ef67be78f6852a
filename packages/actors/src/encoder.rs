//! Conversion between payloads and stored job data.

use std::sync::Arc;

use jobs_core::{Job, JobError, Payload};
use serde_json::Value;

use crate::callable::{CallFuture, Callable, CallableRegistry};

/// Encodes payloads for storage and resolves stored payloads back into
/// something a worker can run.
#[derive(Clone)]
pub struct JobEncoder {
    registry: Arc<CallableRegistry>,
}

/// A job payload with its callable resolved.
pub struct DecodedJob {
    pub payload: Payload,
    pub callable: Arc<dyn Callable>,
}

impl DecodedJob {
    /// Start the call.
    pub fn call(self) -> CallFuture {
        self.callable.call(self.payload)
    }
}

impl JobEncoder {
    pub fn new(registry: Arc<CallableRegistry>) -> Self {
        Self { registry }
    }

    /// Encode a payload into the JSON stored on a job.
    ///
    /// The callable does not have to be registered here: the process that
    /// runs the job may know names this one does not.
    pub fn encode(&self, payload: &Payload) -> Result<Value, JobError> {
        payload.encode()
    }

    /// Decode a job's payload and resolve its callable.
    pub fn decode(&self, job: &Job) -> Result<DecodedJob, JobError> {
        let payload = Payload::decode(&job.payload)?;
        let callable = self
            .registry
            .get(&payload.callable)
            .ok_or_else(|| JobError::UnknownCallable(payload.callable.clone()))?;
        Ok(DecodedJob { payload, callable })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::TEST_JOB;

    fn encoder() -> JobEncoder {
        JobEncoder::new(Arc::new(CallableRegistry::with_builtins()))
    }

    #[tokio::test]
    async fn decodes_registered_callable() {
        let encoder = encoder();
        let payload = Payload::new(TEST_JOB).arg("hello").unwrap();
        let job = Job::new("default", encoder.encode(&payload).unwrap());

        let decoded = encoder.decode(&job).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.callable.name(), TEST_JOB);
        assert!(decoded.call().await.is_ok());
    }

    #[test]
    fn unknown_callable_is_reported_by_name() {
        let encoder = encoder();
        let value = encoder.encode(&Payload::new("nowhere.to_be_found")).unwrap();

        let err = encoder.decode(&Job::new("default", value)).err().unwrap();
        assert_eq!(err, JobError::UnknownCallable("nowhere.to_be_found".into()));
    }

    #[test]
    fn malformed_payload_is_an_encoding_error() {
        let job = Job::new("default", serde_json::json!("not a payload"));
        assert!(matches!(encoder().decode(&job), Err(JobError::Encoding(_))));
    }
}
