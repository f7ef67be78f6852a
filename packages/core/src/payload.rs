//! Encoded callable reference plus arguments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::JobError;

/// The work a job performs: a callable, addressed by a stable name, and the
/// arguments to call it with.
///
/// Payloads only hold JSON values so that any process that knows the
/// callable name can decode and run them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Stable name of the callable, resolved through a registry.
    pub callable: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl Payload {
    /// Create a payload calling `callable` without arguments.
    pub fn new(callable: impl Into<String>) -> Self {
        Self {
            callable: callable.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self, JobError> {
        self.args.push(to_json(value)?);
        Ok(self)
    }

    /// Set a keyword argument.
    pub fn kwarg<T: Serialize>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<Self, JobError> {
        self.kwargs.insert(name.into(), to_json(value)?);
        Ok(self)
    }

    /// Encode into the JSON form stored on a job.
    pub fn encode(&self) -> Result<Value, JobError> {
        if self.callable.trim().is_empty() {
            return Err(JobError::Encoding("callable name is empty".into()));
        }
        to_json(self)
    }

    /// Decode from the JSON form stored on a job.
    pub fn decode(value: &Value) -> Result<Self, JobError> {
        Self::deserialize(value).map_err(|e| JobError::Encoding(e.to_string()))
    }

    /// Positional argument at `index`, if present.
    pub fn get_arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name, if present.
    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, JobError> {
    serde_json::to_value(value).map_err(|e| JobError::Encoding(e.to_string()))
}
