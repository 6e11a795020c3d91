use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failure object returned by downstream APIs.
#[derive(Debug, Default, Deserialize)]
pub struct FailureBody {
    /// Kit services send a numeric code, others a string.
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

impl FailureBody {
    pub fn code_string(&self) -> Option<String> {
        match self.code.as_ref()? {
            Value::String(code) => Some(code.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Success envelope used by services built on the same kit.
///
/// ```json
/// { "data": { "id": 1 }, "metadata": { "request_took": 0.012 } }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
