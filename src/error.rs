use std::fmt;

/// Code reported for calls that never received a response.
pub const TRANSPORT_ERROR_CODE: &str = "Internal Server Error";

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum KitError {
    /// No response was received, even after the configured retries.
    #[error("transport error calling [{url}] after {attempts} attempt(s): {source}")]
    Transport {
        /// Request URL.
        url: String,
        /// Number of requests issued, including the first one.
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    /// A response arrived but its body could not be read.
    #[error("failed to read response body from [{url}] (status {status}): {source}")]
    Read {
        url: String,
        status: u16,
        #[source]
        source: reqwest::Error,
    },
    /// Upstream answered with a status outside 2xx/3xx.
    #[error(transparent)]
    Api(ApiError),
    /// Request or response JSON could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Base URL or path did not form a valid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// An authentication header name or value is not valid HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// The circuit for this client is open and the call was not attempted.
    #[error("circuit open for client '{name}'")]
    CircuitOpen { name: String },
    /// The breaker's concurrency limit for this client is exhausted.
    #[error("max concurrency reached for client '{name}'")]
    MaxConcurrency { name: String },
    /// The call ran longer than the breaker timeout.
    #[error("call through client '{name}' timed out after {timeout_ms} ms")]
    BreakerTimeout { name: String, timeout_ms: u64 },
    /// Cache store failure. Only ever logged by the cache decorator.
    #[error("cache error: {0}")]
    Cache(String),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl KitError {
    /// Short machine-readable code of the failure.
    ///
    /// Transport failures report `"Internal Server Error"`, upstream failures
    /// report the decoded `code` field (or the status code when absent).
    pub fn code(&self) -> String {
        match self {
            Self::Transport { .. } => TRANSPORT_ERROR_CODE.to_owned(),
            Self::Read { status, .. } => status.to_string(),
            Self::Api(err) => err.code.clone(),
            _ => String::new(),
        }
    }

    /// HTTP status associated with the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { .. } => Some(500),
            Self::Read { status, .. } => Some(*status),
            Self::Api(err) => Some(err.status_code),
            _ => None,
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::Transport { .. } => "Error while retry".to_owned(),
            Self::Api(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Descriptive context of the failure.
    pub fn info(&self) -> String {
        match self {
            Self::Transport { url, .. } | Self::Read { url, .. } => {
                format!("Error when retrying to call [{url}]")
            }
            Self::Api(err) => err.info.clone(),
            _ => String::new(),
        }
    }

    /// Returns `true` when the breaker rejected the call without a network attempt.
    pub fn is_breaker_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::MaxConcurrency { .. })
    }
}

/// Failure reported by an upstream API with a non-2xx/3xx status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    /// URL of the failed call.
    pub url: String,
    pub status_code: u16,
    /// Body `code`, or the status code when the body has none.
    pub code: String,
    /// Body `info` when present, otherwise body `message`.
    pub message: String,
    pub info: String,
    /// Raw response body.
    pub body: String,
    /// Set when the body was not a valid failure object.
    pub decode_error: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error while calling {}: {}", self.url, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::{ApiError, KitError};

    fn api_error() -> ApiError {
        ApiError {
            url: "http://svc/users/1".to_owned(),
            status_code: 404,
            code: "NOT_FOUND".to_owned(),
            message: "user not found".to_owned(),
            info: String::new(),
            body: r#"{"code":"NOT_FOUND","message":"user not found"}"#.to_owned(),
            decode_error: None,
        }
    }

    #[test]
    fn api_error_display_names_url() {
        let err = KitError::Api(api_error());
        assert_eq!(
            err.to_string(),
            "error while calling http://svc/users/1: user not found"
        );
    }

    #[test]
    fn accessors_read_api_error_fields() {
        let err = KitError::Api(api_error());
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.message(), "user not found");
        assert!(!err.is_breaker_rejection());
    }

    #[test]
    fn breaker_rejections_have_no_status() {
        let err = KitError::CircuitOpen {
            name: "users".to_owned(),
        };
        assert!(err.is_breaker_rejection());
        assert_eq!(err.status_code(), None);
        assert_eq!(err.message(), "circuit open for client 'users'");
    }
}
