/// Configures HTTP timeout and retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    ///
    /// Only transport errors are retried; any received status is final.
    pub max_retries: usize,
    /// Lower bound of the retry delay in milliseconds.
    pub min_retry_delay_ms: u64,
    /// Upper bound of the exponential part of the retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Retry immediately instead of backing off. Mostly useful in tests.
    pub no_backoff: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 80_000,
            max_retries: 0,
            min_retry_delay_ms: 500,
            max_retry_delay_ms: 5_000,
            no_backoff: false,
        }
    }
}
