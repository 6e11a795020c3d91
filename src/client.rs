use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    Request, Response, Url,
};
use serde::de::DeserializeOwned;

use crate::{
    backoff::{self, Sleeper, TokioSleeper},
    breaker::{Breaker, BreakerSettings, CircuitBreakers},
    cache::{cache_key, CacheStore},
    decode::{decode_body, decode_failure},
    AuthKind, Authentication, Authentications, ClientOptions, KitError, Method, RequestBody,
    Result,
};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://127.0.0.1:8080";

/// Client name used for breaker registration and logs when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "default";

/// Resilient HTTP client for calls to one downstream service.
///
/// Every request carries `Content-Type: application/json` and the registered
/// authentication headers. Transport errors are retried with backoff up to
/// [`ClientOptions::max_retries`]; any received status is final.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    name: String,
    options: ClientOptions,
    auth: Authentications,
    cache: Option<Arc<dyn CacheStore>>,
    breaker: Arc<dyn Breaker>,
    breaker_settings: BreakerSettings,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field("options", &self.options)
            .field("auth", &self.auth)
            .field("cache", &self.cache.is_some())
            .field("breaker_settings", &self.breaker_settings)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Creates a client for `base_url`.
    ///
    /// An empty base URL falls back to [`DEFAULT_BASE_URL`]; a trailing `/` is
    /// dropped.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = match base_url.trim().trim_end_matches('/') {
            "" => DEFAULT_BASE_URL.to_owned(),
            trimmed => trimmed.to_owned(),
        };
        Self {
            http: reqwest::Client::new(),
            base_url,
            name: DEFAULT_CLIENT_NAME.to_owned(),
            options: ClientOptions::default(),
            auth: Authentications::new(),
            cache: None,
            breaker: Arc::new(CircuitBreakers::new()),
            breaker_settings: BreakerSettings::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `KIT_HTTP_BASE_URL` — base URL of the downstream service (required)
    /// - `KIT_HTTP_CLIENT_NAME` — client name for breaker registration and logs
    /// - `KIT_HTTP_MAX_RETRIES` — retries after a transport error
    /// - `KIT_HTTP_TIMEOUT_MS` — per-request timeout
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("KIT_HTTP_BASE_URL").map_err(|_| {
            KitError::Config("missing KIT_HTTP_BASE_URL environment variable".to_owned())
        })?;
        if base_url.trim().is_empty() {
            return Err(KitError::Config(
                "KIT_HTTP_BASE_URL is set but empty".to_owned(),
            ));
        }

        let mut options = ClientOptions::default();
        if let Some(max_retries) = env_parse("KIT_HTTP_MAX_RETRIES")? {
            options.max_retries = max_retries;
        }
        if let Some(timeout_ms) = env_parse("KIT_HTTP_TIMEOUT_MS")? {
            options.timeout_ms = timeout_ms;
        }

        let mut client = Self::new(base_url).with_options(options);
        if let Ok(name) = std::env::var("KIT_HTTP_CLIENT_NAME") {
            if !name.trim().is_empty() {
                client = client.with_name(name.trim());
            }
        }
        Ok(client)
    }

    /// Applies client options such as timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Sets the name used as breaker key and in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the underlying transport.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Enables [`HttpClient::cached_call`] against `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shares a breaker registry, e.g. between clients of the same service.
    pub fn with_breaker(mut self, breaker: Arc<dyn Breaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Breaker settings registered under this client's name on the first circuit call.
    pub fn with_breaker_settings(mut self, settings: BreakerSettings) -> Self {
        self.breaker_settings = settings;
        self
    }

    /// Replaces how retry backoff waits between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Builder form of [`HttpClient::add_authentication`].
    pub fn with_authentication(mut self, auth: Authentication) -> Self {
        self.add_authentication(auth);
        self
    }

    /// Registers `auth`, replacing the token of an existing entry of the same kind.
    pub fn add_authentication(&mut self, auth: Authentication) {
        self.auth.upsert(auth);
    }

    /// Registered authentications, API keys included.
    pub fn authentications(&self) -> &Authentications {
        &self.auth
    }

    /// Registered API key. API keys are never attached automatically.
    pub fn api_key(&self) -> Option<&str> {
        self.auth.token(AuthKind::API_KEY)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Joins `path` onto the base URL with a single `/`.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{path}", self.base_url))?)
    }

    /// Builds a request carrying the JSON content type and authentication headers.
    pub fn build_request(&self, method: Method, url: Url, body: RequestBody) -> Result<Request> {
        let mut request = Request::new(method.into(), url);
        self.auth.apply(request.headers_mut())?;
        request
            .headers_mut()
            .append(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.timeout_mut() = Some(Duration::from_millis(self.options.timeout_ms));
        if !body.is_empty() {
            *request.body_mut() = Some(body.into_bytes().into());
        }
        Ok(request)
    }

    /// Sends `path` relative to the base URL and decodes the response into `T`.
    ///
    /// An empty response body decodes as JSON `null`.
    pub async fn call<T, B>(&self, method: Method, path: &str, body: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Into<RequestBody>,
    {
        let url = self.resolve_url(path)?;
        let raw = self.call_raw(method, url, body.into()).await?;
        decode_body(&raw)
    }

    /// Like [`HttpClient::call`], with `url` used as given instead of being
    /// resolved against the base URL.
    pub async fn call_url<T, B>(&self, method: Method, url: &str, body: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Into<RequestBody>,
    {
        let url = Url::parse(url)?;
        let raw = self.call_raw(method, url, body.into()).await?;
        decode_body(&raw)
    }

    /// Replays a cached response for `path` when present, otherwise calls and
    /// caches the raw body for `ttl`.
    pub async fn cached_call<T, B>(
        &self,
        ttl: Duration,
        method: Method,
        path: &str,
        body: B,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Into<RequestBody>,
    {
        self.cached_call_with_key(ttl, method, path, path, body)
            .await
    }

    /// Like [`HttpClient::cached_call`], caching under `key_path` instead of
    /// the request path.
    ///
    /// Cache failures are logged and never fail the call. A cached value that
    /// does not decode into `T` counts as a miss.
    pub async fn cached_call_with_key<T, B>(
        &self,
        ttl: Duration,
        method: Method,
        path: &str,
        key_path: &str,
        body: B,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Into<RequestBody>,
    {
        let url = self.resolve_url(path)?;
        let key = cache_key(self.resolve_url(key_path)?.as_str());

        if let Some(hit) = self.read_cache(&key).await {
            return Ok(hit);
        }

        let raw = self.call_raw(method, url, body.into()).await?;
        let value = decode_body(&raw)?;
        if !raw.trim().is_empty() {
            self.write_cache(&key, raw, ttl).await;
        }
        Ok(value)
    }

    /// Calls `path` through the breaker registered under the client name.
    ///
    /// An open circuit fails with [`KitError::CircuitOpen`] without touching
    /// the network.
    pub async fn circuit_call<T, B>(&self, method: Method, path: &str, body: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Into<RequestBody>,
    {
        self.breaker
            .configure(&self.name, self.breaker_settings.clone());
        let url = self.resolve_url(path)?;
        let request = self.build_request(method, url, body.into())?;
        let raw = self
            .breaker
            .execute(&self.name, Box::pin(self.send(request)))
            .await?;
        decode_body(&raw)
    }

    /// Issues `request` and returns the raw body of a 2xx/3xx response.
    ///
    /// Transport errors are retried; a received status never is. Statuses
    /// outside 2xx/3xx become [`KitError::Api`].
    pub async fn send(&self, request: Request) -> Result<String> {
        #[cfg(feature = "tracing")]
        let command = crate::curl::to_curl(&request, |name| self.auth.is_auth_header(name));

        let outcome = self.send_with_retry(request).await;

        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(body) => tracing::info!(client = %self.name, curl = %command, response = %body, "outbound call"),
            Err(KitError::Api(failure)) => tracing::info!(
                client = %self.name,
                curl = %command,
                status = failure.status_code,
                response = %failure.body,
                "outbound call failed"
            ),
            Err(err) => tracing::info!(client = %self.name, curl = %command, error = %err, "outbound call failed"),
        }

        outcome
    }

    async fn call_raw(&self, method: Method, url: Url, body: RequestBody) -> Result<String> {
        let request = self.build_request(method, url, body)?;
        self.send(request).await
    }

    async fn send_with_retry(&self, request: Request) -> Result<String> {
        let url = request.url().to_string();
        let response = self.execute_with_retry(request, &url).await?;

        let status = response.status();
        let body = response.text().await.map_err(|source| KitError::Read {
            url: url.clone(),
            status: status.as_u16(),
            source,
        })?;

        if !(status.is_success() || status.is_redirection()) {
            return Err(KitError::Api(decode_failure(&url, status.as_u16(), body)));
        }
        Ok(body)
    }

    async fn execute_with_retry(&self, request: Request, url: &str) -> Result<Response> {
        let mut retry = 0usize;
        loop {
            // Streaming bodies cannot be replayed; such requests get one attempt.
            let Some(attempt) = request.try_clone() else {
                return self
                    .http
                    .execute(request)
                    .await
                    .map_err(|source| KitError::Transport {
                        url: url.to_owned(),
                        attempts: 1,
                        source,
                    });
            };

            match self.http.execute(attempt).await {
                Ok(response) => return Ok(response),
                Err(err) if self.should_retry(&err, retry) => {
                    let delay = self.retry_delay(retry);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        client = %self.name,
                        url,
                        retry,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying outbound call"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                    self.sleeper.sleep(delay).await;
                    retry += 1;
                }
                Err(source) => {
                    return Err(KitError::Transport {
                        url: url.to_owned(),
                        attempts: retry + 1,
                        source,
                    })
                }
            }
        }
    }

    /// Only transport errors are retried. Builder errors never succeed on retry.
    fn should_retry(&self, err: &reqwest::Error, retry: usize) -> bool {
        retry < self.options.max_retries && !err.is_builder()
    }

    fn retry_delay(&self, retry: usize) -> Duration {
        if self.options.no_backoff {
            return Duration::ZERO;
        }
        backoff::retry_delay(
            u32::try_from(retry).unwrap_or(u32::MAX),
            Duration::from_millis(self.options.min_retry_delay_ms),
            Duration::from_millis(self.options.max_retry_delay_ms),
        )
    }

    async fn read_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(raw)) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(client = %self.name, key, error = %_err, "cached response does not decode, refetching");
                    None
                }
            },
            Ok(_) => None,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(client = %self.name, key, error = %_err, "failed to read response cache");
                None
            }
        }
    }

    async fn write_cache(&self, key: &str, raw: String, ttl: Duration) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(_err) = cache.set(key, raw, ttl).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(client = %self.name, key, error = %_err, "failed to store response cache");
        }
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| KitError::Config(format!("invalid {key}: {err}"))),
        _ => Ok(None),
    }
}
