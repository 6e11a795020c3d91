//! `kit-http` is a resilient outbound HTTP client shared by backend services.
//!
//! [`HttpClient`] wraps a `reqwest` client with:
//! - retry with jittered exponential backoff on transport errors ([`HttpClient::call`])
//! - response caching for a TTL ([`HttpClient::cached_call`])
//! - circuit breaking per client name ([`HttpClient::circuit_call`])
//! - authentication header composition ([`HttpClient::add_authentication`])
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use kit_http::{AuthKind, HttpClient, MemoryCache, Method};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn run() -> kit_http::Result<()> {
//! let client = HttpClient::new("https://users.internal")
//!     .with_name("users")
//!     .with_cache(Arc::new(MemoryCache::new()))
//!     .with_authentication(AuthKind::BEARER.with_token("token"));
//!
//! let user: User = client
//!     .cached_call(Duration::from_secs(60), Method::Get, "users/1", ())
//!     .await?;
//! println!("{} {}", user.id, user.name);
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod backoff;
pub mod breaker;
pub mod cache;
mod client;
mod curl;
mod decode;
mod error;
mod options;
mod query;
mod types;
mod wire;

pub use auth::{AuthKind, Authentication, Authentications};
pub use backoff::{Sleeper, TokioSleeper};
pub use breaker::{Breaker, BreakerSettings, CircuitBreakers, CircuitState, Clock, SystemClock};
pub use cache::{CacheStore, MemoryCache};
pub use client::{HttpClient, DEFAULT_BASE_URL, DEFAULT_CLIENT_NAME};
pub use error::{ApiError, KitError, TRANSPORT_ERROR_CODE};
pub use options::ClientOptions;
pub use query::{parse_query_params, QueryParams, ToQuery};
pub use types::{Method, RequestBody};
pub use wire::Envelope;

pub type Result<T> = std::result::Result<T, KitError>;
