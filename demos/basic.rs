use std::{sync::Arc, time::Duration};

use kit_http::{AuthKind, HttpClient, MemoryCache, Method, RequestBody};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let token = std::env::var("USERS_TOKEN")?;

    let client = HttpClient::from_env()?
        .with_cache(Arc::new(MemoryCache::new()))
        .with_authentication(AuthKind::BEARER.with_token(token));

    let created: User = client
        .call(
            Method::Post,
            "users",
            RequestBody::json(&serde_json::json!({ "name": "Ann" }))?,
        )
        .await?;
    println!("created {} ({})", created.name, created.id);

    let user: User = client
        .cached_call(
            Duration::from_secs(60),
            Method::Get,
            &format!("users/{}", created.id),
            (),
        )
        .await?;
    println!("{user:?}");

    let profile: serde_json::Value = client
        .circuit_call(Method::Get, &format!("users/{}/profile", user.id), ())
        .await?;
    println!("{profile}");

    Ok(())
}
