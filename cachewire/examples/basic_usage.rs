//! Basic usage example for cachewire

use cachewire::{CacheClient, CacheConfig, CacheEvent, InvalidateOptions, SetOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    user_id: u64,
    roles: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=cachewire=debug shows pool and connection activity
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::var("CACHE_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = CacheConfig::from_url(&url)?
        .with_namespace("sessions")
        .with_default_ttl(Duration::from_secs(600));

    let client: CacheClient<Session> = CacheClient::connect(config).await?;
    let mut events = client.subscribe();

    // Store two sessions under the same tag
    for (key, user_id) in [("s1", 1), ("s2", 2)] {
        let session = Session {
            user_id,
            roles: vec!["reader".to_string()],
        };
        client
            .set_with(key, &session, SetOptions::new().with_tags(["tenant:acme"]))
            .await?;
    }

    if let Some(session) = client.get("s1").await? {
        println!("GET s1: {:?}", session);
    }
    println!("TTL s1: {:?}", client.ttl("s1").await?);

    // Drop everything stored for the tenant
    let removed = client
        .invalidate(InvalidateOptions::tags(["tenant:acme"]))
        .await?;
    println!("Invalidated {} sessions", removed);

    let health = client.get_health().await;
    println!("Health: {:?} {:?}", health.status, health.issues);
    println!("Metrics: {:?}", client.metrics());

    while let Ok(event) = events.try_recv() {
        if let CacheEvent::Invalidated { count } = event {
            println!("Event: invalidated {}", count);
        }
    }

    client.disconnect().await;
    Ok(())
}
