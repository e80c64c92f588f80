//! A worker that holds an exclusive lease while it processes a batch.
//!
//! Run against a local server (override with `REDIS_URL`):
//!
//! ```sh
//! cargo run -p leasehold-redis --example worker
//! ```
//!
//! Start a second copy while the first is running to watch it fail to
//! acquire, then take over once the first finishes.

use std::sync::Arc;
use std::time::Duration;

use leasehold::{LockOptions, SingleLock};
use leasehold_redis::{RedisConfig, RedisLockStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leasehold=debug".into()),
        )
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let store = Arc::new(RedisLockStore::new(&RedisConfig::new(url))?);

    let lock = SingleLock::new(
        store,
        LockOptions {
            ttl: Duration::from_secs(10),
            ..LockOptions::new("demo:nightly-report")
        },
    )?;

    let processed = lock
        .using(|signal| async move {
            let mut processed = 0u32;
            for chunk in 0..20 {
                if signal.is_aborted() {
                    eprintln!(
                        "lease lost ({}), stopping early",
                        signal.error().unwrap_or("unknown")
                    );
                    break;
                }
                // Stand-in for real work; the lease is renewed underneath.
                tokio::time::sleep(Duration::from_millis(500)).await;
                processed += 1;
                println!("processed chunk {chunk}");
            }
            processed
        })
        .await?;

    println!("done: {processed} chunks under one lease");
    Ok(())
}
