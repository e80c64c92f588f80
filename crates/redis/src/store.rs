use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use leasehold::store::{self, ExtendOutcome, Inspection, LockStore};
use leasehold::StoreError;

use crate::cache::{map_redis_error, ScriptCache};
use crate::config::RedisConfig;
use crate::scripts;

/// Redis-backed implementation of [`LockStore`].
///
/// Uses `SET NX PX` for acquisition and server-side Lua scripts for every
/// owner-verified mutation, invoked by digest through a per-store script
/// cache. Keys are transparently prefixed at this boundary; the prefix
/// never appears on lock handles.
pub struct RedisLockStore {
    pool: Pool,
    prefix: String,
    operation_timeout: Duration,
    scripts: ScriptCache,
    name: String,
}

impl RedisLockStore {
    /// Create a new `RedisLockStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let cfg = Config::from_url(config.effective_url());
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
            operation_timeout: config.operation_timeout,
            scripts: ScriptCache::new(),
            name: config.display_name(),
        })
    }

    /// Build the full Redis key for a lock.
    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Apply the per-call deadline to a store operation.
    async fn with_timeout<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        store::validate_entry(key, value, ttl)?;
        let full_key = self.full_key(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .arg("NX")
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        store::validate_key(key)?;
        let full_key = self.full_key(key);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.get(&full_key).await.map_err(|e| map_redis_error(&e))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        store::validate_key(key)?;
        let full_key = self.full_key(key);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.del(&full_key).await.map_err(|e| map_redis_error(&e))
        })
        .await
    }

    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        store::validate_key(key)?;
        store::validate_value(value)?;
        let full_key = self.full_key(key);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let deleted: i64 = self
                .scripts
                .invoke(&mut conn, &scripts::DELETE_IF_MATCH, |digest| {
                    let mut cmd = redis::cmd("EVALSHA");
                    cmd.arg(digest).arg(1).arg(&full_key).arg(value);
                    cmd
                })
                .await?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn extend_if_match(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        store::validate_entry(key, value, ttl)?;
        let full_key = self.full_key(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let extended: i64 = self
                .scripts
                .invoke(&mut conn, &scripts::EXTEND_IF_MATCH, |digest| {
                    let mut cmd = redis::cmd("EVALSHA");
                    cmd.arg(digest).arg(1).arg(&full_key).arg(value).arg(ttl_ms);
                    cmd
                })
                .await?;
            Ok(extended == 1)
        })
        .await
    }

    async fn atomic_extend(
        &self,
        key: &str,
        value: &str,
        min_remaining: Duration,
        new_ttl: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        store::validate_entry(key, value, new_ttl)?;
        let full_key = self.full_key(key);
        let min_ms = i64::try_from(min_remaining.as_millis()).unwrap_or(i64::MAX);
        let ttl_ms = i64::try_from(new_ttl.as_millis()).unwrap_or(i64::MAX);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let reply: Vec<redis::Value> = self
                .scripts
                .invoke(&mut conn, &scripts::ATOMIC_EXTEND, |digest| {
                    let mut cmd = redis::cmd("EVALSHA");
                    cmd.arg(digest)
                        .arg(1)
                        .arg(&full_key)
                        .arg(value)
                        .arg(min_ms)
                        .arg(ttl_ms);
                    cmd
                })
                .await?;
            parse_extend_reply(&reply, new_ttl)
        })
        .await
    }

    async fn inspect(&self, key: &str) -> Result<Option<Inspection>, StoreError> {
        store::validate_key(key)?;
        let full_key = self.full_key(key);

        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let reply: Option<(String, i64)> = self
                .scripts
                .invoke(&mut conn, &scripts::INSPECT, |digest| {
                    let mut cmd = redis::cmd("EVALSHA");
                    cmd.arg(digest).arg(1).arg(&full_key);
                    cmd
                })
                .await?;
            Ok(reply.map(|(value, ttl_ms)| Inspection {
                value,
                remaining: ms_to_duration(ttl_ms),
            }))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let reply: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            if reply == "PONG" {
                Ok(())
            } else {
                Err(StoreError::Backend(format!("unexpected ping reply: {reply}")))
            }
        })
        .await
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn disconnect(&self) {
        self.scripts.clear();
        self.pool.close();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Clamp a `PTTL`-style millisecond reply to a duration; the negative
/// sentinels (-1 no expiry, -2 no key) read as zero.
fn ms_to_duration(ms: i64) -> Duration {
    u64::try_from(ms).map_or(Duration::ZERO, Duration::from_millis)
}

/// Decode the `{code, ttl_ms, message}` reply of the `atomic_extend`
/// script.
fn parse_extend_reply(
    reply: &[redis::Value],
    new_ttl: Duration,
) -> Result<ExtendOutcome, StoreError> {
    let code = match reply.first() {
        Some(redis::Value::Int(n)) => *n,
        _ => {
            return Err(StoreError::Script(
                "unexpected atomic_extend reply shape".into(),
            ));
        }
    };
    let ttl_ms = match reply.get(1) {
        Some(redis::Value::Int(n)) => *n,
        _ => {
            return Err(StoreError::Script(
                "unexpected atomic_extend reply shape".into(),
            ));
        }
    };

    match code {
        1 => Ok(ExtendOutcome::Extended { ttl: new_ttl }),
        -1 => Ok(ExtendOutcome::ValueMismatch {
            remaining: ms_to_duration(ttl_ms),
        }),
        0 if ttl_ms == -2 => Ok(ExtendOutcome::NotFound),
        0 => Ok(ExtendOutcome::TooLate {
            remaining: ms_to_duration(ttl_ms),
        }),
        other => Err(StoreError::Script(format!(
            "unexpected atomic_extend result code {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_reply_decoding() {
        let new_ttl = Duration::from_secs(5);

        let reply = [
            redis::Value::Int(1),
            redis::Value::Int(5000),
            redis::Value::BulkString(b"extended".to_vec()),
        ];
        assert_eq!(
            parse_extend_reply(&reply, new_ttl).unwrap(),
            ExtendOutcome::Extended { ttl: new_ttl }
        );

        let reply = [
            redis::Value::Int(0),
            redis::Value::Int(-2),
            redis::Value::BulkString(b"key_not_found".to_vec()),
        ];
        assert_eq!(
            parse_extend_reply(&reply, new_ttl).unwrap(),
            ExtendOutcome::NotFound
        );

        let reply = [
            redis::Value::Int(0),
            redis::Value::Int(120),
            redis::Value::BulkString(b"too_late".to_vec()),
        ];
        assert_eq!(
            parse_extend_reply(&reply, new_ttl).unwrap(),
            ExtendOutcome::TooLate {
                remaining: Duration::from_millis(120)
            }
        );

        let reply = [
            redis::Value::Int(-1),
            redis::Value::Int(800),
            redis::Value::BulkString(b"value_mismatch".to_vec()),
        ];
        assert_eq!(
            parse_extend_reply(&reply, new_ttl).unwrap(),
            ExtendOutcome::ValueMismatch {
                remaining: Duration::from_millis(800)
            }
        );
    }

    #[test]
    fn malformed_extend_reply_is_a_script_error() {
        let err = parse_extend_reply(&[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::Script(_)));

        let reply = [redis::Value::Int(7), redis::Value::Int(0)];
        let err = parse_extend_reply(&reply, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::Script(_)));
    }

    #[test]
    fn negative_pttl_reads_as_zero() {
        assert_eq!(ms_to_duration(-1), Duration::ZERO);
        assert_eq!(ms_to_duration(-2), Duration::ZERO);
        assert_eq!(ms_to_duration(1500), Duration::from_millis(1500));
    }
}
