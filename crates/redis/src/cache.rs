//! Script-digest cache with NOSCRIPT recovery.
//!
//! A script is loaded once via `SCRIPT LOAD` and invoked by digest with
//! `EVALSHA` from then on. A server that restarted or flushed its script
//! table answers NOSCRIPT; the cache then evicts that one entry, reloads,
//! and retries once. NOSCRIPT never reaches callers.

use dashmap::DashMap;
use deadpool_redis::Connection;
use redis::FromRedisValue;
use tracing::debug;

use leasehold::StoreError;

use crate::scripts::LuaScript;

pub(crate) fn map_redis_error(e: &redis::RedisError) -> StoreError {
    if e.kind() == redis::ErrorKind::NoScriptError {
        StoreError::Script(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Per-store map from script identity to the server-assigned SHA1 digest.
#[derive(Debug, Default)]
pub(crate) struct ScriptCache {
    digests: DashMap<&'static str, String>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every digest. Called on disconnect.
    pub fn clear(&self) {
        self.digests.clear();
    }

    async fn digest(
        &self,
        conn: &mut Connection,
        script: &LuaScript,
    ) -> Result<String, StoreError> {
        if let Some(digest) = self.digests.get(script.id) {
            return Ok(digest.clone());
        }

        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.body)
            .query_async(&mut *conn)
            .await
            .map_err(|e| map_redis_error(&e))?;
        debug!(script = script.id, %digest, "script loaded");
        self.digests.insert(script.id, digest.clone());
        Ok(digest)
    }

    /// Invoke `script` through its cached digest. `build` assembles the
    /// `EVALSHA` command for a given digest, so the retry after a NOSCRIPT
    /// eviction reassembles it against the reloaded digest.
    pub async fn invoke<T>(
        &self,
        conn: &mut Connection,
        script: &LuaScript,
        build: impl Fn(&str) -> redis::Cmd + Send,
    ) -> Result<T, StoreError>
    where
        T: FromRedisValue,
    {
        let digest = self.digest(&mut *conn, script).await?;
        match build(&digest).query_async::<T>(&mut *conn).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                debug!(script = script.id, "server lost the script; reloading");
                self.digests.remove(script.id);
                let digest = self.digest(&mut *conn, script).await?;
                build(&digest)
                    .query_async::<T>(&mut *conn)
                    .await
                    .map_err(|e| map_redis_error(&e))
            }
            Err(e) => Err(map_redis_error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts;

    #[test]
    fn clear_empties_the_cache() {
        let cache = ScriptCache::new();
        cache
            .digests
            .insert(scripts::INSPECT.id, "abc123".to_owned());
        assert_eq!(cache.digests.len(), 1);
        cache.clear();
        assert!(cache.digests.is_empty());
    }

    #[test]
    fn noscript_maps_to_script_error() {
        let err = redis::RedisError::from((
            redis::ErrorKind::NoScriptError,
            "NOSCRIPT No matching script",
        ));
        assert!(matches!(map_redis_error(&err), StoreError::Script(_)));

        let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(matches!(map_redis_error(&err), StoreError::Backend(_)));
    }
}
