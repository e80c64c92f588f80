//! Redis lock store backend for leasehold.
//!
//! [`RedisLockStore`] implements the [`LockStore`](leasehold::LockStore)
//! capability trait against a Redis-compatible server: acquisition uses
//! `SET key value PX ttl NX`, and every owner-verified mutation runs as a
//! server-side Lua script so the value check and the mutation happen in one
//! atomic unit. Scripts are invoked by digest through a per-store cache
//! that reloads transparently when the server answers NOSCRIPT.
//!
//! # Consistency
//!
//! Against a single Redis instance a [`SingleLock`](leasehold::SingleLock)
//! over this store gives full mutual exclusion. Replicated deployments
//! (Sentinel, Cluster) can lose a lock during failover because replication
//! is asynchronous; for those, spread a
//! [`QuorumLock`](leasehold::QuorumLock) over several independent
//! instances instead.
//!
//! # Integration tests
//!
//! The tests behind the `integration` feature expect a reachable server at
//! `REDIS_URL` (default `redis://127.0.0.1:6379`) and use a unique key
//! prefix per run.

mod cache;
mod config;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use store::RedisLockStore;
