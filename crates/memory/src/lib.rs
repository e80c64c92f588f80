//! In-memory lock store for leasehold.
//!
//! [`MemoryLockStore`] implements the full [`LockStore`](leasehold::LockStore)
//! capability trait over a process-local map. Expiry is lazy and measured on
//! the tokio clock, so tests running under `start_paused` time are fully
//! deterministic. There is no persistence and no cross-process visibility;
//! use it for tests and local development only.

mod store;

pub use store::MemoryLockStore;
