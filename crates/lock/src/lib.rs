//! Distributed mutual-exclusion leases over Redis-compatible stores.
//!
//! Clients request exclusive, TTL-bounded leases on arbitrary string keys.
//! At any instant at most one client holds a valid lease on a given key,
//! subject to the failure model of the deployment: a [`SingleLock`] gives
//! full mutual exclusion against one store, while a [`QuorumLock`] runs the
//! Redlock algorithm across several independent stores and tolerates a
//! minority of them being down.
//!
//! # How it works
//!
//! A lease is a random, unguessable value installed under the key with
//! `SET … NX PX …` semantics. Every mutation of a held lease (release,
//! extension) verifies that value server-side within the same atomic unit
//! as the mutation, so a stale holder can never delete or extend a lease
//! that has since been reacquired. Store backends implement the narrow
//! [`LockStore`] capability trait; `leasehold-redis` provides the Redis
//! adapter and `leasehold-memory` an in-process one for tests and local
//! development.
//!
//! # Critical sections
//!
//! [`SingleLock::using`] and [`QuorumLock::using`] run a caller-supplied
//! routine under automatic lease renewal: the lease is re-extended ahead of
//! expiry while the routine runs, the routine receives an [`AbortSignal`]
//! that fires if renewal ever fails, and the lease is released on every
//! exit path.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use leasehold::{LockOptions, SingleLock};
//! use leasehold_redis::{RedisConfig, RedisLockStore};
//!
//! let store = Arc::new(RedisLockStore::new(&RedisConfig::new("redis://localhost:6379"))?);
//! let lock = SingleLock::new(store, LockOptions::new("jobs:nightly"))?;
//!
//! let report = lock
//!     .using(|signal| async move {
//!         let mut done = 0;
//!         for chunk in chunks {
//!             if signal.is_aborted() {
//!                 break;
//!             }
//!             done += process(chunk).await;
//!         }
//!         done
//!     })
//!     .await?;
//! ```

pub mod batch;
pub mod error;
pub mod handle;
pub mod id;
pub mod options;
pub mod quorum;
pub mod single;
pub mod store;
pub mod testing;

mod supervisor;

pub use batch::MultiLock;
pub use error::{FailureReason, LockError, StoreError};
pub use handle::{AcquisitionMetadata, LockHandle, Strategy};
pub use options::{LockOptions, QuorumOptions, SupervisorOptions};
pub use quorum::QuorumLock;
pub use single::SingleLock;
pub use store::{ExtendOutcome, Inspection, LockStore};
pub use supervisor::AbortSignal;
