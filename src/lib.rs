//! A reader-writer lock with an upgradeable read slot, optional per-thread
//! reentrancy and a writer preferring wake policy.
//!
//! [`RawRwLock`] exposes the explicit `enter_*`/`try_enter_*`/`exit_*`
//! protocol. [`RwLock`] wraps it in `lock_api` guards.

mod api;
mod error;
mod event;
mod lock;
mod spin;
mod state;
mod table;
mod thread_id;
mod timeout;

pub use api::{
    rwlock_with_policy, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
pub use error::{LockError, Recursion, Slot};
pub use lock::{LockStats, RawRwLock, RecursionPolicy};
pub use timeout::Timeout;
