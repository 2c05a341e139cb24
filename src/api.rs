//! `lock_api` glue so that [`RawRwLock`] can back a typed [`RwLock`].
//!
//! The `lock_api` traits are infallible, so misuse that the inherent methods
//! report as a [`LockError`] panics here with the same message.

use crate::error::LockError;
use crate::lock::{RawRwLock, RecursionPolicy};
use crate::timeout::Timeout;
use lock_api::GuardNoSend;
use std::time::{Duration, Instant};

pub type RwLock<T> = lock_api::RwLock<RawRwLock, T>;
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwLock, T>;
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwLock, T>;
pub type RwLockUpgradableReadGuard<'a, T> =
    lock_api::RwLockUpgradableReadGuard<'a, RawRwLock, T>;

/// `RwLock::new` always builds a [`RecursionPolicy::NoRecursion`] lock, use
/// this for a reentrant one.
pub fn rwlock_with_policy<T>(value: T, policy: RecursionPolicy) -> RwLock<T> {
    RwLock::from_raw(RawRwLock::new(policy), value)
}

#[track_caller]
fn check<T>(result: Result<T, LockError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}", err),
    }
}

impl RawRwLock {
    fn upgrade_within(&self, timeout: Timeout) -> bool {
        let upgraded = check(self.try_enter_write(timeout));

        if upgraded {
            check(self.exit_upgradeable_read());
        }

        upgraded
    }
}

unsafe impl lock_api::RawRwLock for RawRwLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawRwLock::new(RecursionPolicy::NoRecursion);

    // Ownership is tracked per thread, a guard must be released where it was taken.
    type GuardMarker = GuardNoSend;

    fn lock_shared(&self) {
        check(self.enter_read())
    }

    fn try_lock_shared(&self) -> bool {
        check(self.try_enter_read(Timeout::ZERO))
    }

    unsafe fn unlock_shared(&self) {
        check(self.exit_read())
    }

    fn lock_exclusive(&self) {
        check(self.enter_write())
    }

    fn try_lock_exclusive(&self) -> bool {
        check(self.try_enter_write(Timeout::ZERO))
    }

    unsafe fn unlock_exclusive(&self) {
        check(self.exit_write())
    }

    fn is_locked(&self) -> bool {
        RawRwLock::is_locked(self)
    }

    fn is_locked_exclusive(&self) -> bool {
        RawRwLock::is_locked_exclusive(self)
    }
}

unsafe impl lock_api::RawRwLockUpgrade for RawRwLock {
    fn lock_upgradable(&self) {
        check(self.enter_upgradeable_read())
    }

    fn try_lock_upgradable(&self) -> bool {
        check(self.try_enter_upgradeable_read(Timeout::ZERO))
    }

    unsafe fn unlock_upgradable(&self) {
        check(self.exit_upgradeable_read())
    }

    unsafe fn upgrade(&self) {
        self.upgrade_within(Timeout::Infinite);
    }

    unsafe fn try_upgrade(&self) -> bool {
        self.upgrade_within(Timeout::ZERO)
    }
}

unsafe impl lock_api::RawRwLockTimed for RawRwLock {
    type Duration = Duration;
    type Instant = Instant;

    fn try_lock_shared_for(&self, timeout: Duration) -> bool {
        check(self.try_enter_read(timeout))
    }

    fn try_lock_shared_until(&self, timeout: Instant) -> bool {
        check(self.try_enter_read(Timeout::until(timeout)))
    }

    fn try_lock_exclusive_for(&self, timeout: Duration) -> bool {
        check(self.try_enter_write(timeout))
    }

    fn try_lock_exclusive_until(&self, timeout: Instant) -> bool {
        check(self.try_enter_write(Timeout::until(timeout)))
    }
}

unsafe impl lock_api::RawRwLockUpgradeTimed for RawRwLock {
    fn try_lock_upgradable_for(&self, timeout: Duration) -> bool {
        check(self.try_enter_upgradeable_read(timeout))
    }

    fn try_lock_upgradable_until(&self, timeout: Instant) -> bool {
        check(self.try_enter_upgradeable_read(Timeout::until(timeout)))
    }

    unsafe fn try_upgrade_for(&self, timeout: Duration) -> bool {
        self.upgrade_within(Timeout::After(timeout))
    }

    unsafe fn try_upgrade_until(&self, timeout: Instant) -> bool {
        self.upgrade_within(Timeout::until(timeout))
    }
}
