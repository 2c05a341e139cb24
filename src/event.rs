//! Waitable events built on the `parking_lot_core` parking lot.
//!
//! An event is keyed by its own address, so it must not move while threads
//! are parked on it. The lock keeps its events in `OnceCell`s that are only
//! emptied on drop, which guarantees that.

use parking_lot_core::{ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetMode {
    /// A signal releases exactly one waiter and is consumed by it.
    Auto,
    /// A signal releases every waiter and stays set until reset.
    Manual,
}

pub(crate) struct Event {
    signaled: AtomicBool,
    mode: ResetMode,
}

impl Event {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            signaled: AtomicBool::new(false),
            mode,
        }
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    pub fn set(&self) {
        match self.mode {
            ResetMode::Manual => {
                self.signaled.store(true, Ordering::Release);
                unsafe {
                    parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
                }
            }
            ResetMode::Auto => unsafe {
                // The callback runs under the queue lock, so a waiter either
                // receives the signal directly or finds it set when validating.
                parking_lot_core::unpark_one(self.key(), |result| {
                    if result.unparked_threads == 0 {
                        self.signaled.store(true, Ordering::Release);
                    }
                    DEFAULT_UNPARK_TOKEN
                });
            },
        }
    }

    fn try_take(&self) -> bool {
        match self.mode {
            ResetMode::Manual => self.signaled.load(Ordering::Acquire),
            ResetMode::Auto => self
                .signaled
                .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
        }
    }

    /// Blocks until the event is signaled or `deadline` passes.
    /// Returns `false` on timeout.
    pub fn wait(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.try_take() {
                return true;
            }

            let validate = || !self.signaled.load(Ordering::Relaxed);
            let result = unsafe {
                parking_lot_core::park(
                    self.key(),
                    validate,
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    deadline,
                )
            };

            match result {
                ParkResult::Unparked(_) => return true,
                ParkResult::Invalid => continue,
                ParkResult::TimedOut => return false,
            }
        }
    }
}
