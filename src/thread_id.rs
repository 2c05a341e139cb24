//! This module hands out thread identities.
//! Unlike `std::thread::ThreadId` these are plain integers, so their low bits
//! can index the recursion table directly.
//! Ids are never reused. A reused id could pick up the recursion entry of a
//! thread that exited while still holding the lock.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Reserved for "no thread" in owner slots and vacant table entries.
pub(crate) const NO_THREAD: usize = usize::MAX;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_ID: usize = NEXT_ID.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn current() -> usize {
    THREAD_ID.with(|id| *id)
}
