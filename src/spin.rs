use crossbeam_utils::CachePadded;
use lock_api::GuardSend;
use once_cell::sync::Lazy;
use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

static MULTI_CORE: Lazy<bool> = Lazy::new(|| num_cpus::get() > 1);

/// Escalating back-off: staggered busy waits, then yields, then 1ms sleeps.
///
/// Busy waiting is skipped on single core machines since the thread we are
/// waiting for cannot make progress while we spin.
pub(crate) struct SpinWait {
    count: u32,
    spins: u32,
    yields: u32,
}

impl SpinWait {
    /// Back-off for the bookkeeping lock: 10 staggered spins, 5 yields.
    pub const fn bookkeeping() -> Self {
        Self {
            count: 0,
            spins: 10,
            yields: 5,
        }
    }

    /// Back-off between admission attempts: 4 staggered spins, 12 yields.
    pub const fn acquisition() -> Self {
        Self {
            count: 0,
            spins: 4,
            yields: 12,
        }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn snooze(&mut self) {
        self.count = self.count.saturating_add(1);

        if self.count <= self.spins && *MULTI_CORE {
            for _ in 0..20 * self.count {
                hint::spin_loop();
            }
        } else if self.count <= self.spins + self.yields {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// The lock guarding all bookkeeping of a [`RawRwLock`](crate::RawRwLock).
///
/// Critical sections are a handful of loads and stores, so this never
/// blocks in the kernel and never takes a timeout.
pub(crate) struct RawSpinLock {
    word: CachePadded<AtomicU32>,
}

pub(crate) type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;
pub(crate) type SpinGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock {
        word: CachePadded::new(AtomicU32::new(0)),
    };

    type GuardMarker = GuardSend;

    #[inline]
    fn lock(&self) {
        if !self.try_lock() {
            self.lock_slow();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.word
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.word.store(0, Ordering::Release);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != 0
    }
}

impl RawSpinLock {
    #[cold]
    fn lock_slow(&self) {
        use lock_api::RawMutex;

        let mut backoff = SpinWait::bookkeeping();

        loop {
            backoff.snooze();

            if !self.is_locked() && self.try_lock() {
                return;
            }
        }
    }
}

/// Builds a bookkeeping lock in a `const` context.
pub(crate) const fn spin_lock<T>(data: T) -> SpinLock<T> {
    use lock_api::RawMutex;

    lock_api::Mutex::const_new(RawSpinLock::INIT, data)
}
