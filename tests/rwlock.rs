use slimlock::{LockError, RawRwLock, Recursion, RecursionPolicy, Slot, Timeout};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn plain() -> RawRwLock {
    RawRwLock::new(RecursionPolicy::NoRecursion)
}

fn reentrant() -> RawRwLock {
    RawRwLock::new(RecursionPolicy::SupportsRecursion)
}

#[test]
fn read_round_trip_leaves_counters_alone() {
    let lock = plain();
    for _ in 0..100 {
        lock.enter_read().unwrap();
        assert_eq!(lock.current_read_count(), 1);
        lock.exit_read().unwrap();
    }
    assert_eq!(lock.current_read_count(), 0);
    assert!(!lock.is_locked());
    assert!(!lock.is_any_lock_held());
}

#[test]
fn concurrent_readers_all_get_in() {
    const READERS: usize = 8;
    let lock = Arc::new(plain());
    let inside = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(Barrier::new(READERS + 1));

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                assert!(lock.try_enter_read(Timeout::Infinite).unwrap());
                inside.wait();
                done.wait();
                lock.exit_read().unwrap();
            })
        })
        .collect();

    inside.wait();
    assert_eq!(lock.current_read_count(), READERS);
    done.wait();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.current_read_count(), 0);
}

#[test]
fn two_readers_scenario() {
    let lock = Arc::new(plain());
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let got = lock.try_enter_read(Duration::from_secs(5)).unwrap();
                barrier.wait();
                barrier.wait();
                lock.exit_read().unwrap();
                got
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(lock.current_read_count(), 2);
    barrier.wait();

    for h in handles {
        assert!(h.join().unwrap());
    }
}

#[test]
fn writers_are_exclusive() {
    let lock = Arc::new(plain());
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        lock.enter_write().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(lock.current_read_count(), 0);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.exit_write().unwrap();
                    } else {
                        lock.enter_read().unwrap();
                        assert_eq!(inside.load(Ordering::SeqCst), 0);
                        lock.exit_read().unwrap();
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(total.load(Ordering::Relaxed), 400);
    assert!(!lock.is_locked());
}

#[test]
fn only_one_upgrader_at_a_time() {
    let lock = Arc::new(plain());
    let holders = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let holders = Arc::clone(&holders);
            thread::spawn(move || {
                for _ in 0..100 {
                    lock.enter_upgradeable_read().unwrap();
                    assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lock.exit_upgradeable_read().unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn upgrader_coexists_with_readers() {
    let lock = Arc::new(plain());
    lock.enter_upgradeable_read().unwrap();

    let other = Arc::clone(&lock);
    let got = thread::spawn(move || {
        let got = other.try_enter_read(Timeout::ZERO).unwrap();
        if got {
            other.exit_read().unwrap();
        }
        got
    })
    .join()
    .unwrap();

    assert!(got);
    assert_eq!(lock.current_read_count(), 0);
    lock.exit_upgradeable_read().unwrap();
}

#[test]
fn recursive_write_is_rejected_without_recursion() {
    let lock = plain();
    lock.enter_write().unwrap();
    assert_eq!(
        lock.enter_write(),
        Err(LockError::DisallowedRecursion(Recursion::RecursiveWrite))
    );
    assert!(lock.is_write_lock_held());
    assert_eq!(lock.recursive_write_count(), 1);
    lock.exit_write().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn forbidden_patterns_without_recursion() {
    let lock = plain();

    lock.enter_read().unwrap();
    assert_eq!(
        lock.enter_read(),
        Err(Recursion::RecursiveRead.into())
    );
    assert_eq!(
        lock.try_enter_write(Timeout::ZERO),
        Err(Recursion::WriteAfterRead.into())
    );
    assert_eq!(
        lock.enter_upgradeable_read(),
        Err(Recursion::UpgradeAfterRead.into())
    );
    assert_eq!(lock.current_read_count(), 1);
    lock.exit_read().unwrap();

    lock.enter_write().unwrap();
    assert_eq!(lock.enter_read(), Err(Recursion::ReadAfterWrite.into()));
    assert_eq!(
        lock.enter_upgradeable_read(),
        Err(Recursion::UpgradeAfterWrite.into())
    );
    lock.exit_write().unwrap();

    lock.enter_upgradeable_read().unwrap();
    assert_eq!(
        lock.enter_upgradeable_read(),
        Err(Recursion::RecursiveUpgrade.into())
    );
    lock.exit_upgradeable_read().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn write_after_plain_read_is_rejected_even_when_reentrant() {
    let lock = reentrant();
    lock.enter_read().unwrap();
    assert_eq!(lock.enter_write(), Err(Recursion::WriteAfterRead.into()));
    assert_eq!(
        lock.enter_upgradeable_read(),
        Err(Recursion::UpgradeAfterRead.into())
    );
    lock.exit_read().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn read_after_write_is_fine_when_reentrant() {
    let lock = reentrant();
    lock.enter_write().unwrap();
    lock.enter_read().unwrap();
    lock.enter_upgradeable_read().unwrap();
    assert!(lock.is_write_lock_held());
    assert!(lock.is_read_lock_held());
    assert!(lock.is_upgradeable_read_lock_held());

    lock.exit_upgradeable_read().unwrap();
    lock.exit_read().unwrap();
    lock.exit_write().unwrap();
    assert!(!lock.is_locked());
    assert!(!lock.is_any_lock_held());
}

#[test]
fn reentrant_reads_unwind() {
    let lock = reentrant();
    for _ in 0..3 {
        lock.enter_read().unwrap();
    }
    assert_eq!(lock.recursive_read_count(), 3);
    assert_eq!(lock.current_read_count(), 1);

    for _ in 0..3 {
        lock.exit_read().unwrap();
    }
    assert_eq!(lock.current_read_count(), 0);
    assert_eq!(
        lock.exit_read(),
        Err(LockError::MismatchedRelease(Slot::Read))
    );
    assert_eq!(lock.current_read_count(), 0);
}

#[test]
fn reentrant_write_and_upgrade_counts() {
    let lock = reentrant();
    lock.enter_upgradeable_read().unwrap();
    lock.enter_upgradeable_read().unwrap();
    lock.enter_write().unwrap();
    lock.enter_write().unwrap();
    assert_eq!(lock.recursive_upgrade_count(), 2);
    assert_eq!(lock.recursive_write_count(), 2);

    lock.exit_write().unwrap();
    assert!(lock.is_locked_exclusive());
    lock.exit_write().unwrap();
    assert!(!lock.is_locked_exclusive());

    lock.exit_upgradeable_read().unwrap();
    lock.exit_upgradeable_read().unwrap();
    assert_eq!(
        lock.exit_upgradeable_read(),
        Err(LockError::MismatchedRelease(Slot::UpgradeableRead))
    );
    assert!(!lock.is_locked());
}

#[test]
fn mismatched_releases() {
    for lock in [plain(), reentrant()] {
        assert_eq!(lock.exit_read(), Err(LockError::MismatchedRelease(Slot::Read)));
        assert_eq!(lock.exit_write(), Err(LockError::MismatchedRelease(Slot::Write)));
        assert_eq!(
            lock.exit_upgradeable_read(),
            Err(LockError::MismatchedRelease(Slot::UpgradeableRead))
        );
        assert!(!lock.is_locked());
    }
}

#[test]
fn release_from_another_thread_is_mismatched() {
    let lock = Arc::new(plain());
    lock.enter_write().unwrap();

    let other = Arc::clone(&lock);
    let result = thread::spawn(move || other.exit_write()).join().unwrap();
    assert_eq!(result, Err(LockError::MismatchedRelease(Slot::Write)));

    assert!(lock.is_locked_exclusive());
    lock.exit_write().unwrap();
}

#[test]
fn zero_timeout_write_fails_fast() {
    let lock = Arc::new(plain());
    lock.enter_read().unwrap();

    let other = Arc::clone(&lock);
    let (got, elapsed) = thread::spawn(move || {
        let start = Instant::now();
        let got = other.try_enter_write(Timeout::ZERO).unwrap();
        (got, start.elapsed())
    })
    .join()
    .unwrap();

    assert!(!got);
    assert!(elapsed < Duration::from_millis(50));
    assert_eq!(lock.waiting_write_count(), 0);
    lock.exit_read().unwrap();
}

#[test]
fn timed_read_waits_out_a_writer() {
    let lock = Arc::new(plain());
    lock.enter_write().unwrap();

    let other = Arc::clone(&lock);
    let (got, elapsed) = thread::spawn(move || {
        let start = Instant::now();
        let got = other.try_enter_read(Duration::from_millis(50)).unwrap();
        (got, start.elapsed())
    })
    .join()
    .unwrap();

    assert!(!got);
    assert!(elapsed >= Duration::from_millis(45), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    assert_eq!(lock.waiting_read_count(), 0);
    assert_eq!(lock.current_read_count(), 0);
    lock.exit_write().unwrap();
}

#[test]
fn upgrade_waits_for_other_readers() {
    let lock = Arc::new(plain());
    let reader_in = Arc::new(Barrier::new(2));
    let released = Arc::new(AtomicBool::new(false));

    let reader = {
        let lock = Arc::clone(&lock);
        let reader_in = Arc::clone(&reader_in);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            lock.enter_read().unwrap();
            reader_in.wait();
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            lock.exit_read().unwrap();
        })
    };

    lock.enter_upgradeable_read().unwrap();
    reader_in.wait();

    lock.enter_write().unwrap();
    assert!(released.load(Ordering::SeqCst));
    assert!(lock.is_write_lock_held());
    assert_eq!(lock.current_read_count(), 0);

    lock.exit_write().unwrap();
    lock.exit_upgradeable_read().unwrap();
    reader.join().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn upgrade_without_other_readers_is_immediate() {
    let lock = plain();
    lock.enter_upgradeable_read().unwrap();
    assert!(lock.try_enter_write(Timeout::ZERO).unwrap());
    lock.exit_write().unwrap();
    lock.exit_upgradeable_read().unwrap();
}

#[test]
fn reentrant_upgrader_with_own_read_can_write() {
    let lock = reentrant();
    lock.enter_upgradeable_read().unwrap();
    lock.enter_read().unwrap();
    assert!(lock.try_enter_write(Timeout::ZERO).unwrap());
    lock.exit_write().unwrap();
    lock.exit_read().unwrap();
    lock.exit_upgradeable_read().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn blocked_writer_is_woken_by_last_reader() {
    let lock = Arc::new(plain());
    lock.enter_read().unwrap();

    let writer = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            lock.enter_write().unwrap();
            lock.exit_write().unwrap();
        })
    };

    while lock.waiting_write_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    lock.exit_read().unwrap();
    writer.join().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn blocked_readers_are_woken_by_writer() {
    let lock = Arc::new(plain());
    lock.enter_write().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.enter_read().unwrap();
                lock.exit_read().unwrap();
            })
        })
        .collect();

    while lock.waiting_read_count() < 4 {
        thread::sleep(Duration::from_millis(1));
    }

    lock.exit_write().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert!(!lock.is_locked());
}

#[test]
fn millisecond_timeouts() {
    let lock = plain();
    assert!(lock.try_enter_read(Timeout::from_millis(-1).unwrap()).unwrap());
    lock.exit_read().unwrap();
    assert_eq!(Timeout::from_millis(-5), Err(LockError::InvalidTimeout(-5)));
}

#[test]
fn waiting_upgrader_writes_before_waiting_writer() {
    let lock = Arc::new(plain());
    let order = Arc::new(Mutex::new(Vec::new()));
    lock.enter_read().unwrap();

    let upgrader = {
        let lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            lock.enter_upgradeable_read().unwrap();
            lock.enter_write().unwrap();
            order.lock().unwrap().push("upgrader");
            lock.exit_write().unwrap();
            lock.exit_upgradeable_read().unwrap();
        })
    };

    while lock.waiting_write_upgrade_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let writer = {
        let lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            lock.enter_write().unwrap();
            order.lock().unwrap().push("writer");
            lock.exit_write().unwrap();
        })
    };

    while lock.waiting_write_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    lock.exit_read().unwrap();
    upgrader.join().unwrap();
    writer.join().unwrap();

    assert_eq!(*order.lock().unwrap(), ["upgrader", "writer"]);
    assert_eq!(lock.stats(), Default::default());
}

#[test]
fn timed_out_writer_wakes_blocked_reader() {
    let lock = Arc::new(plain());
    lock.enter_read().unwrap();

    let writer = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || lock.try_enter_write(Duration::from_millis(200)).unwrap())
    };

    while lock.waiting_write_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let reader = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let start = Instant::now();
            let entered = lock.try_enter_read(Duration::from_secs(3)).unwrap();
            if entered {
                lock.exit_read().unwrap();
            }
            (entered, start.elapsed())
        })
    };

    assert!(!writer.join().unwrap());
    let (entered, waited) = reader.join().unwrap();
    assert!(entered);
    assert!(waited < Duration::from_secs(2));

    lock.exit_read().unwrap();
    assert_eq!(lock.stats(), Default::default());
}
