use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slimlock::{RawRwLock, RecursionPolicy, Timeout};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const OPERATIONS: u64 = 200_000;

/// Percentages of each operation, the rest are plain reads.
struct Mix {
    write: u64,
    upgrade: u64,
    timed: u64,
}

fn ex_mix() -> Mix {
    Mix {
        write: 5,
        upgrade: 10,
        timed: 5,
    }
}

struct Shared {
    lock: RawRwLock,
    value: AtomicU64,
    timeouts: AtomicU64,
}

fn worker(shared: &Shared, seed: u64, mix: &Mix) {
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..OPERATIONS {
        let roll = rng.gen_range(0..100u64);

        if roll < mix.write {
            shared.lock.enter_write().unwrap();
            shared.value.fetch_add(1, Ordering::Relaxed);
            shared.lock.exit_write().unwrap();
        } else if roll < mix.write + mix.upgrade {
            shared.lock.enter_upgradeable_read().unwrap();
            if shared.value.load(Ordering::Relaxed) % 2 == 0 {
                shared.lock.enter_write().unwrap();
                shared.value.fetch_add(1, Ordering::Relaxed);
                shared.lock.exit_write().unwrap();
            }
            shared.lock.exit_upgradeable_read().unwrap();
        } else if roll < mix.write + mix.upgrade + mix.timed {
            if shared.lock.try_enter_read(Duration::from_micros(50)).unwrap() {
                shared.lock.exit_read().unwrap();
            } else {
                shared.timeouts.fetch_add(1, Ordering::Relaxed);
            }
        } else if shared.lock.try_enter_read(Timeout::Infinite).unwrap() {
            shared.lock.exit_read().unwrap();
        }
    }
}

fn run(policy: RecursionPolicy, threads: usize) {
    let shared = Arc::new(Shared {
        lock: RawRwLock::new(policy),
        value: AtomicU64::new(0),
        timeouts: AtomicU64::new(0),
    });
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker(&shared, 0x9E37_79B9 * (i as u64 + 1), &ex_mix()))
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(!shared.lock.is_locked());
    assert_eq!(shared.lock.stats(), Default::default());

    info!(
        ?policy,
        threads,
        elapsed = ?start.elapsed(),
        writes = shared.value.load(Ordering::Relaxed),
        timeouts = shared.timeouts.load(Ordering::Relaxed),
        "stress run finished"
    );
}

fn main() {
    tracing_subscriber::fmt::init();
    let threads = num_cpus::get().max(4);
    run(RecursionPolicy::NoRecursion, threads);
    run(RecursionPolicy::SupportsRecursion, threads);
}
