use crate::error::{LockError, Recursion, Slot};
use crate::event::{Event, ResetMode};
use crate::spin::{spin_lock, SpinGuard, SpinLock, SpinWait};
use crate::state::LockState;
use crate::table::RecursionTable;
use crate::thread_id::{self, NO_THREAD};
use crate::timeout::Timeout;
use once_cell::sync::OnceCell;
use std::fmt;
use std::time::Instant;
use tracing::{debug, trace};

/// Admission attempts (with back-off) before a thread parks on an event.
const MAX_SPIN_COUNT: u32 = 20;

/// Whether a thread may acquire a slot it, or a related slot, already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecursionPolicy {
    #[default]
    NoRecursion,
    SupportsRecursion,
}

/// A point in time snapshot of a lock, as seen from the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockStats {
    pub current_read_count: usize,
    pub write_held: bool,
    pub upgradeable_read_held: bool,
    pub waiting_read_count: usize,
    pub waiting_write_count: usize,
    pub waiting_upgrade_count: usize,
    pub waiting_write_upgrade_count: usize,
}

/// The four classes of blocked threads, one event each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    Read,
    Write,
    Upgrade,
    /// The upgrader waiting to become the writer.
    WriteUpgrade,
}

impl Queue {
    fn reset_mode(self) -> ResetMode {
        match self {
            Queue::Read => ResetMode::Manual,
            Queue::Write | Queue::Upgrade | Queue::WriteUpgrade => ResetMode::Auto,
        }
    }
}

struct WaitCounts {
    read: u32,
    write: u32,
    upgrade: u32,
    write_upgrade: u32,
}

impl WaitCounts {
    fn get_mut(&mut self, queue: Queue) -> &mut u32 {
        match queue {
            Queue::Read => &mut self.read,
            Queue::Write => &mut self.write,
            Queue::Upgrade => &mut self.upgrade,
            Queue::WriteUpgrade => &mut self.write_upgrade,
        }
    }

    fn is_empty(&self) -> bool {
        self.read == 0 && self.write == 0 && self.upgrade == 0 && self.write_upgrade == 0
    }
}

/// Everything guarded by the bookkeeping spinlock.
struct Bookkeeping {
    table: RecursionTable,
    writer: usize,
    upgrader: usize,
    /// The upgrader also holds a plain read, so it accounts for two readers.
    upgrader_holds_read: bool,
    no_waiters: bool,
    waiting: WaitCounts,
}

/// A reader-writer lock with an upgradeable read slot and optional reentrancy.
///
/// Any number of threads may read at once. One thread at a time may hold the
/// upgradeable read slot, which admits it alongside readers and lets it take
/// the write slot later without letting go. Writers, and upgraders waiting to
/// write, are preferred over fresh readers once they start waiting.
///
/// Ownership is tracked per thread, so every `exit_*` call has to come from
/// the thread that made the matching `enter_*` call.
///
/// ```
/// use slimlock::{RawRwLock, RecursionPolicy};
///
/// let lock = RawRwLock::new(RecursionPolicy::NoRecursion);
/// lock.enter_upgradeable_read().unwrap();
/// lock.enter_write().unwrap();
/// assert!(lock.is_write_lock_held());
/// lock.exit_write().unwrap();
/// lock.exit_upgradeable_read().unwrap();
/// ```
pub struct RawRwLock {
    state: LockState,
    book: SpinLock<Bookkeeping>,
    read_event: OnceCell<Event>,
    write_event: OnceCell<Event>,
    upgrade_event: OnceCell<Event>,
    write_upgrade_event: OnceCell<Event>,
    policy: RecursionPolicy,
}

impl RawRwLock {
    pub const fn new(policy: RecursionPolicy) -> Self {
        let reentrant = matches!(policy, RecursionPolicy::SupportsRecursion);

        Self {
            state: LockState::new(),
            book: spin_lock(Bookkeeping {
                table: RecursionTable::new(reentrant),
                writer: NO_THREAD,
                upgrader: NO_THREAD,
                upgrader_holds_read: false,
                no_waiters: true,
                waiting: WaitCounts {
                    read: 0,
                    write: 0,
                    upgrade: 0,
                    write_upgrade: 0,
                },
            }),
            read_event: OnceCell::new(),
            write_event: OnceCell::new(),
            upgrade_event: OnceCell::new(),
            write_upgrade_event: OnceCell::new(),
            policy,
        }
    }

    #[inline]
    pub fn recursion_policy(&self) -> RecursionPolicy {
        self.policy
    }

    #[inline]
    fn reentrant(&self) -> bool {
        self.policy == RecursionPolicy::SupportsRecursion
    }

    fn event(&self, queue: Queue) -> &OnceCell<Event> {
        match queue {
            Queue::Read => &self.read_event,
            Queue::Write => &self.write_event,
            Queue::Upgrade => &self.upgrade_event,
            Queue::WriteUpgrade => &self.write_upgrade_event,
        }
    }

    pub fn enter_read(&self) -> Result<(), LockError> {
        self.try_enter_read(Timeout::Infinite).map(|_| ())
    }

    pub fn enter_write(&self) -> Result<(), LockError> {
        self.try_enter_write(Timeout::Infinite).map(|_| ())
    }

    pub fn enter_upgradeable_read(&self) -> Result<(), LockError> {
        self.try_enter_upgradeable_read(Timeout::Infinite).map(|_| ())
    }

    /// Acquires a read slot, waiting at most `timeout`.
    ///
    /// Returns `Ok(false)` if the wait timed out, in which case nothing changed.
    pub fn try_enter_read(&self, timeout: impl Into<Timeout>) -> Result<bool, LockError> {
        let timeout = timeout.into();
        let deadline = timeout.deadline();
        let id = thread_id::current();
        let mut book = self.book.lock();

        {
            let book = &mut *book;

            if !self.reentrant() {
                if id == book.writer {
                    return Err(Recursion::ReadAfterWrite.into());
                }

                let entry = book.table.entry(id);

                if entry.readers > 0 {
                    return Err(Recursion::RecursiveRead.into());
                }

                // The upgrader is already inside, it does not compete for admission.
                if id == book.upgrader {
                    entry.readers += 1;
                    self.state.add_reader();
                    return Ok(true);
                }
            } else {
                let entry = book.table.entry(id);

                if entry.readers > 0 {
                    entry.readers += 1;
                    return Ok(true);
                }

                if id == book.upgrader {
                    entry.readers += 1;
                    self.state.add_reader();
                    book.upgrader_holds_read = true;
                    return Ok(true);
                }

                if id == book.writer {
                    entry.readers += 1;
                    self.state.add_reader();
                    return Ok(true);
                }
            }
        }

        let mut spin = SpinWait::acquisition();

        loop {
            if self.state.admits_reader() {
                self.state.add_reader();
                book.table.entry(id).readers += 1;
                return Ok(true);
            }

            book = match self.contend(book, Queue::Read, timeout, deadline, &mut spin) {
                Some(book) => book,
                None => return Ok(false),
            };
        }
    }

    /// Acquires the write slot, waiting at most `timeout`.
    ///
    /// The holder of the upgradeable read slot may call this to upgrade; it
    /// is admitted as soon as it is the only reader left.
    pub fn try_enter_write(&self, timeout: impl Into<Timeout>) -> Result<bool, LockError> {
        let timeout = timeout.into();
        let deadline = timeout.deadline();
        let id = thread_id::current();
        let mut book = self.book.lock();
        let upgrading;

        {
            let book = &mut *book;

            if !self.reentrant() {
                if id == book.writer {
                    return Err(Recursion::RecursiveWrite.into());
                }

                upgrading = id == book.upgrader;

                if book.table.get(id).map_or(false, |entry| entry.readers > 0) {
                    return Err(Recursion::WriteAfterRead.into());
                }
            } else {
                let entry = book.table.entry(id);

                if id == book.writer {
                    entry.counts_mut().writer += 1;
                    return Ok(true);
                }

                upgrading = id == book.upgrader;

                // Waiting for our own read to go away would never end.
                if !upgrading && entry.readers > 0 {
                    return Err(Recursion::WriteAfterRead.into());
                }
            }
        }

        let queue = if upgrading {
            Queue::WriteUpgrade
        } else {
            Queue::Write
        };
        let mut spin = SpinWait::acquisition();

        loop {
            if self.state.admits_writer() || (upgrading && self.admits_upgrade(&book, id)) {
                self.state.set_writer_held();
                break;
            }

            book = match self.contend(book, queue, timeout, deadline, &mut spin) {
                Some(book) => book,
                None => return Ok(false),
            };
        }

        if self.reentrant() {
            book.table.entry(id).counts_mut().writer += 1;
        }

        book.writer = id;
        Ok(true)
    }

    /// The upgrader may write once the only readers left are its own.
    fn admits_upgrade(&self, book: &Bookkeeping, id: usize) -> bool {
        match self.state.reader_count() {
            1 => true,
            2 => book.table.get(id).map_or(false, |entry| entry.readers > 0),
            _ => false,
        }
    }

    /// Acquires the upgradeable read slot, waiting at most `timeout`.
    pub fn try_enter_upgradeable_read(
        &self,
        timeout: impl Into<Timeout>,
    ) -> Result<bool, LockError> {
        let timeout = timeout.into();
        let deadline = timeout.deadline();
        let id = thread_id::current();
        let mut book = self.book.lock();

        {
            let book = &mut *book;

            if !self.reentrant() {
                if id == book.upgrader {
                    return Err(Recursion::RecursiveUpgrade.into());
                }

                if id == book.writer {
                    return Err(Recursion::UpgradeAfterWrite.into());
                }

                if book.table.get(id).map_or(false, |entry| entry.readers > 0) {
                    return Err(Recursion::UpgradeAfterRead.into());
                }
            } else {
                let entry = book.table.entry(id);

                if id == book.upgrader {
                    entry.counts_mut().upgrade += 1;
                    return Ok(true);
                }

                if id == book.writer {
                    self.state.add_reader();
                    entry.counts_mut().upgrade += 1;
                    if entry.readers > 0 {
                        book.upgrader_holds_read = true;
                    }
                    book.upgrader = id;
                    return Ok(true);
                }

                if entry.readers > 0 {
                    return Err(Recursion::UpgradeAfterRead.into());
                }
            }
        }

        let mut spin = SpinWait::acquisition();

        loop {
            if book.upgrader == NO_THREAD && self.state.admits_reader() {
                self.state.add_reader();
                book.upgrader = id;
                break;
            }

            book = match self.contend(book, Queue::Upgrade, timeout, deadline, &mut spin) {
                Some(book) => book,
                None => return Ok(false),
            };
        }

        if self.reentrant() {
            book.table.entry(id).counts_mut().upgrade += 1;
        }

        Ok(true)
    }

    /// One round of contention: back off while spins remain, then make sure
    /// the queue's event exists, then park on it.
    ///
    /// Returns the reacquired bookkeeping lock, or `None` once the caller has
    /// given up, in which case the lock has been released.
    fn contend<'a>(
        &'a self,
        book: SpinGuard<'a, Bookkeeping>,
        queue: Queue,
        timeout: Timeout,
        deadline: Option<Instant>,
        spin: &mut SpinWait,
    ) -> Option<SpinGuard<'a, Bookkeeping>> {
        if spin.count() < MAX_SPIN_COUNT {
            drop(book);

            if timeout.is_zero() || deadline.map_or(false, |d| Instant::now() >= d) {
                return None;
            }

            spin.snooze();
            if spin.count() == MAX_SPIN_COUNT {
                trace!(?queue, "spin exhausted");
            }

            return Some(self.book.lock());
        }

        if self.event(queue).get().is_none() {
            return Some(self.create_event(book, queue));
        }

        self.wait_on_event(book, queue, deadline)
    }

    /// Creates the event outside the bookkeeping lock and installs it unless
    /// another thread got there first.
    fn create_event<'a>(
        &'a self,
        book: SpinGuard<'a, Bookkeeping>,
        queue: Queue,
    ) -> SpinGuard<'a, Bookkeeping> {
        drop(book);
        let event = Event::new(queue.reset_mode());
        let book = self.book.lock();

        if self.event(queue).set(event).is_ok() {
            trace!(?queue, "created wait event");
        }

        book
    }

    fn wait_on_event<'a>(
        &'a self,
        mut book: SpinGuard<'a, Bookkeeping>,
        queue: Queue,
        deadline: Option<Instant>,
    ) -> Option<SpinGuard<'a, Bookkeeping>> {
        let event = match self.event(queue).get() {
            Some(event) => event,
            None => return Some(self.create_event(book, queue)),
        };

        event.reset();
        *book.waiting.get_mut(queue) += 1;
        book.no_waiters = false;
        self.sync_waiting_flags(&book);
        drop(book);

        trace!(?queue, "parking");
        let signaled = event.wait(deadline);

        let mut book = self.book.lock();
        *book.waiting.get_mut(queue) -= 1;
        book.no_waiters = book.waiting.is_empty();
        self.sync_waiting_flags(&book);

        if signaled {
            return Some(book);
        }

        // A writer giving up may have been the only thing holding readers back.
        match queue {
            Queue::Write | Queue::WriteUpgrade => self.exit_and_wake(book),
            Queue::Read | Queue::Upgrade => drop(book),
        }

        trace!(?queue, "timed out");
        None
    }

    fn sync_waiting_flags(&self, book: &Bookkeeping) {
        if book.waiting.write > 0 {
            self.state.set_writers_waiting();
        } else {
            self.state.clear_writers_waiting();
        }

        if book.waiting.write_upgrade > 0 {
            self.state.set_upgrader_waiting();
        } else {
            self.state.clear_upgrader_waiting();
        }
    }

    /// Releases the bookkeeping lock and wakes whoever can make progress now.
    ///
    /// An upgrader waiting to write comes first, then a plain writer, then all
    /// readers together with at most one would-be upgrader.
    fn exit_and_wake(&self, book: SpinGuard<'_, Bookkeeping>) {
        if book.no_waiters {
            return;
        }

        let readers = self.state.reader_count();
        let waiting = &book.waiting;

        let upgrader_can_write = waiting.write_upgrade > 0
            && (readers == 1
                || (self.reentrant() && book.upgrader_holds_read && readers == 2));

        if upgrader_can_write {
            drop(book);
            self.signal(Queue::WriteUpgrade);
        } else if readers == 0 && waiting.write > 0 {
            drop(book);
            self.signal(Queue::Write);
        } else {
            let wake_readers = waiting.read > 0;
            let wake_upgrader = waiting.upgrade > 0 && book.upgrader == NO_THREAD;
            drop(book);

            if wake_readers {
                self.signal(Queue::Read);
            }

            if wake_upgrader {
                self.signal(Queue::Upgrade);
            }
        }
    }

    fn signal(&self, queue: Queue) {
        if let Some(event) = self.event(queue).get() {
            event.set();
        }
    }

    pub fn exit_read(&self) -> Result<(), LockError> {
        let id = thread_id::current();
        let mut book = self.book.lock();

        {
            let book = &mut *book;

            let entry = match book.table.get_mut(id) {
                Some(entry) if entry.readers > 0 => entry,
                _ => return Err(LockError::MismatchedRelease(Slot::Read)),
            };

            if self.reentrant() {
                if entry.readers > 1 {
                    entry.readers -= 1;
                    return Ok(());
                }

                if id == book.upgrader {
                    book.upgrader_holds_read = false;
                }
            }

            entry.readers -= 1;
        }

        self.state.remove_reader();
        self.exit_and_wake(book);
        Ok(())
    }

    pub fn exit_write(&self) -> Result<(), LockError> {
        let id = thread_id::current();
        let mut book = self.book.lock();

        {
            let book = &mut *book;

            if !self.reentrant() {
                if id != book.writer {
                    return Err(LockError::MismatchedRelease(Slot::Write));
                }
            } else {
                let counts = match book.table.get_mut(id) {
                    Some(entry) if entry.writer_count() > 0 => entry.counts_mut(),
                    _ => return Err(LockError::MismatchedRelease(Slot::Write)),
                };

                counts.writer -= 1;
                if counts.writer > 0 {
                    return Ok(());
                }
            }

            book.writer = NO_THREAD;
        }

        self.state.clear_writer_held();
        self.exit_and_wake(book);
        Ok(())
    }

    pub fn exit_upgradeable_read(&self) -> Result<(), LockError> {
        let id = thread_id::current();
        let mut book = self.book.lock();

        {
            let book = &mut *book;

            if !self.reentrant() {
                if id != book.upgrader {
                    return Err(LockError::MismatchedRelease(Slot::UpgradeableRead));
                }
            } else {
                let counts = match book.table.get_mut(id) {
                    Some(entry) if entry.upgrade_count() > 0 => entry.counts_mut(),
                    _ => return Err(LockError::MismatchedRelease(Slot::UpgradeableRead)),
                };

                counts.upgrade -= 1;
                if counts.upgrade > 0 {
                    return Ok(());
                }

                book.upgrader_holds_read = false;
            }

            book.upgrader = NO_THREAD;
        }

        self.state.remove_reader();
        self.exit_and_wake(book);
        Ok(())
    }

    /// Readers inside the lock, not counting the upgradeable read slot.
    pub fn current_read_count(&self) -> usize {
        let book = self.book.lock();
        let readers = self.state.reader_count() as usize;

        if book.upgrader != NO_THREAD {
            readers.saturating_sub(1)
        } else {
            readers
        }
    }

    pub fn recursive_read_count(&self) -> usize {
        let id = thread_id::current();
        let book = self.book.lock();
        book.table.get(id).map_or(0, |entry| entry.readers as usize)
    }

    pub fn recursive_write_count(&self) -> usize {
        let id = thread_id::current();
        let book = self.book.lock();

        if self.reentrant() {
            book.table.get(id).map_or(0, |entry| entry.writer_count() as usize)
        } else {
            usize::from(id == book.writer)
        }
    }

    pub fn recursive_upgrade_count(&self) -> usize {
        let id = thread_id::current();
        let book = self.book.lock();

        if self.reentrant() {
            book.table.get(id).map_or(0, |entry| entry.upgrade_count() as usize)
        } else {
            usize::from(id == book.upgrader)
        }
    }

    pub fn is_read_lock_held(&self) -> bool {
        self.recursive_read_count() > 0
    }

    pub fn is_write_lock_held(&self) -> bool {
        self.recursive_write_count() > 0
    }

    pub fn is_upgradeable_read_lock_held(&self) -> bool {
        self.recursive_upgrade_count() > 0
    }

    /// Whether the calling thread holds any slot of this lock.
    pub fn is_any_lock_held(&self) -> bool {
        self.is_read_lock_held() || self.is_write_lock_held() || self.is_upgradeable_read_lock_held()
    }

    pub fn waiting_read_count(&self) -> usize {
        self.book.lock().waiting.read as usize
    }

    pub fn waiting_write_count(&self) -> usize {
        self.book.lock().waiting.write as usize
    }

    pub fn waiting_upgrade_count(&self) -> usize {
        self.book.lock().waiting.upgrade as usize
    }

    /// At most one: only the upgrader can wait to become the writer.
    pub fn waiting_write_upgrade_count(&self) -> usize {
        self.book.lock().waiting.write_upgrade as usize
    }

    /// Whether any thread holds any slot.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    #[inline]
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.is_writer_held()
    }

    pub fn stats(&self) -> LockStats {
        let book = self.book.lock();
        let readers = self.state.reader_count() as usize;
        let upgradeable_read_held = book.upgrader != NO_THREAD;

        LockStats {
            current_read_count: readers - usize::from(upgradeable_read_held && readers > 0),
            write_held: self.state.is_writer_held(),
            upgradeable_read_held,
            waiting_read_count: book.waiting.read as usize,
            waiting_write_count: book.waiting.write as usize,
            waiting_upgrade_count: book.waiting.upgrade as usize,
            waiting_write_upgrade_count: book.waiting.write_upgrade as usize,
        }
    }
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new(RecursionPolicy::default())
    }
}

impl fmt::Debug for RawRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRwLock")
            .field("policy", &self.policy)
            .field("readers", &self.state.reader_count())
            .field("writer_held", &self.state.is_writer_held())
            .finish()
    }
}

impl Drop for RawRwLock {
    fn drop(&mut self) {
        let created = [
            self.read_event.take(),
            self.write_event.take(),
            self.upgrade_event.take(),
            self.write_upgrade_event.take(),
        ]
        .into_iter()
        .flatten()
        .count();

        if created > 0 {
            debug!(created, "released wait events");
        }
    }
}
