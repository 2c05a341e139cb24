//! The packed owner word.
//!
//! The low 28 bits count the readers currently inside the lock (the upgrader
//! counts as one of them). The top three bits are sticky flags. Because the
//! flags live above [`MAX_READER`], comparing the whole word against it
//! answers "may a fresh reader enter" in one go: a held writer or any waiting
//! writer pushes the word past the sentinel.
//!
//! Every mutation happens with the bookkeeping spinlock held. The word is
//! still atomic so that `is_locked` style queries can peek without it.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const READER_MASK: u32 = 0x0FFF_FFFF;
pub(crate) const MAX_READER: u32 = 0x0FFF_FFFE;

const UPGRADER_WAITING: u32 = 1 << 29;
const WRITERS_WAITING: u32 = 1 << 30;
const WRITER_HELD: u32 = 1 << 31;

pub(crate) struct LockState {
    word: CachePadded<AtomicU32>,
}

impl LockState {
    pub const fn new() -> Self {
        Self {
            word: CachePadded::new(AtomicU32::new(0)),
        }
    }

    #[inline]
    pub fn word(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reader_count(&self) -> u32 {
        self.word() & READER_MASK
    }

    /// A fresh reader (or upgrader) may only enter while no flag is set and
    /// the count is below the sentinel.
    #[inline]
    pub fn admits_reader(&self) -> bool {
        self.word() < MAX_READER
    }

    /// Writers ignore the writers-waiting bit since they are the ones who set it.
    /// A waiting upgrader still keeps them out.
    #[inline]
    pub fn admits_writer(&self) -> bool {
        self.word() & !WRITERS_WAITING == 0
    }

    #[inline]
    pub fn is_writer_held(&self) -> bool {
        self.word() & WRITER_HELD != 0
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word() & (READER_MASK | WRITER_HELD) != 0
    }

    pub fn add_reader(&self) {
        let prev = self.word.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev & READER_MASK < READER_MASK);
    }

    pub fn remove_reader(&self) {
        let prev = self.word.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev & READER_MASK != 0);
    }

    pub fn set_writer_held(&self) {
        self.word.fetch_or(WRITER_HELD, Ordering::Relaxed);
    }

    pub fn clear_writer_held(&self) {
        self.word.fetch_and(!WRITER_HELD, Ordering::Relaxed);
    }

    pub fn set_writers_waiting(&self) {
        self.word.fetch_or(WRITERS_WAITING, Ordering::Relaxed);
    }

    pub fn clear_writers_waiting(&self) {
        self.word.fetch_and(!WRITERS_WAITING, Ordering::Relaxed);
    }

    pub fn set_upgrader_waiting(&self) {
        self.word.fetch_or(UPGRADER_WAITING, Ordering::Relaxed);
    }

    pub fn clear_upgrader_waiting(&self) {
        self.word.fetch_and(!UPGRADER_WAITING, Ordering::Relaxed);
    }
}
