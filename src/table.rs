//! Per-thread recursion bookkeeping.
//!
//! The table is an arena: the first [`BUCKETS`] slots are bucket heads indexed
//! by the low byte of the thread id, later slots are overflow entries chained
//! off a head through `next`. Entries are never removed. Once all of an
//! entry's counts drop to zero it is considered vacant and the next thread
//! hashing into the same chain may claim it.
//!
//! The table must only be touched with the bookkeeping spinlock held.

use crate::thread_id::NO_THREAD;

const BUCKETS: usize = 256;
const BUCKET_MASK: usize = BUCKETS - 1;

/// Counts that only exist on reentrant locks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecursiveCounts {
    pub writer: u32,
    pub upgrade: u32,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub thread: usize,
    pub readers: u32,
    recursive: Option<RecursiveCounts>,
    next: Option<usize>,
}

impl Entry {
    fn vacant(reentrant: bool) -> Self {
        Self {
            thread: NO_THREAD,
            readers: 0,
            recursive: reentrant.then(RecursiveCounts::default),
            next: None,
        }
    }

    fn is_vacant(&self) -> bool {
        self.thread == NO_THREAD
            || (self.readers == 0
                && self
                    .recursive
                    .map_or(true, |rc| rc.writer == 0 && rc.upgrade == 0))
    }

    fn claim(&mut self, thread: usize) {
        self.thread = thread;
        self.readers = 0;
        if let Some(rc) = &mut self.recursive {
            *rc = RecursiveCounts::default();
        }
    }

    pub fn writer_count(&self) -> u32 {
        self.recursive.map_or(0, |rc| rc.writer)
    }

    pub fn upgrade_count(&self) -> u32 {
        self.recursive.map_or(0, |rc| rc.upgrade)
    }

    pub fn counts_mut(&mut self) -> &mut RecursiveCounts {
        self.recursive.get_or_insert_with(RecursiveCounts::default)
    }
}

pub(crate) struct RecursionTable {
    entries: Vec<Entry>,
    reentrant: bool,
}

impl RecursionTable {
    /// Bucket heads are allocated on first insert so that this stays `const`.
    pub const fn new(reentrant: bool) -> Self {
        Self {
            entries: Vec::new(),
            reentrant,
        }
    }

    /// Walks the chain for `thread`. On a miss, reports the first vacant entry
    /// seen along the way.
    fn locate(&self, thread: usize) -> Result<usize, Option<usize>> {
        let mut vacant = None;
        let mut cursor = Some(thread & BUCKET_MASK);

        while let Some(index) = cursor {
            let entry = &self.entries[index];

            if entry.thread == thread {
                return Ok(index);
            }

            if vacant.is_none() && entry.is_vacant() {
                vacant = Some(index);
            }

            cursor = entry.next;
        }

        Err(vacant)
    }

    pub fn get(&self, thread: usize) -> Option<&Entry> {
        if self.entries.is_empty() {
            return None;
        }

        self.locate(thread).ok().map(|index| &self.entries[index])
    }

    pub fn get_mut(&mut self, thread: usize) -> Option<&mut Entry> {
        if self.entries.is_empty() {
            return None;
        }

        match self.locate(thread) {
            Ok(index) => Some(&mut self.entries[index]),
            Err(_) => None,
        }
    }

    /// Finds the entry for `thread`, claiming a vacant one or chaining a new
    /// one onto its bucket if it has none yet.
    pub fn entry(&mut self, thread: usize) -> &mut Entry {
        if self.entries.is_empty() {
            let reentrant = self.reentrant;
            self.entries
                .extend((0..BUCKETS).map(|_| Entry::vacant(reentrant)));
        }

        let index = match self.locate(thread) {
            Ok(index) => index,
            Err(Some(index)) => {
                self.entries[index].claim(thread);
                index
            }
            Err(None) => {
                let head = thread & BUCKET_MASK;
                let index = self.entries.len();
                let mut entry = Entry::vacant(self.reentrant);
                entry.thread = thread;
                entry.next = self.entries[head].next;
                self.entries.push(entry);
                self.entries[head].next = Some(index);
                index
            }
        };

        &mut self.entries[index]
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
