//! Fixed-capacity ring buffer holding the most recent log entries.
//!
//! ```text
//!   capacity = 5, after pushing seq 1..=7
//!
//!   slots:  [ 6 | 7 | 3 | 4 | 5 ]
//!                     ▲
//!                    head (oldest)
//!
//!   get_all() → 3, 4, 5, 6, 7
//! ```
//!
//! The store never reorders or de-duplicates. Callers hand it entries that
//! are already sequence-ordered (the merge engine's output), and the store
//! only decides which ones still fit.

use crate::entry::LogEntry;

/// Bounded FIFO store of log entries.
pub struct RingLogStore {
    slots: Vec<Option<LogEntry>>,
    /// Physical index of the oldest entry.
    head: usize,
    len: usize,
    /// Entries evicted since creation.
    total_evicted: u64,
}

impl RingLogStore {
    /// Create an empty store. A capacity of 0 is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }

    /// Append one entry, evicting the single oldest entry when full.
    pub fn push(&mut self, entry: LogEntry) -> Option<LogEntry> {
        let cap = self.capacity();
        if self.len == cap {
            let evicted = self.slots[self.head].replace(entry);
            self.head = (self.head + 1) % cap;
            self.total_evicted += 1;
            evicted
        } else {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(entry);
            self.len += 1;
            None
        }
    }

    /// Iterate oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    /// Copy of all entries, oldest → newest.
    pub fn get_all(&self) -> Vec<LogEntry> {
        self.iter().cloned().collect()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.iter().next().map(LogEntry::sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.slots[idx].as_ref().map(LogEntry::sequence)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Move every entry out (oldest → newest), leaving the store empty.
    pub fn take_all(&mut self) -> Vec<LogEntry> {
        let cap = self.capacity();
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(entry) = self.slots[(self.head + i) % cap].take() {
                out.push(entry);
            }
        }
        self.head = 0;
        self.len = 0;
        out
    }

    /// Replace the contents with an already-sorted list, keeping its newest
    /// `capacity` entries. Returns how many were dropped from the front.
    pub fn replace_with(&mut self, sorted: Vec<LogEntry>) -> usize {
        self.clear();
        let dropped = sorted.len().saturating_sub(self.capacity());
        for entry in sorted.into_iter().skip(dropped) {
            self.slots[self.len] = Some(entry);
            self.len += 1;
        }
        self.total_evicted += dropped as u64;
        dropped
    }

    /// Change the capacity, trimming the oldest entries if shrinking.
    /// Returns how many entries were dropped.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        let entries = self.take_all();
        self.slots = (0..capacity.max(1)).map(|_| None).collect();
        self.replace_with(entries)
    }
}
