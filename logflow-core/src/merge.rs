//! Reference sorted-merge of log batches.
//!
//! Both inputs are sequence-ordered. The output is sequence-ordered, and a
//! sequence present in both inputs resolves to the `incoming` version: the
//! newer copy is treated as an authoritative update of the stored one.
//!
//! ```text
//!   existing: 1 2 4 5
//!   incoming:   2'  3   6
//!   merged:   1 2' 3 4 5 6
//! ```
//!
//! Two-pointer walk, O(existing + incoming). Ordering and tie-breaks use the
//! sequence number only.

use std::cmp::Ordering;

use crate::entry::LogEntry;

/// Merge two sequence-ordered lists; duplicates resolve to `incoming`.
pub fn merge_insert(existing: &[LogEntry], incoming: &[LogEntry]) -> Vec<LogEntry> {
    if incoming.is_empty() {
        return existing.to_vec();
    }
    if existing.is_empty() {
        return incoming.to_vec();
    }

    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let (mut i, mut j) = (0, 0);

    while i < existing.len() && j < incoming.len() {
        match existing[i].sequence().cmp(&incoming[j].sequence()) {
            Ordering::Less => {
                merged.push(existing[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                merged.push(incoming[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                merged.push(incoming[j].clone());
                i += 1;
                j += 1;
            }
        }
    }

    merged.extend_from_slice(&existing[i..]);
    merged.extend_from_slice(&incoming[j..]);
    merged
}

/// True when sequences strictly increase.
pub fn is_strictly_ordered(entries: &[LogEntry]) -> bool {
    entries
        .windows(2)
        .all(|pair| pair[0].sequence() < pair[1].sequence())
}

/// Bring an arbitrary batch into merge-ready shape.
///
/// Stable-sorts by sequence, then collapses repeated sequences to the
/// *last* occurrence so later updates within one batch win.
pub fn normalize_batch(mut batch: Vec<LogEntry>) -> Vec<LogEntry> {
    if is_strictly_ordered(&batch) {
        return batch;
    }

    batch.sort_by_key(LogEntry::sequence);
    let mut out: Vec<LogEntry> = Vec::with_capacity(batch.len());
    for entry in batch {
        match out.last_mut() {
            Some(last) if last.sequence() == entry.sequence() => *last = entry,
            _ => out.push(entry),
        }
    }
    out
}
