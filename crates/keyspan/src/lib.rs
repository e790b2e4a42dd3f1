//! # Keyspan — Range Tombstones
//!
//! A [`Span`] is a half-open user-key range `[start, end)` stamped with one
//! or more deletion sequence numbers. On-disk tombstone blocks are required
//! to arrive already fragmented (sorted by start, mutually non-overlapping
//! within one file); the checker re-fragments spans from *different* sources
//! against each other before comparing them.
//!
//! Spans from a pinned snapshot are first truncated to the snapshot's
//! visible sequence number via [`Span::visible`] — stamps newer than the
//! snapshot did not happen yet from the reader's point of view.

use anyhow::Result;
use base::Comparator;
use std::cmp::Ordering;

/// A range deletion: `[start, end)` plus deletion stamps, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    /// Deletion sequence numbers, held sorted descending.
    seqnums: Vec<u64>,
}

impl Span {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, mut seqnums: Vec<u64>) -> Self {
        seqnums.sort_unstable_by(|a, b| b.cmp(a));
        Self {
            start: start.into(),
            end: end.into(),
            seqnums,
        }
    }

    /// The deletion stamps, newest first.
    pub fn seqnums(&self) -> &[u64] {
        &self.seqnums
    }

    /// A span with no surviving stamps deletes nothing.
    pub fn is_empty(&self) -> bool {
        self.seqnums.is_empty()
    }

    /// Truncates to the stamps visible at `snapshot`. The result may be
    /// empty; bounds are unchanged.
    pub fn visible(&self, snapshot: u64) -> Span {
        Span {
            start: self.start.clone(),
            end: self.end.clone(),
            seqnums: self
                .seqnums
                .iter()
                .copied()
                .filter(|&s| s <= snapshot)
                .collect(),
        }
    }

    /// True if `key` falls inside `[start, end)` under `cmp`.
    pub fn contains(&self, cmp: &dyn Comparator, key: &[u8]) -> bool {
        cmp.compare(&self.start, key) != Ordering::Greater
            && cmp.compare(key, &self.end) == Ordering::Less
    }

    /// True if some stamp on this span both happened (is visible at
    /// `snapshot`) and is newer than `seq` — i.e. the span deletes a record
    /// written at `seq`.
    pub fn covers_at(&self, snapshot: u64, seq: u64) -> bool {
        self.seqnums.iter().any(|&s| s <= snapshot && s > seq)
    }

    /// The newest stamp, or 0 for an empty span.
    pub fn largest_seqnum(&self) -> u64 {
        self.seqnums.first().copied().unwrap_or(0)
    }

    /// Diagnostic rendering: `[start,end)#s1,s2,...`.
    pub fn pretty(&self, cmp: &dyn Comparator) -> String {
        let stamps = self
            .seqnums
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "[{},{})#{}",
            cmp.format_key(&self.start),
            cmp.format_key(&self.end),
            stamps
        )
    }
}

/// A forward-only stream of spans from one storage source, sorted by start.
///
/// Seeking is monotonic: once the stream has advanced past a key it is never
/// rewound, matching how the point scan consumes it (the scan's current key
/// only moves forward).
pub trait SpanIter {
    /// Positions at and returns the first span whose `end > key`, or
    /// `Ok(None)` if no such span remains. Does not consume the span: a
    /// later seek with the same or a smaller key returns it again.
    fn seek_ge(&mut self, key: &[u8]) -> Result<Option<Span>>;

    /// Returns the span at the current position and advances past it, or
    /// `Ok(None)` once exhausted.
    fn next(&mut self) -> Result<Option<Span>>;
}

/// In-memory span stream over a pre-sorted span list, used by write-buffer
/// adapters and tests.
pub struct VecSpanIter {
    cmp: &'static dyn Comparator,
    spans: Vec<Span>,
    /// Index of the current span. Never decreases.
    pos: usize,
}

impl VecSpanIter {
    pub fn new(cmp: &'static dyn Comparator, spans: Vec<Span>) -> Self {
        Self { cmp, spans, pos: 0 }
    }
}

impl SpanIter for VecSpanIter {
    fn seek_ge(&mut self, key: &[u8]) -> Result<Option<Span>> {
        while self.pos < self.spans.len()
            && self.cmp.compare(&self.spans[self.pos].end, key) != Ordering::Greater
        {
            self.pos += 1;
        }
        Ok(self.spans.get(self.pos).cloned())
    }

    fn next(&mut self) -> Result<Option<Span>> {
        let span = self.spans.get(self.pos).cloned();
        self.pos += 1;
        Ok(span)
    }
}
