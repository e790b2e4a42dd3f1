//! Phase 1: the point-consistency scan.
//!
//! A single forward merge over every source's point stream, driven by the
//! [`MergeHeap`]. Each visible point at the heap root is validated before
//! its source advances:
//!
//! - same-key records must arrive at non-decreasing authority indices (the
//!   heap yields them in decreasing seqnum order, so a decrease means the
//!   level invariant is inverted);
//! - runs of MERGE records are folded through the store's merge operator
//!   and must finalize cleanly;
//! - no tombstone at a *less* authoritative source may still cover the
//!   point at the snapshot.
//!
//! The scan also enforces that every source yields strictly increasing
//! internal keys, and it repositions every source's tombstone cursor to the
//! new heap root after each advance. It never seeks points ahead — skipping
//! could miss violations.

use std::cmp::Ordering;

use base::{internal_cmp, Comparator, InternalKey, Kind, MergeFold, MergeOperator, PointIter};
use keyspan::{Span, SpanIter};

use crate::error::CheckError;
use crate::heap::{HeapItem, MergeHeap};
use crate::source::{Provenance, Source};

/// Per-source scan state: the streams plus the currently positioned
/// tombstone (the first one whose end is past the heap root).
struct SourceSlot {
    authority: usize,
    provenance: Provenance,
    points: Option<Box<dyn PointIter>>,
    spans: Option<Box<dyn SpanIter>>,
    tombstone: Option<Span>,
}

/// The phase-1 scan. Built from the snapshot's opened sources, run to
/// completion once, then discarded. Dropping it closes every stream it
/// still owns.
pub(crate) struct PointScan<'a> {
    cmp: &'a dyn Comparator,
    merge: &'a dyn MergeOperator,
    snapshot: u64,
    slots: Vec<SourceSlot>,
    heap: MergeHeap,
    /// Key, authority, and origin of the last validated point.
    last_key: Option<InternalKey>,
    last_authority: usize,
    /// Kept as a rendered string: the stream that produced the previous
    /// record may already be closed when we need to name it.
    last_origin: String,
    /// Non-`None` while a run of MERGE records is being folded.
    fold: Option<Box<dyn MergeFold>>,
    num_points: u64,
}

impl<'a> PointScan<'a> {
    pub fn new(
        cmp: &'a dyn Comparator,
        merge: &'a dyn MergeOperator,
        snapshot: u64,
        sources: Vec<Source>,
    ) -> Result<Self, CheckError> {
        let mut slots = Vec::with_capacity(sources.len());
        let mut heap = MergeHeap::with_capacity(sources.len());

        for source in sources {
            let Source {
                authority,
                provenance,
                mut points,
                spans,
            } = source;

            let slot_idx = slots.len();
            let mut seeded = false;
            if let Some(iter) = points.as_mut() {
                let first = iter.next().map_err(|e| CheckError::Stream {
                    origin: provenance.to_string(),
                    source: e,
                })?;
                if let Some(entry) = first {
                    heap.push_unordered(HeapItem {
                        slot: slot_idx,
                        key: entry.key,
                        value: entry.value,
                    });
                    seeded = true;
                }
            }
            if !seeded {
                // Exhausted (or absent) point stream; the span stream still
                // participates in masking checks and phase 2.
                points = None;
            }

            slots.push(SourceSlot {
                authority,
                provenance,
                points,
                spans,
                tombstone: None,
            });
        }

        heap.init(cmp);

        let mut scan = Self {
            cmp,
            merge,
            snapshot,
            slots,
            heap,
            last_key: None,
            last_authority: 0,
            last_origin: String::new(),
            fold: None,
            num_points: 0,
        };
        if !scan.heap.is_empty() {
            scan.position_tombstones()?;
        }
        Ok(scan)
    }

    /// Runs the scan to completion and returns the number of visible points
    /// validated.
    pub fn run(mut self) -> Result<u64, CheckError> {
        while self.step()? {}
        Ok(self.num_points)
    }

    /// One step: validate the heap root if visible, advance its source,
    /// re-sift, reposition tombstone cursors. Returns false when done.
    fn step(&mut self) -> Result<bool, CheckError> {
        if self.heap.is_empty() {
            return Ok(false);
        }
        let slot_idx = self.heap.root().slot;
        let key = self.heap.root().key.clone();

        // visible_at is false for sentinels, which are boundaries, not data.
        if key.visible_at(self.snapshot) {
            self.handle_visible_point(slot_idx, &key)?;
        }

        // Remember this record's origin before advancing: the stream may be
        // closed below, and a later record may still need to name it.
        self.last_origin = self.slots[slot_idx].provenance.to_string();

        let next = match self.slots[slot_idx].points.as_mut() {
            Some(iter) => match iter.next() {
                Ok(next) => next,
                Err(e) => {
                    return Err(CheckError::Stream {
                        origin: self.last_origin.clone(),
                        source: e,
                    })
                }
            },
            None => None,
        };
        match next {
            None => {
                // Stream exhausted: close it and drop the heap slot.
                self.slots[slot_idx].points = None;
                self.heap.pop_root(self.cmp);
            }
            Some(entry) => {
                // Each source must yield strictly increasing internal keys.
                // Sentinels are synthetic bounds and exempt.
                if !entry.key.is_exclusive_sentinel()
                    && internal_cmp(self.cmp, &key, &entry.key) != Ordering::Less
                {
                    return Err(CheckError::OutOfOrderKeys {
                        prev: key.pretty(self.cmp),
                        next: entry.key.pretty(self.cmp),
                        origin: self.last_origin.clone(),
                    });
                }
                let root = self.heap.root_mut();
                root.key = entry.key;
                root.value = entry.value;
                if self.heap.len() > 1 {
                    self.heap.fix_root(self.cmp);
                }
            }
        }

        if self.heap.is_empty() {
            // The very last record was part of a MERGE run.
            if let Some(fold) = self.fold.take() {
                fold.finish()
                    .map_err(|e| merge_err(self.cmp, &key, &self.last_origin, e))?;
            }
            return Ok(false);
        }

        self.position_tombstones()?;
        Ok(true)
    }

    /// Validates the visible point currently at the heap root. Inspects
    /// only; the caller advances the source afterwards.
    fn handle_visible_point(
        &mut self,
        slot_idx: usize,
        key: &InternalKey,
    ) -> Result<(), CheckError> {
        self.num_points += 1;
        let authority = self.slots[slot_idx].authority;
        let origin = self.slots[slot_idx].provenance.to_string();

        let key_changed = match &self.last_key {
            Some(last) => self.cmp.compare(&last.user_key, &key.user_key) != Ordering::Equal,
            None => true,
        };

        if key_changed {
            // A still-open fold belongs to the previous user key; key change
            // closes it implicitly.
            if let Some(fold) = self.fold.take() {
                let chain_key = self
                    .last_key
                    .as_ref()
                    .map(|k| k.pretty(self.cmp))
                    .unwrap_or_default();
                fold.finish().map_err(|e| CheckError::Merge {
                    key: chain_key,
                    origin: self.last_origin.clone(),
                    source: e,
                })?;
            }
            self.last_key = Some(key.clone());
            self.last_authority = authority;
        } else {
            // Same user key: the heap yields versions newest-first, so the
            // authority index must not decrease.
            if self.last_authority > authority {
                let last = match &self.last_key {
                    Some(last) => last.pretty(self.cmp),
                    None => String::new(),
                };
                return Err(CheckError::PointInversion {
                    key: key.pretty(self.cmp),
                    origin,
                    prev_key: last,
                    prev_origin: self.last_origin.clone(),
                });
            }
            self.last_authority = authority;
        }

        let value = self
            .heap
            .root()
            .value
            .read()
            .map_err(|e| CheckError::Value {
                key: key.pretty(self.cmp),
                origin: origin.clone(),
                source: e,
            })?;

        let cmp = self.cmp;
        if self.fold.is_some() {
            match key.kind {
                Kind::Delete | Kind::SingleDelete | Kind::DeleteSized => {
                    // A deletion terminates the run; the folded value is
                    // discarded but must still finalize cleanly.
                    if let Some(fold) = self.fold.take() {
                        fold.finish().map_err(|e| merge_err(cmp, key, &origin, e))?;
                    }
                }
                Kind::Set | Kind::SetWithDelete => {
                    // The run bottoms out on a base value.
                    if let Some(mut fold) = self.fold.take() {
                        fold.fold_older(&value)
                            .map_err(|e| merge_err(cmp, key, &origin, e))?;
                        fold.finish().map_err(|e| merge_err(cmp, key, &origin, e))?;
                    }
                }
                Kind::Merge => {
                    if let Some(fold) = self.fold.as_mut() {
                        fold.fold_older(&value)
                            .map_err(|e| merge_err(cmp, key, &origin, e))?;
                    }
                }
                Kind::ExclusiveSentinel => {
                    return Err(CheckError::InvalidKind {
                        key: key.pretty(cmp),
                        origin,
                    });
                }
            }
        } else if key.kind == Kind::Merge {
            self.fold = Some(
                self.merge
                    .begin(&key.user_key, &value)
                    .map_err(|e| merge_err(cmp, key, &origin, e))?,
            );
        }

        // Masking: no tombstone at a less authoritative source may still
        // cover this point. Every cursor is positioned at or past this key.
        for slot in &self.slots {
            if slot.authority <= authority {
                continue;
            }
            let Some(t) = &slot.tombstone else { continue };
            if t.is_empty() {
                continue;
            }
            if t.contains(self.cmp, &key.user_key) && t.covers_at(self.snapshot, key.seq) {
                return Err(CheckError::MaskedPoint {
                    span: t.pretty(self.cmp),
                    span_origin: slot.provenance.to_string(),
                    key: key.pretty(self.cmp),
                    key_origin: origin,
                });
            }
        }

        Ok(())
    }

    /// Seeks every source's tombstone cursor to the first span ending past
    /// the current heap root.
    fn position_tombstones(&mut self) -> Result<(), CheckError> {
        let root_key = self.heap.root().key.user_key.clone();
        for slot in self.slots.iter_mut() {
            let Some(spans) = slot.spans.as_mut() else {
                continue;
            };
            match spans.seek_ge(&root_key) {
                Ok(t) => slot.tombstone = t,
                Err(e) => {
                    return Err(CheckError::Stream {
                        origin: slot.provenance.to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }
}

fn merge_err(
    cmp: &dyn Comparator,
    key: &InternalKey,
    origin: &str,
    source: anyhow::Error,
) -> CheckError {
    CheckError::Merge {
        key: key.pretty(cmp),
        origin: origin.to_string(),
        source,
    }
}
