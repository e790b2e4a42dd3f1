//! Phase 2: mutual consistency of range tombstones.
//!
//! Tombstone inversions are non-trivial to spot directly: `[a,c)#8` at a
//! more authoritative source and `[b,c)#10` below it overlap without sharing
//! a start key, so neither containment test catches the pair. Fragmenting
//! every collected tombstone at the global set of start/end boundaries fixes
//! that: wherever two tombstones from different sources overlapped, their
//! fragments now have byte-identical bounds and compare directly.
//!
//! Pipeline: collect (per-source truncation + order check) → fragment at the
//! shared boundary set → sort by (start ASC, seqnum DESC) and sweep for
//! authority inversions. Everything is held in memory; this is a diagnostic
//! batch step, not the live read path.

use std::cmp::Ordering;

use base::Comparator;
use keyspan::{Span, SpanIter};

use crate::error::CheckError;
use crate::source::{Provenance, Source};

/// A collected tombstone tagged with where it came from.
#[derive(Debug, Clone)]
pub(crate) struct TombstoneWithOrigin {
    pub span: Span,
    pub authority: usize,
    pub provenance: Provenance,
}

/// Runs the whole phase: collect from every source in authority order,
/// fragment, cross-check. Returns the number of post-fragmentation
/// tombstones.
pub(crate) fn check_tombstones(
    cmp: &dyn Comparator,
    snapshot: u64,
    sources: Vec<Source>,
) -> Result<usize, CheckError> {
    let mut tombstones = Vec::new();
    for mut source in sources {
        let Some(mut spans) = source.spans.take() else {
            continue;
        };
        collect_from_source(
            cmp,
            snapshot,
            spans.as_mut(),
            source.authority,
            &source.provenance,
            &mut tombstones,
        )?;
    }

    let boundaries = collect_boundaries(cmp, &tombstones);
    let mut fragments = fragment_at_boundaries(cmp, tombstones, &boundaries);
    let num_fragments = fragments.len();
    check_fragment_order(cmp, &mut fragments)?;
    Ok(num_fragments)
}

/// Drains one source's span stream: truncate each span to the snapshot,
/// drop empties, and require the survivors to emerge sorted and
/// non-overlapping — on-disk tombstone blocks are already fragmented, and
/// buffers are held to the same contract.
fn collect_from_source(
    cmp: &dyn Comparator,
    snapshot: u64,
    spans: &mut dyn SpanIter,
    authority: usize,
    provenance: &Provenance,
    out: &mut Vec<TombstoneWithOrigin>,
) -> Result<(), CheckError> {
    let mut prev: Option<Span> = None;
    loop {
        let span = match spans.next() {
            Ok(Some(span)) => span,
            Ok(None) => return Ok(()),
            Err(e) => {
                return Err(CheckError::Stream {
                    origin: provenance.to_string(),
                    source: e,
                })
            }
        };
        let t = span.visible(snapshot);
        if t.is_empty() {
            continue;
        }
        if let Some(p) = &prev {
            if cmp.compare(&p.end, &t.start) == Ordering::Greater {
                return Err(CheckError::UnfragmentedTombstones {
                    prev: p.pretty(cmp),
                    next: t.pretty(cmp),
                    origin: provenance.to_string(),
                });
            }
        }
        prev = Some(t.clone());
        out.push(TombstoneWithOrigin {
            span: t,
            authority,
            provenance: provenance.clone(),
        });
    }
}

/// The sorted, deduplicated set of every start/end key across all collected
/// tombstones.
pub(crate) fn collect_boundaries(
    cmp: &dyn Comparator,
    tombstones: &[TombstoneWithOrigin],
) -> Vec<Vec<u8>> {
    let mut keys = Vec::with_capacity(tombstones.len() * 2);
    for t in tombstones {
        keys.push(t.span.start.clone());
        keys.push(t.span.end.clone());
    }
    keys.sort_by(|a, b| cmp.compare(a, b));
    keys.dedup_by(|a, b| cmp.compare(a, b) == Ordering::Equal);
    keys
}

/// Splits each tombstone at every boundary strictly inside it, so every
/// emitted fragment's bounds are drawn from the boundary set. Binary search
/// finds the first boundary past a tombstone's start; emission from there is
/// linear.
pub(crate) fn fragment_at_boundaries(
    cmp: &dyn Comparator,
    tombstones: Vec<TombstoneWithOrigin>,
    boundaries: &[Vec<u8>],
) -> Vec<TombstoneWithOrigin> {
    let mut out = Vec::with_capacity(tombstones.len());
    for mut t in tombstones {
        let mut i =
            boundaries.partition_point(|b| cmp.compare(&t.span.start, b) != Ordering::Less);
        while i < boundaries.len() && cmp.compare(&boundaries[i], &t.span.end) == Ordering::Less {
            let mut head = t.clone();
            head.span.end = boundaries[i].clone();
            out.push(head);
            t.span.start = boundaries[i].clone();
            i += 1;
        }
        out.push(t);
    }
    out
}

/// Sorts fragments by (start ASC, seqnum DESC) and sweeps: fragments sharing
/// a start key (hence, post-fragmentation, identical bounds) arrive newest
/// first, so their authority index must not decrease.
fn check_fragment_order(
    cmp: &dyn Comparator,
    fragments: &mut [TombstoneWithOrigin],
) -> Result<(), CheckError> {
    fragments.sort_by(|a, b| {
        cmp.compare(&a.span.start, &b.span.start)
            .then_with(|| b.span.largest_seqnum().cmp(&a.span.largest_seqnum()))
    });

    let mut last: Option<&TombstoneWithOrigin> = None;
    for t in fragments.iter() {
        if let Some(l) = last {
            if cmp.compare(&l.span.start, &t.span.start) == Ordering::Equal
                && l.authority > t.authority
            {
                return Err(CheckError::TombstoneInversion {
                    span: t.span.pretty(cmp),
                    origin: t.provenance.to_string(),
                    newer_origin: l.provenance.to_string(),
                });
            }
        }
        last = Some(t);
    }
    Ok(())
}
