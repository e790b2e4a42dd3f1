//! # Checker — LSM Level-Consistency Audit
//!
//! A read-only structural audit over a pinned snapshot of an LSM-tree
//! key-value store. It verifies the **level invariant**: a visible version
//! of a user key at a more authoritative source must never be masked by a
//! stale version — point or range tombstone — at a less authoritative one.
//! It also checks that every source yields ordered points, that each
//! source's range tombstones are sorted and fragmented, and that runs of
//! MERGE records fold without error.
//!
//! This is a diagnostic for tests and maintenance tooling. It iterates the
//! entire store, detects and reports the first violation, and repairs
//! nothing.
//!
//! ## Two phases
//!
//! ```text
//! Snapshot (buffers newest-first, L0 sublevels newest-first, L1..LN,
//!           visible seqnum)
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PHASE 1  points.rs                                           │
//! │   merge heap over every point stream                         │
//! │   per visible point: authority order, MERGE folding,         │
//! │   masking by lower-authority tombstones                      │
//! │   per source: strictly increasing internal keys              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PHASE 2  tombstones.rs   (only if phase 1 passed)            │
//! │   collect: truncate to snapshot, per-source order check      │
//! │   fragment: split at the global boundary set                 │
//! │   sweep: same-range fragments must not invert authority      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module | Purpose |
//! |---|---|
//! | `lib.rs` | `check_levels` driver, `CheckStats` |
//! | `source` | `Provenance`, `Source`, `Snapshot` + authority-ordered stream assembly |
//! | `heap` | k-way merge heap (user key ASC, seqnum DESC) |
//! | `points` | phase-1 scan and visible-point validation |
//! | `tombstones` | phase-2 collect / fragment / cross-check |
//! | `error` | `CheckError`, one variant per violation class |
//!
//! ## Authority order
//!
//! Sources are totally ordered by an explicit authority index: 0 is the
//! newest write buffer, then older buffers, then L0 sublevel files newest
//! first, then levels 1..N. Smaller index = newer data. For one user key,
//! sequence numbers must not increase as the authority index grows — that
//! is the invariant both phases enforce, once for points and once for
//! tombstone fragments.
//!
//! ## Execution model
//!
//! Single-threaded, synchronous, run to completion on the calling thread.
//! The first error aborts the audit; every opened stream is owned by its
//! source slot and dropped on every exit path. For a fixed snapshot the
//! audit is deterministic and idempotent.

mod error;
mod heap;
mod points;
mod source;
mod tombstones;

pub use error::CheckError;
pub use source::{Buffer, FileMeta, IterFactory, Provenance, Snapshot, Source};

use base::{Comparator, MergeOperator};
use points::PointScan;

/// Counters reported by a successful audit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckStats {
    /// Visible points validated in phase 1.
    pub num_points: u64,
    /// Tombstones after fragmentation in phase 2.
    pub num_tombstones: u64,
}

/// Audits the snapshot for level-invariant violations.
///
/// Runs phase 1 (point consistency) over every point stream, then — only if
/// phase 1 passes — phase 2 (tombstone consistency) over freshly opened
/// tombstone streams. On success, `stats` (when supplied) receives the point
/// and post-fragmentation tombstone counts.
///
/// # Errors
///
/// Returns the first [`CheckError`] encountered; see that type for the
/// violation classes. All streams opened by the audit are closed regardless
/// of outcome.
pub fn check_levels(
    cmp: &dyn Comparator,
    merge: &dyn MergeOperator,
    snapshot: &Snapshot,
    factory: &dyn IterFactory,
    stats: Option<&mut CheckStats>,
) -> Result<(), CheckError> {
    // Phase 1 consumes its own streams; the sources (and any stream phase 1
    // did not drain) are dropped when the scan is.
    let sources = snapshot.open_sources(factory, true)?;
    let num_points = PointScan::new(cmp, merge, snapshot.visible_seq, sources)?.run()?;

    // Phase 2 reads tombstones exhaustively from fresh streams.
    let sources = snapshot.open_sources(factory, false)?;
    let num_tombstones = tombstones::check_tombstones(cmp, snapshot.visible_seq, sources)?;

    if let Some(stats) = stats {
        stats.num_points = num_points;
        stats.num_tombstones = num_tombstones as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
