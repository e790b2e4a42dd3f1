//! Storage sources and snapshot assembly.
//!
//! A [`Source`] is one audited stream origin: a pinned write buffer or one
//! leveled on-disk file. Sources carry an explicit `authority` index — 0 is
//! the most authoritative (newest write buffer), larger indices hold
//! progressively older data. The index is assigned once during assembly and
//! read from the field everywhere else; it is never re-derived from a
//! container position.
//!
//! Assembly order, which defines the authority total order:
//!
//! 1. write buffers, newest first
//! 2. L0 sublevel files, newest sublevel first
//! 3. files of levels 1..N, shallowest level first
//!
//! Files within one level or sublevel are key-disjoint, so giving each its
//! own index keeps the order total without weakening the invariant.

use anyhow::Result;
use base::PointIter;
use keyspan::SpanIter;
use std::fmt;

use crate::error::CheckError;

/// Where a stream came from, for error messages and stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// A write buffer; index 0 is the newest (active) buffer.
    Buffer { index: usize },
    /// An on-disk file at a numeric LSM level.
    File { level: u32, file_num: u64 },
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Buffer { index } => write!(f, "buffer {index}"),
            Provenance::File { level, file_num } => write!(f, "level {level}: file {file_num}"),
        }
    }
}

/// Identity of one on-disk file within the snapshot's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub level: u32,
    pub file_num: u64,
}

/// A write buffer pinned by the snapshot. Streams may be opened more than
/// once per audit (each phase reads its own).
pub trait Buffer {
    fn points(&self) -> Result<Box<dyn PointIter>>;
    /// `Ok(None)` if the buffer holds no range tombstones.
    fn spans(&self) -> Result<Option<Box<dyn SpanIter>>>;
}

/// Opens streams against on-disk files. Supplied by the surrounding store;
/// how a file is decoded is not this crate's concern.
pub trait IterFactory {
    fn points(&self, file: &FileMeta) -> Result<Box<dyn PointIter>>;
    /// `Ok(None)` if the file has no range-deletion block.
    fn spans(&self, file: &FileMeta) -> Result<Option<Box<dyn SpanIter>>>;
}

/// One stream origin with its opened streams. Dropping a source closes
/// whatever streams it still owns.
pub struct Source {
    /// Position in the authority total order; 0 = most authoritative.
    pub authority: usize,
    pub provenance: Provenance,
    pub points: Option<Box<dyn PointIter>>,
    pub spans: Option<Box<dyn SpanIter>>,
}

/// A pinned, point-in-time view of the store: the buffers and file manifest
/// to audit plus the sequence number everything is read at. The caller holds
/// whatever references keep this data alive for the duration of the audit.
pub struct Snapshot {
    /// Write buffers, newest first.
    pub buffers: Vec<Box<dyn Buffer>>,
    /// L0 sublevel files, newest sublevel first.
    pub l0_sublevels: Vec<Vec<FileMeta>>,
    /// Files of levels 1..N; `levels[0]` is L1.
    pub levels: Vec<Vec<FileMeta>>,
    /// The sequence number the audit reads at.
    pub visible_seq: u64,
}

impl Snapshot {
    /// Opens one source per buffer and per file, in authority order. When
    /// `with_points` is false only span streams are opened (phase 2 does not
    /// read points).
    pub(crate) fn open_sources(
        &self,
        factory: &dyn IterFactory,
        with_points: bool,
    ) -> Result<Vec<Source>, CheckError> {
        let mut sources = Vec::new();

        for (index, buffer) in self.buffers.iter().enumerate() {
            let provenance = Provenance::Buffer { index };
            let points = if with_points {
                Some(buffer.points().map_err(|e| stream_err(&provenance, e))?)
            } else {
                None
            };
            let spans = buffer.spans().map_err(|e| stream_err(&provenance, e))?;
            sources.push(Source {
                authority: sources.len(),
                provenance,
                points,
                spans,
            });
        }

        let files = self
            .l0_sublevels
            .iter()
            .chain(self.levels.iter())
            .flatten();
        for file in files {
            let provenance = Provenance::File {
                level: file.level,
                file_num: file.file_num,
            };
            let points = if with_points {
                Some(factory.points(file).map_err(|e| stream_err(&provenance, e))?)
            } else {
                None
            };
            let spans = factory.spans(file).map_err(|e| stream_err(&provenance, e))?;
            sources.push(Source {
                authority: sources.len(),
                provenance,
                points,
                spans,
            });
        }

        Ok(sources)
    }
}

fn stream_err(provenance: &Provenance, source: anyhow::Error) -> CheckError {
    CheckError::Stream {
        origin: provenance.to_string(),
        source,
    }
}
