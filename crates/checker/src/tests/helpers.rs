//! Shared in-memory sources, factories, and merge operators for the checker
//! tests. Everything here runs without touching disk.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use base::{
    BytewiseComparator, InternalKey, Kind, MergeFold, MergeOperator, PointEntry, PointIter,
    VecPointIter,
};
use keyspan::{Span, SpanIter, VecSpanIter};

use crate::source::{Buffer, FileMeta, IterFactory, Provenance, Source};

pub static CMP: BytewiseComparator = BytewiseComparator;

pub fn ikey(key: &[u8], seq: u64, kind: Kind) -> InternalKey {
    InternalKey::new(key, seq, kind)
}

pub fn set(key: &[u8], seq: u64, value: &[u8]) -> PointEntry {
    PointEntry::new(ikey(key, seq, Kind::Set), value)
}

pub fn span(start: &[u8], end: &[u8], seqs: &[u64]) -> Span {
    Span::new(start, end, seqs.to_vec())
}

fn point_iter(points: &[(InternalKey, Vec<u8>)]) -> Box<dyn PointIter> {
    Box::new(VecPointIter::new(
        points
            .iter()
            .map(|(k, v)| PointEntry::new(k.clone(), v.as_slice()))
            .collect(),
    ))
}

fn span_iter(spans: &[Span]) -> Option<Box<dyn SpanIter>> {
    if spans.is_empty() {
        None
    } else {
        Some(Box::new(VecSpanIter::new(&CMP, spans.to_vec())))
    }
}

/// Builds a file-backed source directly, for driving `PointScan` and
/// `check_tombstones` without a snapshot.
pub fn file_source(
    authority: usize,
    level: u32,
    file_num: u64,
    points: Vec<PointEntry>,
    spans: Vec<Span>,
) -> Source {
    Source {
        authority,
        provenance: Provenance::File { level, file_num },
        points: Some(Box::new(VecPointIter::new(points))),
        spans: span_iter(&spans),
    }
}

pub fn buffer_source(
    authority: usize,
    index: usize,
    points: Vec<PointEntry>,
    spans: Vec<Span>,
) -> Source {
    Source {
        authority,
        provenance: Provenance::Buffer { index },
        points: Some(Box::new(VecPointIter::new(points))),
        spans: span_iter(&spans),
    }
}

// -------------------- Buffers --------------------

/// An in-memory write buffer.
#[derive(Default)]
pub struct MemBuffer {
    pub points: Vec<(InternalKey, Vec<u8>)>,
    pub spans: Vec<Span>,
}

impl MemBuffer {
    pub fn with_points(points: Vec<(InternalKey, Vec<u8>)>) -> Self {
        Self {
            points,
            spans: Vec::new(),
        }
    }
}

impl Buffer for MemBuffer {
    fn points(&self) -> Result<Box<dyn PointIter>> {
        Ok(point_iter(&self.points))
    }

    fn spans(&self) -> Result<Option<Box<dyn SpanIter>>> {
        Ok(span_iter(&self.spans))
    }
}

/// Increments a shared counter when dropped; used to observe stream closing.
pub struct DropTracker(pub Rc<Cell<usize>>);

impl Drop for DropTracker {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

struct TrackedIter {
    inner: Box<dyn PointIter>,
    _tracker: DropTracker,
}

impl PointIter for TrackedIter {
    fn next(&mut self) -> Result<Option<PointEntry>> {
        self.inner.next()
    }
}

/// A buffer that counts how many point streams it opened and how many have
/// been dropped again.
pub struct TrackedBuffer {
    pub inner: MemBuffer,
    pub opened: Rc<Cell<usize>>,
    pub dropped: Rc<Cell<usize>>,
}

impl TrackedBuffer {
    pub fn new(inner: MemBuffer) -> Self {
        Self {
            inner,
            opened: Rc::new(Cell::new(0)),
            dropped: Rc::new(Cell::new(0)),
        }
    }
}

impl Buffer for TrackedBuffer {
    fn points(&self) -> Result<Box<dyn PointIter>> {
        self.opened.set(self.opened.get() + 1);
        Ok(Box::new(TrackedIter {
            inner: self.inner.points()?,
            _tracker: DropTracker(Rc::clone(&self.dropped)),
        }))
    }

    fn spans(&self) -> Result<Option<Box<dyn SpanIter>>> {
        self.inner.spans()
    }
}

// -------------------- File factory --------------------

#[derive(Default)]
struct MemFile {
    points: Vec<(InternalKey, Vec<u8>)>,
    spans: Vec<Span>,
}

/// An in-memory stand-in for the store's iterator factory. Counts stream
/// openings so tests can observe phase gating.
#[derive(Default)]
pub struct MemFactory {
    files: HashMap<(u32, u64), MemFile>,
    pub points_opened: Cell<usize>,
    pub spans_opened: Cell<usize>,
}

impl MemFactory {
    pub fn add_file(
        &mut self,
        level: u32,
        file_num: u64,
        points: Vec<(InternalKey, Vec<u8>)>,
        spans: Vec<Span>,
    ) {
        self.files
            .insert((level, file_num), MemFile { points, spans });
    }

    fn file(&self, meta: &FileMeta) -> Result<&MemFile> {
        self.files
            .get(&(meta.level, meta.file_num))
            .ok_or_else(|| anyhow!("no such file: level {} file {}", meta.level, meta.file_num))
    }
}

impl IterFactory for MemFactory {
    fn points(&self, meta: &FileMeta) -> Result<Box<dyn PointIter>> {
        self.points_opened.set(self.points_opened.get() + 1);
        Ok(point_iter(&self.file(meta)?.points))
    }

    fn spans(&self, meta: &FileMeta) -> Result<Option<Box<dyn SpanIter>>> {
        self.spans_opened.set(self.spans_opened.get() + 1);
        Ok(span_iter(&self.file(meta)?.spans))
    }
}

// -------------------- Merge operators --------------------

fn parse_int(operand: &[u8]) -> Result<i64> {
    let s = std::str::from_utf8(operand)?;
    s.parse::<i64>().map_err(|e| anyhow!("bad operand: {e}"))
}

/// Integer-addition merge operator that records every finalized value, so
/// tests can assert what a chain folded to.
#[derive(Default)]
pub struct AddMerge {
    pub finished: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MergeOperator for AddMerge {
    fn begin(&self, _key: &[u8], operand: &[u8]) -> Result<Box<dyn MergeFold>> {
        Ok(Box::new(AddFold {
            sum: parse_int(operand)?,
            finished: Rc::clone(&self.finished),
        }))
    }
}

struct AddFold {
    sum: i64,
    finished: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MergeFold for AddFold {
    fn fold_older(&mut self, operand: &[u8]) -> Result<()> {
        self.sum += parse_int(operand)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let value = self.sum.to_string().into_bytes();
        self.finished.borrow_mut().push(value.clone());
        Ok(value)
    }
}

/// A merge operator whose finalize step always fails.
pub struct FailingMerge;

impl MergeOperator for FailingMerge {
    fn begin(&self, _key: &[u8], _operand: &[u8]) -> Result<Box<dyn MergeFold>> {
        Ok(Box::new(FailingFold))
    }
}

struct FailingFold;

impl MergeFold for FailingFold {
    fn fold_older(&mut self, _operand: &[u8]) -> Result<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        bail!("merge operator rejected the chain")
    }
}
