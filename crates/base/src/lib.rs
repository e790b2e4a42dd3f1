//! # Base — Core Key Types and Store Contracts
//!
//! Shared vocabulary for the level-consistency checker: internal keys,
//! user-key comparison, lazily materialized values, the merge-operator
//! contract, and the point-stream contract every storage source implements.
//!
//! ## Internal key ordering
//!
//! An [`InternalKey`] is a user key plus a version trailer packing the
//! sequence number and the record [`Kind`]:
//!
//! ```text
//! trailer = seq << 8 | kind
//! ```
//!
//! Keys order by (user key ASC, trailer DESC): for one user key the newest
//! version sorts first, and for equal sequence numbers the kind discriminant
//! breaks the tie. The user-key half of the comparison is always delegated
//! to an external [`Comparator`] — raw byte order is only the default.

use anyhow::Result;
use std::cmp::Ordering;
use std::fmt;
use std::io;

/// The record type carried in an internal key's trailer.
///
/// Discriminants are the fixed same-seqnum tie-break priority: a higher
/// discriminant sorts as newer when sequence numbers are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    /// A point tombstone.
    Delete = 0,
    /// A single-delete tombstone (consumes exactly one older version).
    SingleDelete = 1,
    /// A point tombstone carrying the size of the value it deletes.
    DeleteSized = 2,
    /// A plain write.
    Set = 3,
    /// A merge operand, folded by the store's merge operator.
    Merge = 4,
    /// A write known to shadow a deletion.
    SetWithDelete = 5,
    /// A synthetic boundary key (e.g. a file's exclusive upper bound).
    /// Never validated as data.
    ExclusiveSentinel = 6,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Delete => "DEL",
            Kind::SingleDelete => "SINGLEDEL",
            Kind::DeleteSized => "DELSIZED",
            Kind::Set => "SET",
            Kind::Merge => "MERGE",
            Kind::SetWithDelete => "SETWITHDEL",
            Kind::ExclusiveSentinel => "SENTINEL",
        };
        f.write_str(s)
    }
}

/// A versioned key: user key bytes plus (sequence number, kind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub seq: u64,
    pub kind: Kind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Vec<u8>>, seq: u64, kind: Kind) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
            kind,
        }
    }

    /// The packed version trailer: `seq << 8 | kind`.
    ///
    /// A higher trailer means a newer record for the same user key.
    pub fn trailer(&self) -> u64 {
        self.seq << 8 | self.kind as u64
    }

    /// True if this key is a synthetic boundary marker rather than data.
    pub fn is_exclusive_sentinel(&self) -> bool {
        self.kind == Kind::ExclusiveSentinel
    }

    /// True if this record is visible when reading at `snapshot`.
    /// Sentinels are never visible.
    pub fn visible_at(&self, snapshot: u64) -> bool {
        !self.is_exclusive_sentinel() && self.seq <= snapshot
    }

    /// Diagnostic rendering: `key#seq,KIND`.
    pub fn pretty(&self, cmp: &dyn Comparator) -> String {
        format!("{}#{},{}", cmp.format_key(&self.user_key), self.seq, self.kind)
    }
}

/// Full internal-key ordering: user key ascending per `cmp`, then trailer
/// descending (newest version of a user key first).
pub fn internal_cmp(cmp: &dyn Comparator, a: &InternalKey, b: &InternalKey) -> Ordering {
    cmp.compare(&a.user_key, &b.user_key)
        .then_with(|| b.trailer().cmp(&a.trailer()))
}

/// User-key comparison and diagnostic formatting.
///
/// Supplied by the surrounding store; the checker never assumes raw byte
/// order beyond the [`BytewiseComparator`] default.
pub trait Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Renders a user key for error messages. The default escapes
    /// non-printable bytes.
    fn format_key(&self, key: &[u8]) -> String {
        key.escape_ascii().to_string()
    }
}

/// Plain lexicographic byte comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// A value blob that may require I/O to materialize.
pub enum LazyValue {
    /// Bytes already in memory.
    Inline(Vec<u8>),
    /// Bytes fetched on demand; the fetch may fail.
    Deferred(Box<dyn Fn() -> io::Result<Vec<u8>>>),
}

impl LazyValue {
    /// Materializes the value bytes.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        match self {
            LazyValue::Inline(v) => Ok(v.clone()),
            LazyValue::Deferred(f) => f(),
        }
    }
}

impl From<Vec<u8>> for LazyValue {
    fn from(v: Vec<u8>) -> Self {
        LazyValue::Inline(v)
    }
}

impl From<&[u8]> for LazyValue {
    fn from(v: &[u8]) -> Self {
        LazyValue::Inline(v.to_vec())
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyValue::Inline(v) => write!(f, "Inline({} bytes)", v.len()),
            LazyValue::Deferred(_) => write!(f, "Deferred"),
        }
    }
}

/// The store's merge operator: opens a fold over a run of MERGE operands
/// for one user key, newest operand first.
pub trait MergeOperator {
    /// Starts a new fold seeded with the newest operand for `key`.
    fn begin(&self, key: &[u8], operand: &[u8]) -> Result<Box<dyn MergeFold>>;
}

/// An in-progress merge fold. Operands arrive oldest-last; `finish` consumes
/// the fold and releases any resources it holds. A fold dropped without
/// `finish` releases its resources through `Drop`.
pub trait MergeFold {
    fn fold_older(&mut self, operand: &[u8]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// One entry from a point stream.
#[derive(Debug)]
pub struct PointEntry {
    pub key: InternalKey,
    pub value: LazyValue,
}

impl PointEntry {
    pub fn new(key: InternalKey, value: impl Into<LazyValue>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// A forward-only stream of point entries from one storage source.
///
/// Entries must arrive in strictly increasing internal-key order (user key
/// ascending, then sequence number descending). The checker verifies this
/// rather than assuming it.
pub trait PointIter {
    /// The next entry, or `Ok(None)` once exhausted.
    fn next(&mut self) -> Result<Option<PointEntry>>;
}

/// In-memory point stream over a pre-built entry list, used by write-buffer
/// adapters and tests.
pub struct VecPointIter {
    entries: std::vec::IntoIter<PointEntry>,
}

impl VecPointIter {
    pub fn new(entries: Vec<PointEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl PointIter for VecPointIter {
    fn next(&mut self) -> Result<Option<PointEntry>> {
        Ok(self.entries.next())
    }
}
