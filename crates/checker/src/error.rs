//! Error types for the level-consistency check.
//!
//! Every variant is fatal: the first error aborts the audit and is returned
//! to the caller. Messages carry pre-rendered key/span text (produced with
//! the store's comparator) plus the origin of each offending record, so an
//! error is self-describing even after the streams that produced it are
//! closed.

use std::io;
use thiserror::Error;

/// A structural-consistency violation or a failure while auditing.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A source yielded a non-increasing internal key.
    #[error("out of order keys {prev} >= {next} in {origin}")]
    OutOfOrderKeys {
        prev: String,
        next: String,
        origin: String,
    },

    /// Same user key seen at a less authoritative source first: the level
    /// invariant is inverted for points.
    #[error(
        "level invariant violated: found {key} in {origin} after {prev_key} in {prev_origin}"
    )]
    PointInversion {
        key: String,
        origin: String,
        prev_key: String,
        prev_origin: String,
    },

    /// A tombstone at a less authoritative source still covers a visible
    /// point at a more authoritative source.
    #[error("tombstone {span} in {span_origin} deletes key {key} in {key_origin}")]
    MaskedPoint {
        span: String,
        span_origin: String,
        key: String,
        key_origin: String,
    },

    /// One source's tombstones overlap or are unsorted after truncation.
    #[error("unordered or unfragmented range delete tombstones {prev}, {next} in {origin}")]
    UnfragmentedTombstones {
        prev: String,
        next: String,
        origin: String,
    },

    /// Identical fragments violate authority/seqnum ordering across sources.
    #[error(
        "tombstone {span} in {origin} has a lower seqnum than the same tombstone in {newer_origin}"
    )]
    TombstoneInversion {
        span: String,
        origin: String,
        newer_origin: String,
    },

    /// An internal key kind that cannot legally appear where it did.
    #[error("invalid internal key kind for {key} in {origin}")]
    InvalidKind { key: String, origin: String },

    /// The merge operator failed to open, fold, or finalize a chain.
    #[error("merge processing error on key {key} in {origin}")]
    Merge {
        key: String,
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// Materializing a point's value failed.
    #[error("failed to read value for {key} in {origin}")]
    Value {
        key: String,
        origin: String,
        #[source]
        source: io::Error,
    },

    /// A point or span stream failed while being opened or advanced.
    #[error("iterator error in {origin}")]
    Stream {
        origin: String,
        #[source]
        source: anyhow::Error,
    },
}
