//! Binary encoding for treaty sets
//!
//! All integers are big-endian. Identifiers and times travel as `i64`;
//! a negative value on the wire is rejected when decoding, and a value
//! past `i64::MAX` is rejected when encoding.
//!
//! ```text
//! TreatySet   := kind: u8 (0 empty, 1 metric)
//!                [metric] next_id: i64, version: i64, count: u32, MetricTreaty*
//! MetricTreaty:= id: i64, activated: u8, Statement,
//!                observers: u32, observer: i64*, Policy, expiry: i64 (us)
//! Statement   := tag: u8 (0 at-least, 1 at-most, 2 equals)
//!                [0|1] rate: f64, base: f64   [2] target: f64
//! Policy      := tag: u8 (0 unenforced, 1 lease, 2 direct)
//!                [1] duration: i64 (us)   [2] max_lease: i64 (us), safety: f64
//! ```
//!
//! The metric a set constrains is not encoded; the decoder is handed the
//! live metric handle by whoever owns the set.

use crate::metric::{Metric, MetricId};
use crate::policy::EnforcementPolicy;
use crate::set::TreatySet;
use crate::statement::TreatyStatement;
use crate::treaty::MetricTreaty;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tessera_core::{TesseraError, Timestamp};

const SET_EMPTY: u8 = 0;
const SET_METRIC: u8 = 1;

const STATEMENT_AT_LEAST: u8 = 0;
const STATEMENT_AT_MOST: u8 = 1;
const STATEMENT_EQUALS: u8 = 2;

const POLICY_UNENFORCED: u8 = 0;
const POLICY_LEASE: u8 = 1;
const POLICY_DIRECT: u8 = 2;

/// Treaty encoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended early
    #[error("Truncated input")]
    Truncated,

    /// Unknown tag byte
    #[error("Invalid {what} tag: {tag:#04x}")]
    InvalidTag {
        /// Field being decoded
        what: &'static str,
        /// Offending byte
        tag: u8,
    },

    /// Negative value where only non-negative values are allowed
    #[error("Negative {what}: {value}")]
    Negative {
        /// Field being decoded
        what: &'static str,
        /// Offending value
        value: i64,
    },

    /// Value does not fit the wire type
    #[error("{what} out of range: {value}")]
    OutOfRange {
        /// Field being encoded
        what: &'static str,
        /// Offending value
        value: u64,
    },

    /// Same treaty id twice in one set
    #[error("Duplicate treaty id {0}")]
    DuplicateTreaty(u64),

    /// Name is not valid UTF-8
    #[error("Invalid string encoding")]
    InvalidString,

    /// Bytes left after a complete value
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    /// Underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(e.to_string())
        }
    }
}

impl From<CodecError> for TesseraError {
    fn from(e: CodecError) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

/// Result alias for the codec
pub type CodecResult<T> = Result<T, CodecError>;

// ============================================================================
// Sets
// ============================================================================

/// Write `set`
pub fn encode_set<W: Write>(w: &mut W, set: &TreatySet) -> CodecResult<()> {
    match set {
        TreatySet::Empty => w.write_u8(SET_EMPTY)?,
        TreatySet::Metric(m) => {
            w.write_u8(SET_METRIC)?;
            write_id(w, "next_id", m.next_id)?;
            write_id(w, "version", m.version)?;
            write_count(w, m.treaties.len())?;
            for treaty in m.treaties.values() {
                encode_treaty(w, treaty)?;
            }
        }
    }
    Ok(())
}

/// Read a set constraining `metric`
///
/// The handle is ignored when the encoded set is the empty sentinel.
pub fn decode_set<R: Read>(r: &mut R, metric: &Arc<dyn Metric>) -> CodecResult<TreatySet> {
    match r.read_u8()? {
        SET_EMPTY => Ok(TreatySet::Empty),
        SET_METRIC => {
            let handle = Arc::downgrade(metric);
            let metric_id = metric.id();
            let next_id = read_id(r, "next_id")?;
            let version = read_id(r, "version")?;
            let count = r.read_u32::<BigEndian>()?;

            let mut treaties = BTreeMap::new();
            for _ in 0..count {
                let treaty = read_treaty(r, &handle, metric_id)?;
                let id = treaty.id();
                if treaties.insert(id, treaty).is_some() {
                    return Err(CodecError::DuplicateTreaty(id));
                }
            }
            Ok(TreatySet::from_parts(
                handle, metric_id, next_id, version, treaties,
            ))
        }
        tag => Err(CodecError::InvalidTag { what: "set", tag }),
    }
}

/// Encode `set` into a fresh buffer
pub fn set_to_bytes(set: &TreatySet) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode_set(&mut buf, set)?;
    Ok(buf)
}

/// Decode a set from exactly `bytes`
pub fn set_from_bytes(bytes: &[u8], metric: &Arc<dyn Metric>) -> CodecResult<TreatySet> {
    let mut cursor = bytes;
    let set = decode_set(&mut cursor, metric)?;
    ensure_consumed(cursor)?;
    Ok(set)
}

// ============================================================================
// Treaties
// ============================================================================

/// Write `treaty`
pub fn encode_treaty<W: Write>(w: &mut W, treaty: &MetricTreaty) -> CodecResult<()> {
    write_id(w, "treaty id", treaty.id())?;
    w.write_u8(u8::from(treaty.is_activated()))?;
    write_statement(w, treaty.statement())?;
    write_count(w, treaty.observers().len())?;
    for observer in treaty.observers() {
        write_id(w, "observer", *observer)?;
    }
    write_policy(w, treaty.policy())?;
    write_micros(w, "expiry", treaty.expiry().as_micros())?;
    Ok(())
}

/// Read a treaty constraining `metric`
pub fn decode_treaty<R: Read>(r: &mut R, metric: &Arc<dyn Metric>) -> CodecResult<MetricTreaty> {
    read_treaty(r, &Arc::downgrade(metric), metric.id())
}

fn read_treaty<R: Read>(
    r: &mut R,
    metric: &Weak<dyn Metric>,
    metric_id: MetricId,
) -> CodecResult<MetricTreaty> {
    let id = read_id(r, "treaty id")?;
    let activated = match r.read_u8()? {
        0 => false,
        1 => true,
        tag => return Err(CodecError::InvalidTag { what: "activated", tag }),
    };
    let statement = read_statement(r)?;
    let count = r.read_u32::<BigEndian>()?;
    let mut observers = BTreeSet::new();
    for _ in 0..count {
        observers.insert(read_id(r, "observer")?);
    }
    let policy = read_policy(r)?;
    let expiry = Timestamp::from_micros(read_id(r, "expiry")?);

    Ok(MetricTreaty::from_parts(
        metric.clone(),
        metric_id,
        id,
        statement,
        policy,
        expiry,
        observers,
        activated,
    ))
}

fn write_statement<W: Write>(w: &mut W, statement: &TreatyStatement) -> CodecResult<()> {
    match *statement {
        TreatyStatement::AtLeast { rate, base } => {
            w.write_u8(STATEMENT_AT_LEAST)?;
            w.write_f64::<BigEndian>(rate)?;
            w.write_f64::<BigEndian>(base)?;
        }
        TreatyStatement::AtMost { rate, base } => {
            w.write_u8(STATEMENT_AT_MOST)?;
            w.write_f64::<BigEndian>(rate)?;
            w.write_f64::<BigEndian>(base)?;
        }
        TreatyStatement::Equals(target) => {
            w.write_u8(STATEMENT_EQUALS)?;
            w.write_f64::<BigEndian>(target)?;
        }
    }
    Ok(())
}

fn read_statement<R: Read>(r: &mut R) -> CodecResult<TreatyStatement> {
    match r.read_u8()? {
        STATEMENT_AT_LEAST => Ok(TreatyStatement::AtLeast {
            rate: r.read_f64::<BigEndian>()?,
            base: r.read_f64::<BigEndian>()?,
        }),
        STATEMENT_AT_MOST => Ok(TreatyStatement::AtMost {
            rate: r.read_f64::<BigEndian>()?,
            base: r.read_f64::<BigEndian>()?,
        }),
        STATEMENT_EQUALS => Ok(TreatyStatement::Equals(r.read_f64::<BigEndian>()?)),
        tag => Err(CodecError::InvalidTag {
            what: "statement",
            tag,
        }),
    }
}

fn write_policy<W: Write>(w: &mut W, policy: &EnforcementPolicy) -> CodecResult<()> {
    match *policy {
        EnforcementPolicy::Unenforced => w.write_u8(POLICY_UNENFORCED)?,
        EnforcementPolicy::Lease { duration } => {
            w.write_u8(POLICY_LEASE)?;
            write_duration(w, "lease duration", duration)?;
        }
        EnforcementPolicy::Direct { max_lease, safety } => {
            w.write_u8(POLICY_DIRECT)?;
            write_duration(w, "max lease", max_lease)?;
            w.write_f64::<BigEndian>(safety)?;
        }
    }
    Ok(())
}

fn read_policy<R: Read>(r: &mut R) -> CodecResult<EnforcementPolicy> {
    match r.read_u8()? {
        POLICY_UNENFORCED => Ok(EnforcementPolicy::Unenforced),
        POLICY_LEASE => Ok(EnforcementPolicy::Lease {
            duration: Duration::from_micros(read_id(r, "lease duration")?),
        }),
        POLICY_DIRECT => Ok(EnforcementPolicy::Direct {
            max_lease: Duration::from_micros(read_id(r, "max lease")?),
            safety: r.read_f64::<BigEndian>()?,
        }),
        tag => Err(CodecError::InvalidTag { what: "policy", tag }),
    }
}

// ============================================================================
// Primitives
// ============================================================================

pub(crate) fn write_id<W: Write>(w: &mut W, what: &'static str, value: u64) -> CodecResult<()> {
    let value = i64::try_from(value).map_err(|_| CodecError::OutOfRange { what, value })?;
    w.write_i64::<BigEndian>(value)?;
    Ok(())
}

pub(crate) fn read_id<R: Read>(r: &mut R, what: &'static str) -> CodecResult<u64> {
    let value = r.read_i64::<BigEndian>()?;
    u64::try_from(value).map_err(|_| CodecError::Negative { what, value })
}

pub(crate) fn write_count<W: Write>(w: &mut W, len: usize) -> CodecResult<()> {
    let count = u32::try_from(len).map_err(|_| CodecError::OutOfRange {
        what: "count",
        value: len as u64,
    })?;
    w.write_u32::<BigEndian>(count)?;
    Ok(())
}

pub(crate) fn write_name<W: Write>(w: &mut W, name: &str) -> CodecResult<()> {
    write_count(w, name.len())?;
    w.write_all(name.as_bytes())?;
    Ok(())
}

pub(crate) fn read_name<R: Read>(r: &mut R) -> CodecResult<String> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut bytes = Vec::with_capacity(len.min(4096));
    r.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(CodecError::Truncated);
    }
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidString)
}

pub(crate) fn ensure_consumed(rest: &[u8]) -> CodecResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes(rest.len()))
    }
}

fn write_micros<W: Write>(w: &mut W, what: &'static str, micros: u64) -> CodecResult<()> {
    let value = i64::try_from(micros).map_err(|_| CodecError::OutOfRange {
        what,
        value: micros,
    })?;
    w.write_i64::<BigEndian>(value)?;
    Ok(())
}

fn write_duration<W: Write>(w: &mut W, what: &'static str, duration: Duration) -> CodecResult<()> {
    let micros = u64::try_from(duration.as_micros()).map_err(|_| CodecError::OutOfRange {
        what,
        value: u64::MAX,
    })?;
    write_micros(w, what, micros)
}
