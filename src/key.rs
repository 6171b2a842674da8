//! Intermediate record keys.
//!
//! Two kinds of key travel from the extraction stage to the merge stage:
//!
//! * column keys `[shard][utf8 value]`, ordered by shard and then by the
//!   column's native ordering of the value;
//! * statistics keys `[0xFF][cuboid id, i64 big-endian]`, ordered by cuboid.
//!
//! The first byte tells them apart. Shard ids fit in a byte and never reach
//! [`STATISTICS_MARKER`] because the mapping refuses more than 255 shards.

use crate::cuboid::CuboidId;
use crate::types::DataType;
use anyhow::{Context, Result, bail};
use byteorder::{BigEndian, ByteOrder};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Leading byte of every statistics key.
pub const STATISTICS_MARKER: u8 = 0xFF;

const STATISTICS_KEY_LEN: usize = 1 + 8;
const INITIAL_SCRATCH: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// Value of a column with the given type.
    Column(DataType),
    Statistics,
}

/// An encoded key plus the information needed to order it.
///
/// Equality and hashing use the raw bytes. Ordering compares the leading
/// byte, then the decoded payload, then the raw bytes so that values equal
/// under their type (`"01"` and `"1"` as integers) still order consistently
/// with equality.
#[derive(Clone, Debug)]
pub struct SortableKey {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl SortableKey {
    /// Wrap already-encoded column key bytes.
    ///
    /// # Errors
    ///
    /// Fails on an empty buffer or one that starts with the statistics marker.
    pub fn column(data_type: DataType, bytes: Vec<u8>) -> Result<Self> {
        match bytes.first() {
            None => bail!("empty column key"),
            Some(&STATISTICS_MARKER) => bail!("column key starts with the statistics marker"),
            Some(_) => Ok(Self {
                kind: KeyKind::Column(data_type),
                bytes,
            }),
        }
    }

    #[must_use]
    pub fn statistics(cuboid: CuboidId) -> Self {
        let mut bytes = vec![0u8; STATISTICS_KEY_LEN];
        bytes[0] = STATISTICS_MARKER;
        BigEndian::write_i64(&mut bytes[1..], cuboid);
        Self {
            kind: KeyKind::Statistics,
            bytes,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        self.kind
    }

    #[must_use]
    pub fn is_statistics(&self) -> bool {
        self.kind == KeyKind::Statistics
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Leading byte: a shard id, or [`STATISTICS_MARKER`].
    #[must_use]
    pub fn lead_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Cuboid id of a statistics key.
    ///
    /// # Errors
    ///
    /// Fails for column keys and for statistics keys of the wrong length.
    pub fn cuboid(&self) -> Result<CuboidId> {
        if self.kind != KeyKind::Statistics {
            bail!("not a statistics key");
        }
        decode_cuboid(&self.bytes)
    }

    /// Raw value of a column key.
    ///
    /// # Errors
    ///
    /// Fails for statistics keys and for values that are not UTF-8.
    pub fn value(&self) -> Result<&str> {
        if self.is_statistics() {
            bail!("statistics key carries no column value");
        }
        std::str::from_utf8(&self.bytes[1..]).context("column key value is not valid UTF-8")
    }
}

/// Parse the cuboid out of `[marker][i64 BE]`.
///
/// # Errors
///
/// Fails when the buffer is not exactly nine bytes or lacks the marker.
pub fn decode_cuboid(bytes: &[u8]) -> Result<CuboidId> {
    if bytes.len() != STATISTICS_KEY_LEN {
        bail!(
            "statistics key must be {STATISTICS_KEY_LEN} bytes, got {}",
            bytes.len()
        );
    }
    if bytes[0] != STATISTICS_MARKER {
        bail!("statistics key starts with {:#04x}", bytes[0]);
    }
    Ok(BigEndian::read_i64(&bytes[1..]))
}

impl PartialEq for SortableKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SortableKey {}

impl Hash for SortableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for SortableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lead = self.bytes[0].cmp(&other.bytes[0]);
        if lead != Ordering::Equal {
            return lead;
        }
        let payload = match (self.kind, other.kind) {
            (KeyKind::Statistics, KeyKind::Statistics) => {
                match (decode_cuboid(&self.bytes), decode_cuboid(&other.bytes)) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    _ => Ordering::Equal,
                }
            }
            (KeyKind::Column(dt), KeyKind::Column(_)) => {
                match (
                    std::str::from_utf8(&self.bytes[1..]),
                    std::str::from_utf8(&other.bytes[1..]),
                ) {
                    (Ok(a), Ok(b)) => dt.compare(a, b),
                    _ => Ordering::Equal,
                }
            }
            _ => Ordering::Equal,
        };
        payload.then_with(|| self.bytes.cmp(&other.bytes))
    }
}

/// Builds column keys in a reusable scratch buffer.
///
/// The buffer doubles until a key fits; every produced key is a fresh copy.
#[derive(Debug)]
pub struct KeyEncoder {
    scratch: Vec<u8>,
}

impl Default for KeyEncoder {
    fn default() -> Self {
        Self::with_capacity(INITIAL_SCRATCH)
    }
}

impl KeyEncoder {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scratch: vec![0; capacity.max(1)],
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Encode `[shard][value]`.
    ///
    /// # Errors
    ///
    /// Fails when `shard` collides with the statistics marker.
    pub fn column_key(&mut self, data_type: DataType, shard: u8, value: &str) -> Result<SortableKey> {
        let needed = 1 + value.len();
        if needed > self.scratch.len() {
            let mut size = self.scratch.len() * 2;
            while size < needed {
                size *= 2;
            }
            self.scratch.resize(size, 0);
        }
        self.scratch[0] = shard;
        self.scratch[1..needed].copy_from_slice(value.as_bytes());
        SortableKey::column(data_type, self.scratch[..needed].to_vec())
    }
}
