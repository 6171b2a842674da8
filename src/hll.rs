//! Mergeable HyperLogLog counter used for cuboid row-count statistics.
//!
//! The counter keeps `2^p` one-byte registers. While few registers are set it
//! stores them sparsely (index → value); once the sparse map would cost more
//! than the dense array it converts to a dense register array. The
//! representation is invisible to callers: equality, merging and estimation
//! all work on register values.
//!
//! # Wire format
//!
//! ```text
//! [precision: u8][scheme: u8] payload
//!   scheme 0 (sparse): [count: u32 BE] then count × ([index: u32 BE][value: u8]), ascending index
//!   scheme 1 (dense):  2^precision register bytes
//! ```
//!
//! The encoder always picks the shorter scheme.

use anyhow::{Context, Result, bail};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 18;

const SCHEME_SPARSE: u8 = 0;
const SCHEME_DENSE: u8 = 1;
const HEADER_LEN: usize = 2;
const SPARSE_ENTRY_LEN: usize = 5;

/// Seed for hashing raw byte input; every worker must use the same one.
const BYTES_HASH_SEED: u32 = 0;

#[derive(Clone, Debug)]
enum Registers {
    Sparse(BTreeMap<u32, u8>),
    Dense(Box<[u8]>),
}

/// Approximate distinct counter with a fixed precision.
#[derive(Clone, Debug)]
pub struct HllCounter {
    precision: u8,
    registers: Registers,
}

impl HllCounter {
    /// An empty counter with `2^precision` registers.
    ///
    /// # Errors
    ///
    /// Fails when `precision` is outside `[MIN_PRECISION, MAX_PRECISION]`.
    pub fn new(precision: u8) -> Result<Self> {
        check_precision(precision)?;
        Ok(Self {
            precision,
            registers: Registers::Sparse(BTreeMap::new()),
        })
    }

    /// An empty counter that starts in the dense representation.
    ///
    /// # Errors
    ///
    /// Fails when `precision` is outside `[MIN_PRECISION, MAX_PRECISION]`.
    pub fn new_dense(precision: u8) -> Result<Self> {
        check_precision(precision)?;
        Ok(Self {
            precision,
            registers: Registers::Dense(vec![0u8; 1 << precision].into_boxed_slice()),
        })
    }

    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }

    #[must_use]
    pub const fn register_count(&self) -> usize {
        1 << self.precision
    }

    #[must_use]
    pub const fn is_dense(&self) -> bool {
        matches!(self.registers, Registers::Dense(_))
    }

    /// Relative standard error of the estimate at this precision.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn relative_standard_error(&self) -> f64 {
        1.04 / (self.register_count() as f64).sqrt()
    }

    /// Hash `value` with 128-bit murmur3 and add the low 64 bits.
    pub fn add_bytes(&mut self, value: &[u8]) {
        let (lo, _hi) = mur3::murmurhash3_x64_128(value, BYTES_HASH_SEED);
        self.add_hash(lo);
    }

    /// Add an already well-mixed 64-bit hash without rehashing it.
    ///
    /// The low `p` bits choose the register; the register keeps the largest
    /// position of the first set bit among the remaining bits.
    pub fn add_hash(&mut self, hash: u64) {
        let mask = (1u64 << self.precision) - 1;
        let index = (hash & mask) as u32;
        let rank = ((hash | mask).leading_zeros() + 1) as u8;
        self.raise(index, rank);
    }

    /// Value of one register.
    #[must_use]
    pub fn register(&self, index: u32) -> u8 {
        match &self.registers {
            Registers::Sparse(map) => map.get(&index).copied().unwrap_or(0),
            Registers::Dense(regs) => regs.get(index as usize).copied().unwrap_or(0),
        }
    }

    /// Register-wise maximum with `other`.
    ///
    /// # Errors
    ///
    /// Fails when the two counters have different precisions.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.precision != other.precision {
            bail!(
                "cannot merge hll counters of precision {} and {}",
                self.precision,
                other.precision
            );
        }
        match &other.registers {
            Registers::Sparse(map) => {
                for (&index, &rank) in map {
                    self.raise(index, rank);
                }
            }
            Registers::Dense(regs) => {
                self.densify();
                if let Registers::Dense(mine) = &mut self.registers {
                    for (a, &b) in mine.iter_mut().zip(regs.iter()) {
                        *a = (*a).max(b);
                    }
                }
            }
        }
        Ok(())
    }

    /// Estimated number of distinct hashes added; a pure function of the registers.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn count_estimate(&self) -> u64 {
        let m = self.register_count() as f64;
        let (sum, zeros) = match &self.registers {
            Registers::Sparse(map) => {
                let zeros = self.register_count() - map.len();
                let sum = map.values().map(|&r| inv_pow2(r)).sum::<f64>() + zeros as f64;
                (sum, zeros)
            }
            Registers::Dense(regs) => {
                let zeros = regs.iter().filter(|&&r| r == 0).count();
                (regs.iter().map(|&r| inv_pow2(r)).sum::<f64>(), zeros)
            }
        };
        let raw = alpha(self.register_count()) * m * m / sum;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            // linear counting
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    /// Append the wire encoding to `out`.
    pub fn write_registers(&self, out: &mut Vec<u8>) {
        let entries: Vec<(u32, u8)> = match &self.registers {
            Registers::Sparse(map) => map.iter().map(|(&i, &r)| (i, r)).collect(),
            Registers::Dense(regs) => {
                let set = regs.iter().filter(|&&r| r != 0).count();
                if set * SPARSE_ENTRY_LEN + 4 >= regs.len() {
                    out.reserve(HEADER_LEN + regs.len());
                    out.push(self.precision);
                    out.push(SCHEME_DENSE);
                    out.extend_from_slice(regs);
                    return;
                }
                regs.iter()
                    .enumerate()
                    .filter(|(_, r)| **r != 0)
                    .map(|(i, &r)| (i as u32, r))
                    .collect()
            }
        };
        if entries.len() * SPARSE_ENTRY_LEN + 4 >= self.register_count() {
            out.reserve(HEADER_LEN + self.register_count());
            out.push(self.precision);
            out.push(SCHEME_DENSE);
            let start = out.len();
            out.resize(start + self.register_count(), 0);
            for (i, r) in entries {
                out[start + i as usize] = r;
            }
            return;
        }
        out.reserve(HEADER_LEN + 4 + entries.len() * SPARSE_ENTRY_LEN);
        out.push(self.precision);
        out.push(SCHEME_SPARSE);
        let start = out.len();
        out.resize(start + 4 + entries.len() * SPARSE_ENTRY_LEN, 0);
        BigEndian::write_u32(&mut out[start..start + 4], entries.len() as u32);
        for (n, (i, r)) in entries.into_iter().enumerate() {
            let at = start + 4 + n * SPARSE_ENTRY_LEN;
            BigEndian::write_u32(&mut out[at..at + 4], i);
            out[at + 4] = r;
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_registers(&mut out);
        out
    }

    /// Decode a payload produced by [`HllCounter::write_registers`].
    ///
    /// # Errors
    ///
    /// Fails on truncated or trailing bytes, an unknown scheme, out-of-range
    /// register indexes, or a precision other than `expected_precision`.
    pub fn read_registers(bytes: &[u8], expected_precision: u8) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let precision = cur.read_u8().context("hll payload is empty")?;
        if precision != expected_precision {
            bail!("hll payload has precision {precision}, expected {expected_precision}");
        }
        let mut counter = Self::new(precision)?;
        let m = counter.register_count();
        match cur.read_u8().context("hll payload missing scheme byte")? {
            SCHEME_DENSE => {
                let mut regs = vec![0u8; m];
                cur.read_exact(&mut regs)
                    .with_context(|| format!("dense hll payload shorter than {m} registers"))?;
                counter.registers = Registers::Dense(regs.into_boxed_slice());
            }
            SCHEME_SPARSE => {
                let count = cur.read_u32::<BigEndian>().context("sparse hll payload missing count")?;
                if count as usize > m {
                    bail!("sparse hll payload claims {count} registers, only {m} exist");
                }
                for _ in 0..count {
                    let index = cur.read_u32::<BigEndian>().context("truncated sparse hll entry")?;
                    let rank = cur.read_u8().context("truncated sparse hll entry")?;
                    if index as usize >= m {
                        bail!("sparse hll register index {index} out of range");
                    }
                    counter.raise(index, rank);
                }
            }
            other => bail!("unknown hll register scheme {other}"),
        }
        if cur.position() as usize != bytes.len() {
            bail!("hll payload has {} trailing bytes", bytes.len() - cur.position() as usize);
        }
        Ok(counter)
    }

    fn raise(&mut self, index: u32, rank: u8) {
        if rank == 0 {
            return;
        }
        let limit = self.sparse_limit();
        let mut overflow = false;
        match &mut self.registers {
            Registers::Sparse(map) => {
                let slot = map.entry(index).or_insert(0);
                if rank > *slot {
                    *slot = rank;
                }
                overflow = map.len() > limit;
            }
            Registers::Dense(regs) => {
                let slot = &mut regs[index as usize];
                if rank > *slot {
                    *slot = rank;
                }
            }
        }
        if overflow {
            self.densify();
        }
    }

    /// Beyond this many set registers the dense array is smaller in memory.
    const fn sparse_limit(&self) -> usize {
        self.register_count() / 8
    }

    fn densify(&mut self) {
        if let Registers::Sparse(map) = &self.registers {
            let mut regs = vec![0u8; self.register_count()];
            for (&i, &r) in map {
                regs[i as usize] = r;
            }
            self.registers = Registers::Dense(regs.into_boxed_slice());
        }
    }
}

impl PartialEq for HllCounter {
    fn eq(&self, other: &Self) -> bool {
        self.precision == other.precision
            && (0..self.register_count() as u32).all(|i| self.register(i) == other.register(i))
    }
}

impl Eq for HllCounter {}

fn check_precision(precision: u8) -> Result<()> {
    if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        bail!("hll precision {precision} outside [{MIN_PRECISION}, {MAX_PRECISION}]");
    }
    Ok(())
}

#[inline]
fn inv_pow2(rank: u8) -> f64 {
    f64::from(rank).exp2().recip()
}

#[allow(clippy::cast_precision_loss)]
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counter_estimates_zero() -> Result<()> {
        let hll = HllCounter::new(14)?;
        assert_eq!(hll.count_estimate(), 0);
        assert!(!hll.is_dense());
        Ok(())
    }

    #[test]
    fn rank_uses_bits_above_the_index() -> Result<()> {
        let mut hll = HllCounter::new(4)?;
        // index 3, the bit just above the 4 index bits is set
        hll.add_hash(0b1_0011);
        assert_eq!(hll.register(3), 60);
        hll.add_hash(1u64 << 63 | 3);
        assert_eq!(hll.register(3), 60);
        let mut top = HllCounter::new(4)?;
        top.add_hash(1u64 << 63 | 3);
        assert_eq!(top.register(3), 1);
        Ok(())
    }

    #[test]
    fn converts_to_dense_past_the_sparse_limit() -> Result<()> {
        let mut hll = HllCounter::new(8)?;
        for i in 0..10_000u64 {
            hll.add_bytes(&i.to_be_bytes());
        }
        assert!(hll.is_dense());
        Ok(())
    }

    #[test]
    fn sparse_and_dense_payloads_decode_to_equal_counters() -> Result<()> {
        let mut small = HllCounter::new(10)?;
        small.add_bytes(b"a");
        small.add_bytes(b"b");
        let bytes = small.to_bytes();
        assert_eq!(bytes[1], SCHEME_SPARSE);
        assert_eq!(HllCounter::read_registers(&bytes, 10)?, small);

        let mut big = HllCounter::new_dense(10)?;
        for i in 0..5_000u32 {
            big.add_bytes(&i.to_le_bytes());
        }
        let bytes = big.to_bytes();
        assert_eq!(bytes[1], SCHEME_DENSE);
        assert_eq!(bytes.len(), 2 + 1024);
        assert_eq!(HllCounter::read_registers(&bytes, 10)?, big);
        Ok(())
    }

    #[test]
    fn rejects_foreign_precision_and_garbage() -> Result<()> {
        let bytes = HllCounter::new(12)?.to_bytes();
        assert!(HllCounter::read_registers(&bytes, 14).is_err());
        assert!(HllCounter::read_registers(&[14, 7], 14).is_err());
        assert!(HllCounter::read_registers(&[14, SCHEME_DENSE, 0, 0], 14).is_err());
        assert!(HllCounter::read_registers(&[], 14).is_err());
        Ok(())
    }

    #[test]
    fn merge_rejects_mismatched_precision() -> Result<()> {
        let mut a = HllCounter::new(12)?;
        let b = HllCounter::new(14)?;
        assert!(a.merge(&b).is_err());
        Ok(())
    }
}
