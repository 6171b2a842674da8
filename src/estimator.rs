//! Per-cuboid cardinality sampling.
//!
//! [`CuboidStatCalculator`] owns one [`HllCounter`] per cuboid and folds each
//! sampled row into all of them. Two hashing schemes exist; a cube keeps the
//! one it was first built with, see [`CardinalityAlgorithm`].

use crate::cuboid::{CuboidBitSet, CuboidId};
use crate::hll::HllCounter;
use crate::model::CubeLayout;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Hashed in place of a null row-key field.
static NULL_SENTINEL: [u8; 4] = [0; 4];
const DIGEST_LEN: usize = 16;

/// How a row's row-key values are combined into one hash per cuboid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardinalityAlgorithm {
    /// Digest every row-key value, then digest the concatenated digests of
    /// the cuboid's columns. One rehash per cuboid per row.
    HashOfHashes,
    /// Hash every row-key value with a position-dependent seed, add the
    /// position, and sum the results of the cuboid's columns. One addition
    /// per column per cuboid; the position terms keep `(a, b)` and `(b, a)`
    /// apart.
    OrderSensitiveSum,
}

/// 128-bit digest of one row-key value.
#[must_use]
pub fn value_digest(value: Option<&str>) -> [u8; DIGEST_LEN] {
    let bytes = value.map_or(&NULL_SENTINEL[..], str::as_bytes);
    let (lo, hi) = mur3::murmurhash3_x64_128(bytes, 0);
    let mut out = [0u8; DIGEST_LEN];
    out[..8].copy_from_slice(&lo.to_le_bytes());
    out[8..].copy_from_slice(&hi.to_le_bytes());
    out
}

/// Position-perturbed 64-bit hash of the value at row-key `ordinal`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn order_sensitive_hash(value: Option<&str>, ordinal: usize) -> u64 {
    let bytes = value.map_or(&NULL_SENTINEL[..], str::as_bytes);
    let (lo, _hi) = mur3::murmurhash3_x64_128(bytes, ordinal as u32);
    lo.wrapping_add(ordinal as u64)
}

/// Fold sampled rows into one sketch per cuboid.
pub struct CuboidStatCalculator {
    algorithm: CardinalityAlgorithm,
    row_key_positions: Vec<usize>,
    cuboids: Vec<CuboidBitSet>,
    counters: Vec<HllCounter>,
    // per-row scratch, overwritten on every call
    digests: Vec<[u8; DIGEST_LEN]>,
    hashes: Vec<u64>,
    concat: Vec<u8>,
}

impl CuboidStatCalculator {
    /// Fresh dense counters for every cuboid of `layout`.
    ///
    /// # Errors
    ///
    /// Fails when the layout's precision is invalid.
    pub fn new(layout: &CubeLayout) -> Result<Self> {
        let counters = layout
            .cuboids
            .iter()
            .map(|_| HllCounter::new_dense(layout.hll_precision))
            .collect::<Result<Vec<_>>>()?;
        let n = layout.row_key_positions.len();
        Ok(Self {
            algorithm: layout.algorithm,
            row_key_positions: layout.row_key_positions.clone(),
            cuboids: layout.cuboids.clone(),
            counters,
            digests: vec![[0; DIGEST_LEN]; n],
            hashes: vec![0; n],
            concat: Vec::with_capacity(n * DIGEST_LEN),
        })
    }

    #[must_use]
    pub const fn algorithm(&self) -> CardinalityAlgorithm {
        self.algorithm
    }

    /// Add one row to every cuboid's counter. The row is only read.
    ///
    /// # Errors
    ///
    /// Fails when the row is narrower than a row-key position.
    pub fn put_row(&mut self, row: &[Option<String>]) -> Result<()> {
        for (i, &pos) in self.row_key_positions.iter().enumerate() {
            let Some(field) = row.get(pos) else {
                bail!(
                    "row has {} fields but row-key column {i} is at position {pos}",
                    row.len()
                );
            };
            let value = field.as_deref();
            match self.algorithm {
                CardinalityAlgorithm::HashOfHashes => self.digests[i] = value_digest(value),
                CardinalityAlgorithm::OrderSensitiveSum => {
                    self.hashes[i] = order_sensitive_hash(value, i);
                }
            }
        }

        for (cuboid, counter) in self.cuboids.iter().zip(self.counters.iter_mut()) {
            match self.algorithm {
                CardinalityAlgorithm::HashOfHashes => {
                    self.concat.clear();
                    for &ord in &cuboid.ordinals {
                        self.concat.extend_from_slice(&self.digests[ord]);
                    }
                    let (lo, hi) = mur3::murmurhash3_x64_128(&self.concat, 0);
                    let mut digest = [0u8; DIGEST_LEN];
                    digest[..8].copy_from_slice(&lo.to_le_bytes());
                    digest[8..].copy_from_slice(&hi.to_le_bytes());
                    counter.add_bytes(&digest);
                }
                CardinalityAlgorithm::OrderSensitiveSum => {
                    let sum = cuboid
                        .ordinals
                        .iter()
                        .fold(0u64, |acc, &ord| acc.wrapping_add(self.hashes[ord]));
                    counter.add_hash(sum);
                }
            }
        }
        Ok(())
    }

    /// Counters, index-aligned with [`CuboidStatCalculator::cuboid_ids`].
    #[must_use]
    pub fn hll_counters(&self) -> &[HllCounter] {
        &self.counters
    }

    #[must_use]
    pub fn cuboid_ids(&self) -> Vec<CuboidId> {
        self.cuboids.iter().map(|c| c.id).collect()
    }

    /// Consume the calculator, pairing each cuboid id with its counter.
    #[must_use]
    pub fn into_counters(self) -> Vec<(CuboidId, HllCounter)> {
        self.cuboids
            .into_iter()
            .map(|c| c.id)
            .zip(self.counters)
            .collect()
    }
}
