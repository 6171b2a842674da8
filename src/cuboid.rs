//! Cuboid ids and their row-key column bit sets.
//!
//! A cuboid id is a bitmask over the row-key columns. The most significant of
//! the `n` row-key bits selects row-key column 0, so the base cuboid (all
//! columns) is `(1 << n) - 1` and cuboid `0b100` over three columns is the
//! cuboid of the first row-key column alone.

use anyhow::{Result, bail};

/// Bitmask over row-key positions.
pub type CuboidId = i64;

/// Longest row key a cuboid id can describe while staying a positive `i64`.
pub const MAX_ROW_KEY_COLUMNS: usize = 62;

/// Cuboid id covering every row-key column.
#[must_use]
pub const fn base_cuboid_id(n_row_key: usize) -> CuboidId {
    (1i64 << n_row_key) - 1
}

/// The row-key ordinals participating in one cuboid, ascending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CuboidBitSet {
    pub id: CuboidId,
    pub ordinals: Vec<usize>,
}

impl CuboidBitSet {
    /// Materialize the ordinals set in `id`.
    ///
    /// # Errors
    ///
    /// Fails when `id` has bits outside the row key or selects no column.
    pub fn new(id: CuboidId, n_row_key: usize) -> Result<Self> {
        if n_row_key == 0 || n_row_key > MAX_ROW_KEY_COLUMNS {
            bail!("row key must have 1..={MAX_ROW_KEY_COLUMNS} columns, got {n_row_key}");
        }
        let base = base_cuboid_id(n_row_key);
        if id <= 0 || id & !base != 0 {
            bail!("cuboid {id} is not a subset of base cuboid {base}");
        }
        let ordinals = (0..n_row_key)
            .filter(|i| id & (1i64 << (n_row_key - 1 - i)) != 0)
            .collect();
        Ok(Self { id, ordinals })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// Bit sets for every id, index-aligned with `ids`.
///
/// # Errors
///
/// Propagates the first invalid cuboid id.
pub fn cuboid_bit_sets(ids: &[CuboidId], n_row_key: usize) -> Result<Vec<CuboidBitSet>> {
    ids.iter().map(|&id| CuboidBitSet::new(id, n_row_key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_significant_bit_is_first_column() -> Result<()> {
        assert_eq!(CuboidBitSet::new(0b100, 3)?.ordinals, vec![0]);
        assert_eq!(CuboidBitSet::new(0b011, 3)?.ordinals, vec![1, 2]);
        assert_eq!(CuboidBitSet::new(base_cuboid_id(3), 3)?.ordinals, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn rejects_ids_outside_row_key() {
        assert!(CuboidBitSet::new(0b1000, 3).is_err());
        assert!(CuboidBitSet::new(0, 3).is_err());
        assert!(CuboidBitSet::new(-1, 3).is_err());
    }
}
