//! Shard assignment shared by the extraction and merge stages.
//!
//! Shards `[0, column_shards)` belong to the tracked columns, each column
//! owning a contiguous range in ordinal order. The statistics shards follow.
//! Nothing here depends on worker state, so any worker that resolves the
//! same model and configuration derives the same mapping.

use crate::config::JobConfig;
use crate::cuboid::CuboidId;
use crate::key::STATISTICS_MARKER;
use crate::model::CubeLayout;
use anyhow::{Result, anyhow, bail};
use std::ops::Range;

/// Shard ids travel as the first key byte and must stay below the marker.
pub const MAX_TOTAL_SHARDS: usize = STATISTICS_MARKER as usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducerMapping {
    /// Shard range per column ordinal.
    column_ranges: Vec<Range<usize>>,
    /// Owning column ordinal per column shard.
    shard_columns: Vec<usize>,
    statistics_shards: usize,
}

impl ReducerMapping {
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the total shard count does
    /// not fit in a key byte.
    pub fn new(layout: &CubeLayout, config: &JobConfig) -> Result<Self> {
        config.validate()?;
        let mut column_ranges = Vec::with_capacity(layout.columns.len());
        let mut shard_columns = Vec::new();
        for col in &layout.columns {
            let begin = shard_columns.len();
            shard_columns.extend(std::iter::repeat_n(col.ordinal, col.shards.max(1)));
            column_ranges.push(begin..shard_columns.len());
        }

        let statistics_shards = layout
            .cuboids
            .len()
            .div_ceil(config.hll_cuboids_per_shard)
            .clamp(1, config.hll_max_shards);

        let total = shard_columns.len() + statistics_shards;
        if total > MAX_TOTAL_SHARDS {
            bail!(
                "cube {} needs {total} shards, at most {MAX_TOTAL_SHARDS} are addressable",
                layout.cube_name
            );
        }
        Ok(Self {
            column_ranges,
            shard_columns,
            statistics_shards,
        })
    }

    #[must_use]
    pub fn total_shards(&self) -> usize {
        self.shard_columns.len() + self.statistics_shards
    }

    #[must_use]
    pub fn column_shard_count(&self) -> usize {
        self.shard_columns.len()
    }

    #[must_use]
    pub const fn statistics_shard_count(&self) -> usize {
        self.statistics_shards
    }

    #[must_use]
    pub fn is_statistics_shard(&self, shard: usize) -> bool {
        (self.shard_columns.len()..self.total_shards()).contains(&shard)
    }

    /// Column ordinal owning `shard`, `None` for statistics or unknown shards.
    #[must_use]
    pub fn column_for_shard(&self, shard: usize) -> Option<usize> {
        self.shard_columns.get(shard).copied()
    }

    #[must_use]
    pub fn shards_for_column(&self, ordinal: usize) -> Option<Range<usize>> {
        self.column_ranges.get(ordinal).cloned()
    }

    /// Shard of a column value. Single-shard columns ignore `value`; sharded
    /// columns spread values over their range by hash.
    ///
    /// # Errors
    ///
    /// Fails for an ordinal the layout does not define.
    #[allow(clippy::cast_possible_truncation)]
    pub fn reducer_id_for_column(&self, ordinal: usize, value: Option<&str>) -> Result<usize> {
        let range = self
            .column_ranges
            .get(ordinal)
            .ok_or_else(|| anyhow!("no column with ordinal {ordinal}"))?;
        let span = range.len();
        if span <= 1 {
            return Ok(range.start);
        }
        let offset = value.map_or(0, |v| {
            let (lo, _) = mur3::murmurhash3_x64_128(v.as_bytes(), 0);
            (lo % span as u64) as usize
        });
        Ok(range.start + offset)
    }

    /// Statistics shard of a cuboid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn reducer_id_for_cuboid(&self, cuboid: CuboidId) -> usize {
        let slot = cuboid.unsigned_abs() % self.statistics_shards as u64;
        self.shard_columns.len() + slot as usize
    }
}
