//! Routing intermediate records to shards and grouping them by key.

use crate::extract::IntermediateRecord;
use crate::key::SortableKey;
use crate::mapping::ReducerMapping;
use anyhow::{Result, bail};

/// One shard's input: distinct keys in ascending order with every value
/// sent under each key.
pub type ShardInput = Vec<(SortableKey, Vec<Vec<u8>>)>;

/// Shard lookup for a key; the same function the extraction side used to
/// address it.
#[derive(Clone, Copy, Debug)]
pub struct FactDistinctPartitioner<'a> {
    mapping: &'a ReducerMapping,
}

impl<'a> FactDistinctPartitioner<'a> {
    #[must_use]
    pub const fn new(mapping: &'a ReducerMapping) -> Self {
        Self { mapping }
    }

    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.mapping.total_shards()
    }

    /// Statistics keys go to their cuboid's shard; column keys carry their
    /// shard in the first byte.
    ///
    /// # Errors
    ///
    /// Fails on a malformed statistics key or a column shard byte the
    /// mapping does not define.
    pub fn partition(&self, key: &SortableKey) -> Result<usize> {
        if key.is_statistics() {
            return Ok(self.mapping.reducer_id_for_cuboid(key.cuboid()?));
        }
        let shard = usize::from(key.lead_byte());
        if self.mapping.column_for_shard(shard).is_none() {
            bail!(
                "column key addressed to shard {shard}, only {} column shards exist",
                self.mapping.column_shard_count()
            );
        }
        Ok(shard)
    }

    /// Distribute records into one bucket per shard, keeping arrival order.
    ///
    /// # Errors
    ///
    /// Fails on the first record that cannot be routed.
    pub fn route<I>(&self, records: I) -> Result<Vec<Vec<IntermediateRecord>>>
    where
        I: IntoIterator<Item = IntermediateRecord>,
    {
        let mut buckets: Vec<Vec<IntermediateRecord>> =
            (0..self.num_partitions()).map(|_| Vec::new()).collect();
        for rec in records {
            let shard = self.partition(&rec.key)?;
            buckets[shard].push(rec);
        }
        Ok(buckets)
    }
}

/// Sort one bucket by key and collect the values of equal keys.
#[must_use]
pub fn group_sorted(mut bucket: Vec<IntermediateRecord>) -> ShardInput {
    // stable, so values keep arrival order within a key
    bucket.sort_by(|a, b| a.key.cmp(&b.key));
    let mut out: ShardInput = Vec::new();
    for rec in bucket {
        match out.last_mut() {
            Some((key, values)) if *key == rec.key => values.push(rec.value),
            _ => out.push((rec.key, vec![rec.value])),
        }
    }
    out
}
