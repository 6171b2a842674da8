//! Job counters, accumulated per partition and summed across the run.

use crate::combine::{CombineFn, Sum};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub source_records: u64,
    /// UTF-8 field lengths plus one delimiter byte per field; a null counts one.
    pub source_bytes: u64,
    pub intermediate_records: u64,
    pub output_records: u64,
    pub dedup_resets: u64,
}

impl JobCounters {
    pub fn merge(&mut self, other: &Self) {
        Sum.merge(&mut self.source_records, other.source_records);
        Sum.merge(&mut self.source_bytes, other.source_bytes);
        Sum.merge(&mut self.intermediate_records, other.intermediate_records);
        Sum.merge(&mut self.output_records, other.output_records);
        Sum.merge(&mut self.dedup_resets, other.dedup_resets);
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize counters")
    }
}

/// Size of one row as counted in [`JobCounters::source_bytes`].
#[must_use]
pub fn row_size_bytes(row: &[Option<String>]) -> u64 {
    Sum.build_from(row.iter().map(|field| field.as_ref().map_or(1, |s| s.len() as u64) + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_counts_one_plus_delimiter() {
        let row = vec![Some("ab".to_string()), None, Some("é".to_string())];
        assert_eq!(row_size_bytes(&row), 3 + 2 + 3);
    }
}
