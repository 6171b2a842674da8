//! Memory-bounded per-partition deduplication of dictionary values.
//!
//! The deduper remembers which values of each dictionary column it has
//! already let through. When the bytes it holds exceed the budget it forgets
//! everything, so a value may be emitted again after a reset. The merge stage
//! tolerates repeats; the reset only costs duplicate shuffle traffic.

use crate::config::DedupConfig;
use std::collections::HashSet;
use std::mem::size_of;
use tracing::info;

/// Bookkeeping cost charged per remembered value on top of its bytes.
const ENTRY_OVERHEAD: usize = size_of::<String>() + size_of::<u64>();

#[derive(Debug)]
pub struct DictColDeduper {
    config: DedupConfig,
    /// Indexed by column ordinal; `None` for columns without a dictionary.
    seen: Vec<Option<HashSet<String>>>,
    held_bytes: usize,
    resets: u64,
}

impl DictColDeduper {
    /// `dict_columns[ordinal]` marks the columns that are deduplicated.
    #[must_use]
    pub fn new(dict_columns: &[bool], config: DedupConfig) -> Self {
        Self {
            config,
            seen: dict_columns
                .iter()
                .map(|&is_dict| is_dict.then(HashSet::new))
                .collect(),
            held_bytes: 0,
            resets: 0,
        }
    }

    #[must_use]
    pub fn is_dict_col(&self, ordinal: usize) -> bool {
        matches!(self.seen.get(ordinal), Some(Some(_)))
    }

    /// `true` when `value` should be emitted: first sighting in the current
    /// window, or always when deduplication is disabled.
    pub fn add(&mut self, ordinal: usize, value: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Some(Some(set)) = self.seen.get_mut(ordinal) else {
            return true;
        };
        if set.contains(value) {
            return false;
        }
        self.held_bytes += value.len() + ENTRY_OVERHEAD;
        set.insert(value.to_string());
        true
    }

    /// Periodic budget check. Only rows whose index is a multiple of the
    /// check interval look at the budget. Returns whether a reset happened.
    pub fn reset_if_over_budget(&mut self, row_index: u64) -> bool {
        if !self.config.enabled
            || row_index % self.config.check_interval_rows != 0
            || self.held_bytes <= self.config.memory_budget_bytes
        {
            return false;
        }
        info!(
            held_bytes = self.held_bytes,
            budget = self.config.memory_budget_bytes,
            row_index,
            "dictionary value deduper over budget, resetting"
        );
        for set in self.seen.iter_mut().flatten() {
            set.clear();
        }
        self.held_bytes = 0;
        self.resets += 1;
        true
    }

    #[must_use]
    pub const fn held_bytes(&self) -> usize {
        self.held_bytes
    }

    #[must_use]
    pub const fn resets(&self) -> u64 {
        self.resets
    }
}
