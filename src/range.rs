//! Running min/max of dimension columns that do not need a dictionary.

use crate::combine::CombineFn;
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// Inclusive value range seen for one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRangeInfo {
    pub min: String,
    pub max: String,
}

impl DimensionRangeInfo {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self {
            min: value.to_string(),
            max: value.to_string(),
        }
    }

    /// Widen the range to include `value`; never shrinks.
    pub fn extend(&mut self, data_type: DataType, value: &str) {
        if data_type.compare(value, &self.min).is_lt() {
            value.clone_into(&mut self.min);
        }
        if data_type.compare(value, &self.max).is_gt() {
            value.clone_into(&mut self.max);
        }
    }

    /// Widen the range to include all of `other`.
    pub fn union(&mut self, data_type: DataType, other: &Self) {
        self.extend(data_type, &other.min);
        self.extend(data_type, &other.max);
    }
}

/// Combiner over raw values of one column, ordered by its data type.
#[derive(Clone, Copy, Debug)]
pub struct RangeCombiner {
    pub data_type: DataType,
}

impl RangeCombiner {
    #[must_use]
    pub const fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl<'a> CombineFn<&'a str, Option<DimensionRangeInfo>, Option<DimensionRangeInfo>>
    for RangeCombiner
{
    fn create(&self) -> Option<DimensionRangeInfo> {
        None
    }

    fn add_input(&self, acc: &mut Option<DimensionRangeInfo>, v: &'a str) {
        match acc {
            Some(range) => range.extend(self.data_type, v),
            None => *acc = Some(DimensionRangeInfo::new(v)),
        }
    }

    fn merge(&self, acc: &mut Option<DimensionRangeInfo>, other: Option<DimensionRangeInfo>) {
        if let Some(b) = other {
            match acc {
                Some(a) => a.union(self.data_type, &b),
                None => *acc = Some(b),
            }
        }
    }

    fn finish(&self, acc: Option<DimensionRangeInfo>) -> Option<DimensionRangeInfo> {
        acc
    }
}
