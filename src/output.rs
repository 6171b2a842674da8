//! Tagged output records and the sink that receives them.
//!
//! The merge stage never touches files. It tags every record with a channel
//! and a file-name hint relative to the job's output root, and the sink
//! decides where bytes go.

use crate::model::ColumnRef;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DICT_FILE_SUFFIX: &str = ".rldict";
pub const DIMENSION_RANGE_FILE_SUFFIX: &str = ".dci";
pub const STATISTICS_FILE_NAME: &str = "statistics/statistics";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Deduplicated raw values for an external dictionary builder.
    ColumnValues,
    Dictionary,
    Statistics,
    DimensionRange,
}

impl OutputChannel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ColumnValues => "column",
            Self::Dictionary => "dict",
            Self::Statistics => "statistics",
            Self::DimensionRange => "partition",
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputRecord {
    pub channel: OutputChannel,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Path relative to the output root.
    pub file_name: String,
}

impl OutputRecord {
    #[must_use]
    pub fn new(channel: OutputChannel, key: Vec<u8>, value: Vec<u8>, file_name: String) -> Self {
        Self {
            channel,
            key,
            value,
            file_name,
        }
    }
}

/// `IDENTITY/`
#[must_use]
pub fn column_values_file(col: &ColumnRef) -> String {
    format!("{}/", col.identity())
}

/// `IDENTITY/NAME.rldict`
#[must_use]
pub fn dictionary_file(col: &ColumnRef) -> String {
    format!("{}/{}{DICT_FILE_SUFFIX}", col.identity(), col.name())
}

/// `IDENTITY/NAME.dci`
#[must_use]
pub fn dimension_range_file(col: &ColumnRef) -> String {
    format!("{}/{}{DIMENSION_RANGE_FILE_SUFFIX}", col.identity(), col.name())
}

/// Receives the records of one shard.
pub trait OutputSink {
    /// # Errors
    ///
    /// Implementations report failures to accept the record.
    fn emit(&mut self, record: OutputRecord) -> Result<()>;
}

/// Collects records in memory.
#[derive(Clone, Debug, Default)]
pub struct VecSink {
    pub records: Vec<OutputRecord>,
}

impl VecSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<OutputRecord> {
        self.records
    }

    pub fn channel(&self, channel: OutputChannel) -> impl Iterator<Item = &OutputRecord> {
        self.records.iter().filter(move |r| r.channel == channel)
    }
}

impl OutputSink for VecSink {
    fn emit(&mut self, record: OutputRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }
}
