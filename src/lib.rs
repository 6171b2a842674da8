//! # fact-distinct
//!
//! The statistics-and-dictionary pre-aggregation stage of a cube build.
//! For every fact-table row it
//!
//! - extracts and deduplicates values of columns that need an encoding
//!   dictionary,
//! - tracks min/max of dimension columns that do not,
//! - approximates, per cuboid, the number of distinct row-key combinations
//!   with mergeable `HyperLogLog` sketches.
//!
//! Partial results from many partitions are merged per shard into
//! dictionaries (or raw distinct values), dimension ranges and cuboid
//! statistics.
//!
//! ## Quick Start
//!
//! ```
//! use fact_distinct::testing::{id_and_city_model, id_and_city_rows};
//! use fact_distinct::{JobConfig, MergedStatistics, OutputChannel, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let model = id_and_city_model();
//! let rows = id_and_city_rows(1000, 25);
//!
//! let out = Runner::default().run(&model, &JobConfig::default(), &rows)?;
//!
//! // CITY gets a dictionary built in the merge stage
//! assert_eq!(out.channel(OutputChannel::Dictionary).count(), 1);
//!
//! let stats = MergedStatistics::from_records(&out.records, model.hll_precision)?;
//! let base = stats.estimate(0b11).unwrap_or(0);
//! assert!((980..=1020).contains(&base));
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! ### Extraction
//!
//! [`LocalExtractor`] consumes one partition. Dictionary values go through a
//! memory-bounded [`DictColDeduper`], other dimensions through a running
//! [`DimensionRangeInfo`], and sampled rows into a [`CuboidStatCalculator`].
//!
//! ### Shuffle
//!
//! Every intermediate key is a [`SortableKey`]. [`ReducerMapping`] assigns
//! each column a contiguous range of shards followed by the statistics
//! shards; [`FactDistinctPartitioner`] applies it on the consuming side.
//!
//! ### Merge
//!
//! [`ShardMerger`] handles one shard: merged cuboid sketches and overlap
//! statistics on statistics shards, dictionaries or raw values plus ranges
//! on column shards. Records go to an [`OutputSink`] tagged with an
//! [`OutputChannel`] and a relative file name.
//!
//! ## Execution
//!
//! [`Runner`] drives all three stages in process, sequentially or with
//! rayon ([`ExecMode`]).
//!
//! ## Configuration
//!
//! [`CubeModel`] and [`JobConfig`] both deserialize from JSON.
//!
//! ## Logging
//!
//! Diagnostics are emitted through `tracing`; install a subscriber to see
//! them.

pub mod combine;
pub mod config;
pub mod counters;
pub mod cuboid;
pub mod dedup;
pub mod dictionary;
pub mod estimator;
pub mod extract;
pub mod hll;
pub mod key;
pub mod mapping;
pub mod merge;
pub mod model;
pub mod output;
pub mod range;
pub mod runner;
pub mod shuffle;
pub mod types;
pub mod worker;

pub mod testing;

pub use combine::CombineFn;
pub use config::{DedupConfig, JobConfig};
pub use counters::JobCounters;
pub use cuboid::{CuboidBitSet, CuboidId};
pub use dedup::DictColDeduper;
pub use dictionary::{Dictionary, DictionaryBuilder, builder_for};
pub use estimator::{CardinalityAlgorithm, CuboidStatCalculator};
pub use extract::{ExtractOutput, IntermediateRecord, LocalExtractor};
pub use hll::HllCounter;
pub use key::{STATISTICS_MARKER, SortableKey};
pub use mapping::ReducerMapping;
pub use merge::{MergeState, MergedStatistics, ShardMerger};
pub use model::{ColumnDesc, ColumnRef, CubeLayout, CubeModel, Row};
pub use output::{OutputChannel, OutputRecord, OutputSink, VecSink};
pub use range::{DimensionRangeInfo, RangeCombiner};
pub use runner::{ExecMode, JobOutput, Runner};
pub use shuffle::FactDistinctPartitioner;
pub use types::DataType;
pub use worker::{InitOnce, WorkerContext};
