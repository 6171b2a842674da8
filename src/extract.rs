//! Local extraction and sampling: the map side of the job.
//!
//! A [`LocalExtractor`] sees one partition's rows exactly once. For each row
//! it
//!
//! 1. emits every first-seen value of a dictionary column as a column key
//!    addressed to the column's shard,
//! 2. widens the running range of every other tracked dimension,
//! 3. feeds sampled rows (`row_index % 100 < sampling_percent`) to the
//!    per-cuboid sketches,
//! 4. counts source bytes.
//!
//! [`LocalExtractor::finish`] then emits one statistics record per cuboid
//! followed by a min and a max record per range-tracked column.

use crate::combine::CombineFn;
use crate::counters::{JobCounters, row_size_bytes};
use crate::dedup::DictColDeduper;
use crate::estimator::CuboidStatCalculator;
use crate::key::{KeyEncoder, SortableKey};
use crate::mapping::ReducerMapping;
use crate::model::ColumnRef;
use crate::range::{DimensionRangeInfo, RangeCombiner};
use crate::worker::WorkerContext;
use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const LOGGED_SAMPLE_OUTPUTS: usize = 10;

/// Keyed record between the extraction and merge stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntermediateRecord {
    pub key: SortableKey,
    /// Sketch payload for statistics keys, empty for column keys.
    pub value: Vec<u8>,
}

/// Everything one partition produced.
#[derive(Clone, Debug, Default)]
pub struct ExtractOutput {
    pub records: Vec<IntermediateRecord>,
    pub counters: JobCounters,
}

pub struct LocalExtractor {
    ctx: Arc<WorkerContext>,
    deduper: DictColDeduper,
    ranges: BTreeMap<usize, Option<DimensionRangeInfo>>,
    estimator: CuboidStatCalculator,
    encoder: KeyEncoder,
    records: Vec<IntermediateRecord>,
    counters: JobCounters,
    row_index: u64,
}

impl LocalExtractor {
    /// # Errors
    ///
    /// Fails when the sketches cannot be created for the layout's precision.
    pub fn new(ctx: Arc<WorkerContext>) -> Result<Self> {
        let layout = &ctx.layout;
        let dict_columns: Vec<bool> = layout.columns.iter().map(|c| c.needs_dictionary).collect();
        let deduper = DictColDeduper::new(&dict_columns, ctx.config.dedup.clone());
        let ranges = layout
            .columns
            .iter()
            .filter(|c| !c.needs_dictionary)
            .map(|c| (c.ordinal, None))
            .collect();
        let estimator = CuboidStatCalculator::new(layout)?;
        Ok(Self {
            ctx,
            deduper,
            ranges,
            estimator,
            encoder: KeyEncoder::default(),
            records: Vec::new(),
            counters: JobCounters::default(),
            row_index: 0,
        })
    }

    /// Fold one row.
    ///
    /// # Errors
    ///
    /// A row narrower than a configured column position means the model does
    /// not describe the input; the whole partition must be abandoned.
    pub fn process_row(&mut self, row: &[Option<String>]) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        self.counters.source_records += 1;
        self.counters.source_bytes += row_size_bytes(row);

        for col in &ctx.layout.columns {
            let field = row.get(col.position).ok_or_else(|| {
                anyhow!(
                    "row {} has {} fields, column {} expects position {}",
                    self.row_index,
                    row.len(),
                    col.identity(),
                    col.position
                )
            })?;
            let Some(value) = field.as_deref() else {
                continue;
            };
            if col.needs_dictionary {
                if self.deduper.add(col.ordinal, value) {
                    push_value(&ctx.mapping, &mut self.encoder, &mut self.records, col, value)?;
                }
            } else if let Some(acc) = self.ranges.get_mut(&col.ordinal) {
                RangeCombiner::new(col.data_type()).add_input(acc, value);
            }
        }

        if self.row_index % 100 < u64::from(ctx.config.sampling_percent) {
            self.estimator
                .put_row(row)
                .with_context(|| format!("sampling row {}", self.row_index))?;
        }
        if self.deduper.reset_if_over_budget(self.row_index) {
            self.counters.dedup_resets += 1;
        }
        self.row_index += 1;
        Ok(())
    }

    /// Emit the sketches and ranges and hand back everything produced.
    ///
    /// # Errors
    ///
    /// Fails when a range value cannot be addressed to its shard.
    pub fn finish(self) -> Result<ExtractOutput> {
        let Self {
            ctx,
            estimator,
            ranges,
            mut encoder,
            mut records,
            mut counters,
            ..
        } = self;
        for (cuboid, hll) in estimator.into_counters() {
            records.push(IntermediateRecord {
                key: SortableKey::statistics(cuboid),
                value: hll.to_bytes(),
            });
        }

        for (ordinal, range) in ranges {
            let Some(range) = range else { continue };
            let col = ctx
                .layout
                .column(ordinal)
                .ok_or_else(|| anyhow!("no column with ordinal {ordinal}"))?;
            push_value(&ctx.mapping, &mut encoder, &mut records, col, &range.min)?;
            push_value(&ctx.mapping, &mut encoder, &mut records, col, &range.max)?;
        }

        counters.intermediate_records = records.len() as u64;
        Ok(ExtractOutput { records, counters })
    }
}

fn push_value(
    mapping: &ReducerMapping,
    encoder: &mut KeyEncoder,
    records: &mut Vec<IntermediateRecord>,
    col: &ColumnRef,
    value: &str,
) -> Result<()> {
    let shard = mapping.reducer_id_for_column(col.ordinal, Some(value))?;
    let shard_byte =
        u8::try_from(shard).with_context(|| format!("shard {shard} exceeds a key byte"))?;
    let key = encoder.column_key(col.data_type(), shard_byte, value)?;
    records.push(IntermediateRecord {
        key,
        value: Vec::new(),
    });
    if records.len() < LOGGED_SAMPLE_OUTPUTS {
        debug!(column = %col.identity(), value, shard, "sample output");
    }
    Ok(())
}

/// Run a whole partition through a fresh extractor.
///
/// # Errors
///
/// Propagates the first row or emission error.
pub fn extract_partition<'a, I>(ctx: Arc<WorkerContext>, rows: I) -> Result<ExtractOutput>
where
    I: IntoIterator<Item = &'a [Option<String>]>,
{
    let mut extractor = LocalExtractor::new(ctx)?;
    for row in rows {
        extractor.process_row(row)?;
    }
    extractor.finish()
}
