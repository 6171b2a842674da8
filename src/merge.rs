//! The merge stage: one [`ShardMerger`] per shard.
//!
//! A shard is either the statistics shard for some cuboids or a shard of a
//! single column, decided once from the shard id.
//!
//! * Statistics shards decode every sketch, merge them per cuboid, and emit
//!   the overlap ratio (`-1`), the sampling unit count (`-2`), the sampling
//!   percent (`0`) and one merged sketch per cuboid in ascending order.
//! * Column shards feed values to a local dictionary builder or pass them
//!   through raw, and track min/max for non-derived dimensions.
//!
//! ```text
//! Uninitialized -> Initialized -> Accumulating -> Finalizing -> Done
//! ```

use crate::combine::CombineFn;
use crate::cuboid::CuboidId;
use crate::dictionary::{DictionaryBuilder, builder_for};
use crate::hll::HllCounter;
use crate::key::SortableKey;
use crate::model::ColumnRef;
use crate::output::{
    OutputChannel, OutputRecord, OutputSink, STATISTICS_FILE_NAME, column_values_file,
    dictionary_file, dimension_range_file,
};
use crate::range::{DimensionRangeInfo, RangeCombiner};
use crate::shuffle::ShardInput;
use crate::worker::WorkerContext;
use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Statistics output key of the mapper overlap ratio.
pub const OVERLAP_RATIO_KEY: i64 = -1;
/// Statistics output key of the sampling unit count.
pub const SAMPLING_UNITS_KEY: i64 = -2;
/// Statistics output key of the sampling percent.
pub const SAMPLING_PERCENT_KEY: i64 = 0;

const LOGGED_RECEIVED_VALUES: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeState {
    Uninitialized,
    Initialized,
    Accumulating,
    Finalizing,
    Done,
}

enum Role {
    Statistics(StatisticsAcc),
    Column(ColumnAcc),
}

struct StatisticsAcc {
    base_cuboid: CuboidId,
    precision: u8,
    /// Estimate of each incoming base-cuboid sketch, one per sampling unit.
    base_per_unit: Vec<u64>,
    cuboids: BTreeMap<CuboidId, HllCounter>,
    total_before_merge: u64,
}

struct ColumnAcc {
    col: ColumnRef,
    builder: Option<Box<dyn DictionaryBuilder>>,
    range: Option<DimensionRangeInfo>,
}

pub struct ShardMerger {
    ctx: Arc<WorkerContext>,
    shard: usize,
    state: MergeState,
    role: Option<Role>,
    received: u64,
    emitted: u64,
}

impl ShardMerger {
    #[must_use]
    pub fn new(ctx: Arc<WorkerContext>, shard: usize) -> Self {
        Self {
            ctx,
            shard,
            state: MergeState::Uninitialized,
            role: None,
            received: 0,
            emitted: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> MergeState {
        self.state
    }

    #[must_use]
    pub fn is_statistics(&self) -> bool {
        matches!(self.role, Some(Role::Statistics(_)))
    }

    /// Decide the shard's mode. Called implicitly by the first
    /// [`ShardMerger::accept`].
    ///
    /// # Errors
    ///
    /// Fails for a shard id outside the mapping or a repeated call.
    pub fn init(&mut self) -> Result<()> {
        if self.state != MergeState::Uninitialized {
            bail!("shard {} initialized twice", self.shard);
        }
        let mapping = &self.ctx.mapping;
        let layout = &self.ctx.layout;
        let role = if mapping.is_statistics_shard(self.shard) {
            info!(shard = self.shard, "shard handles statistics");
            Role::Statistics(StatisticsAcc {
                base_cuboid: layout.base_cuboid,
                precision: layout.hll_precision,
                base_per_unit: Vec::new(),
                cuboids: BTreeMap::new(),
                total_before_merge: 0,
            })
        } else {
            let ordinal = mapping.column_for_shard(self.shard).ok_or_else(|| {
                anyhow!(
                    "shard {} outside [0, {})",
                    self.shard,
                    mapping.total_shards()
                )
            })?;
            let col = layout
                .column(ordinal)
                .ok_or_else(|| anyhow!("no column with ordinal {ordinal}"))?
                .clone();
            let builder = self.local_builder(&col);
            info!(
                shard = self.shard,
                column = %col.identity(),
                build_dict_locally = builder.is_some(),
                "shard handles column"
            );
            Role::Column(ColumnAcc {
                col,
                builder,
                range: None,
            })
        };
        self.role = Some(role);
        self.state = MergeState::Initialized;
        Ok(())
    }

    fn local_builder(&self, col: &ColumnRef) -> Option<Box<dyn DictionaryBuilder>> {
        let single_shard = self
            .ctx
            .mapping
            .shards_for_column(col.ordinal)
            .is_some_and(|r| r.len() == 1);
        if !col.needs_dictionary
            || !self.ctx.config.build_dict_locally
            || col.custom_dictionary
            || !single_shard
        {
            return None;
        }
        let mut builder = builder_for(col.data_type());
        match builder.as_mut() {
            Some(b) => b.init(0),
            None => warn!(
                column = %col.identity(),
                data_type = %col.data_type(),
                "no local dictionary builder for type, emitting raw values"
            ),
        }
        builder
    }

    /// Consume one key group.
    ///
    /// # Errors
    ///
    /// Fails on a key of the wrong kind for this shard, a corrupt sketch, a
    /// sketch of the wrong precision, a value the local dictionary builder
    /// rejects, or a call after [`ShardMerger::finish`].
    pub fn accept(
        &mut self,
        key: &SortableKey,
        values: &[Vec<u8>],
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        match self.state {
            MergeState::Uninitialized => self.init()?,
            MergeState::Initialized | MergeState::Accumulating => {}
            MergeState::Finalizing | MergeState::Done => {
                bail!("shard {} already finished", self.shard)
            }
        }
        self.state = MergeState::Accumulating;
        let shard = self.shard;
        match self.role.as_mut() {
            Some(Role::Statistics(acc)) => {
                let cuboid = key
                    .cuboid()
                    .with_context(|| format!("statistics shard {shard} got a column key"))?;
                for payload in values {
                    acc.add_sketch(cuboid, payload)
                        .with_context(|| format!("shard {shard}, cuboid {cuboid}"))?;
                }
            }
            Some(Role::Column(acc)) => {
                if key.is_statistics() || usize::from(key.lead_byte()) != shard {
                    bail!("column shard {shard} got a foreign key");
                }
                let value = key.value()?;
                if self.received < LOGGED_RECEIVED_VALUES {
                    debug!(shard, value, "received value");
                }
                self.emitted += acc.add_value(value, sink)?;
            }
            None => bail!("shard {shard} has no role"),
        }
        self.received += 1;
        Ok(())
    }

    /// Emit the shard's final records. Returns how many records the shard
    /// emitted in total.
    ///
    /// # Errors
    ///
    /// Fails if called twice or if the sink or dictionary build fails.
    pub fn finish(&mut self, sink: &mut dyn OutputSink) -> Result<u64> {
        match self.state {
            MergeState::Uninitialized => self.init()?,
            MergeState::Finalizing | MergeState::Done => {
                bail!("shard {} already finished", self.shard)
            }
            _ => {}
        }
        self.state = MergeState::Finalizing;
        let sampling_percent = self.ctx.config.sampling_percent;
        self.emitted += match self.role.take() {
            Some(Role::Statistics(acc)) => acc.emit(self.shard, sampling_percent, sink)?,
            Some(Role::Column(acc)) => acc.emit(sink)?,
            None => bail!("shard {} has no role", self.shard),
        };
        self.state = MergeState::Done;
        Ok(self.emitted)
    }
}

impl StatisticsAcc {
    fn add_sketch(&mut self, cuboid: CuboidId, payload: &[u8]) -> Result<()> {
        let hll = HllCounter::read_registers(payload, self.precision)?;
        let estimate = hll.count_estimate();
        self.total_before_merge += estimate;
        if cuboid == self.base_cuboid {
            self.base_per_unit.push(estimate);
        }
        match self.cuboids.get_mut(&cuboid) {
            Some(merged) => merged.merge(&hll)?,
            None => {
                self.cuboids.insert(cuboid, hll);
            }
        }
        Ok(())
    }

    /// Sum of per-unit base estimates over the merged base estimate.
    #[allow(clippy::cast_precision_loss)]
    fn overlap_ratio(&self) -> f64 {
        let merged = self
            .cuboids
            .get(&self.base_cuboid)
            .map_or(0, HllCounter::count_estimate);
        if merged == 0 {
            return 0.0;
        }
        self.base_per_unit.iter().sum::<u64>() as f64 / merged as f64
    }

    fn emit(self, shard: usize, sampling_percent: u32, sink: &mut dyn OutputSink) -> Result<u64> {
        info!(shard, cuboids = self.cuboids.len(), sampling_percent, "statistics collected from sampled rows");
        info!(shard, sampling_units = self.base_per_unit.len(), "sampling units");
        for (i, rows) in self.base_per_unit.iter().enumerate() {
            if *rows > 0 {
                info!(shard, unit = i, rows, "base cuboid row count in sampling unit");
            }
        }
        let mut after_merge = 0u64;
        for (cuboid, hll) in &self.cuboids {
            let rows = hll.count_estimate();
            after_merge += rows;
            info!(shard, cuboid, rows, "cuboid row count");
        }
        info!(
            shard,
            before_merge = self.total_before_merge,
            after_merge,
            "sum of cuboid row counts"
        );

        let ratio = self.overlap_ratio();
        let units = i32::try_from(self.base_per_unit.len()).context("too many sampling units")?;
        let percent = i32::try_from(sampling_percent).context("sampling percent out of range")?;
        let mut emitted = 0;
        let mut put = |key: i64, value: Vec<u8>| -> Result<()> {
            emitted += 1;
            sink.emit(OutputRecord::new(
                OutputChannel::Statistics,
                key.to_be_bytes().to_vec(),
                value,
                STATISTICS_FILE_NAME.to_string(),
            ))
        };
        put(OVERLAP_RATIO_KEY, ratio.to_be_bytes().to_vec())?;
        put(SAMPLING_UNITS_KEY, units.to_be_bytes().to_vec())?;
        put(SAMPLING_PERCENT_KEY, percent.to_be_bytes().to_vec())?;
        for (cuboid, hll) in &self.cuboids {
            put(*cuboid, hll.to_bytes())?;
        }
        Ok(emitted)
    }
}

impl ColumnAcc {
    fn add_value(&mut self, value: &str, sink: &mut dyn OutputSink) -> Result<u64> {
        if self.col.tracks_range {
            RangeCombiner::new(self.col.data_type()).add_input(&mut self.range, value);
        }
        if !self.col.needs_dictionary {
            return Ok(0);
        }
        match self.builder.as_mut() {
            Some(b) => {
                b.add_value(value)
                    .with_context(|| format!("building dictionary of {}", self.col.identity()))?;
                Ok(0)
            }
            None => {
                sink.emit(OutputRecord::new(
                    OutputChannel::ColumnValues,
                    Vec::new(),
                    value.as_bytes().to_vec(),
                    column_values_file(&self.col),
                ))?;
                Ok(1)
            }
        }
    }

    fn emit(self, sink: &mut dyn OutputSink) -> Result<u64> {
        let mut emitted = 0;
        if let Some(range) = self.range {
            let file = dimension_range_file(&self.col);
            info!(
                column = %self.col.name(),
                min = %range.min,
                max = %range.max,
                "dimension range written"
            );
            for bound in [range.min, range.max] {
                sink.emit(OutputRecord::new(
                    OutputChannel::DimensionRange,
                    Vec::new(),
                    bound.into_bytes(),
                    file.clone(),
                ))?;
                emitted += 1;
            }
        }
        if let Some(builder) = self.builder {
            let dict = builder
                .build()
                .with_context(|| format!("building dictionary of {}", self.col.identity()))?;
            info!(column = %self.col.identity(), values = dict.len(), "dictionary built");
            sink.emit(OutputRecord::new(
                OutputChannel::Dictionary,
                Vec::new(),
                dict.to_bytes()?,
                dictionary_file(&self.col),
            ))?;
            emitted += 1;
        }
        Ok(emitted)
    }
}

/// Statistics records read back from their wire form.
#[derive(Clone, Debug, Default)]
pub struct MergedStatistics {
    pub overlap_ratio: f64,
    pub sampling_units: i32,
    pub sampling_percent: i32,
    pub cuboids: BTreeMap<CuboidId, HllCounter>,
}

impl MergedStatistics {
    /// Decode the statistics channel of `records`, ignoring other channels.
    /// Sketches from several statistics shards are merged and their unit
    /// counts summed. Only the shard holding the base cuboid counts units, so
    /// the overlap ratio is taken from the header that reports any.
    ///
    /// # Errors
    ///
    /// Fails on a malformed key, value or sketch payload.
    pub fn from_records<'a, I>(records: I, precision: u8) -> Result<Self>
    where
        I: IntoIterator<Item = &'a OutputRecord>,
    {
        let mut stats = Self::default();
        // a shard writes its ratio before its unit count
        let mut pending_ratio = 0.0;
        for rec in records {
            if rec.channel != OutputChannel::Statistics {
                continue;
            }
            let key = i64::from_be_bytes(
                rec.key
                    .as_slice()
                    .try_into()
                    .context("statistics key must be 8 bytes")?,
            );
            match key {
                OVERLAP_RATIO_KEY => {
                    pending_ratio = f64::from_be_bytes(
                        rec.value.as_slice().try_into().context("overlap ratio must be 8 bytes")?,
                    );
                }
                SAMPLING_UNITS_KEY => {
                    let units = i32::from_be_bytes(
                        rec.value.as_slice().try_into().context("unit count must be 4 bytes")?,
                    );
                    if units > 0 {
                        stats.overlap_ratio = pending_ratio;
                    }
                    stats.sampling_units += units;
                }
                SAMPLING_PERCENT_KEY => {
                    stats.sampling_percent = i32::from_be_bytes(
                        rec.value
                            .as_slice()
                            .try_into()
                            .context("sampling percent must be 4 bytes")?,
                    );
                }
                cuboid => {
                    let hll = HllCounter::read_registers(&rec.value, precision)
                        .with_context(|| format!("cuboid {cuboid}"))?;
                    match stats.cuboids.get_mut(&cuboid) {
                        Some(merged) => merged.merge(&hll)?,
                        None => {
                            stats.cuboids.insert(cuboid, hll);
                        }
                    }
                }
            }
        }
        Ok(stats)
    }

    #[must_use]
    pub fn estimate(&self, cuboid: CuboidId) -> Option<u64> {
        self.cuboids.get(&cuboid).map(HllCounter::count_estimate)
    }
}

/// Run one shard's grouped input through a fresh merger.
///
/// # Errors
///
/// Propagates the first merge or sink error.
pub fn merge_shard(
    ctx: Arc<WorkerContext>,
    shard: usize,
    input: &ShardInput,
    sink: &mut dyn OutputSink,
) -> Result<u64> {
    let mut merger = ShardMerger::new(ctx, shard);
    merger.init()?;
    for (key, values) in input {
        merger.accept(key, values, sink)?;
    }
    merger.finish(sink)
}
