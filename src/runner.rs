use crate::combine::CombineFn;
use crate::config::JobConfig;
use crate::counters::JobCounters;
use crate::extract::{ExtractOutput, IntermediateRecord, extract_partition};
use crate::merge::merge_shard;
use crate::model::{ColumnRef, CubeModel, Row};
use crate::output::{OutputChannel, OutputRecord, VecSink, dimension_range_file};
use crate::range::{DimensionRangeInfo, RangeCombiner};
use crate::shuffle::{FactDistinctPartitioner, ShardInput, group_sorted};
use crate::worker::{InitOnce, WorkerContext};
use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    Sequential,
    Parallel {
        threads: Option<usize>,
        partitions: Option<usize>,
    },
}

/// Runs a whole job in process: extract per partition, shuffle, merge per
/// shard. Both modes split the input the same way, so for a given partition
/// count they produce the same records in the same order.
pub struct Runner {
    pub mode: ExecMode,
    pub default_partitions: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: None,
                partitions: None,
            },
            default_partitions: 2 * num_cpus::get().max(2),
        }
    }
}

/// Everything a job produced.
#[derive(Clone, Debug, Default)]
pub struct JobOutput {
    /// Records of every shard, in shard order.
    pub records: Vec<OutputRecord>,
    pub counters: JobCounters,
}

impl JobOutput {
    pub fn channel(&self, channel: OutputChannel) -> impl Iterator<Item = &OutputRecord> {
        self.records.iter().filter(move |r| r.channel == channel)
    }

    /// Column-wide range of `col`. A column spread over several shards gets
    /// one min/max pair per shard; the pairs are combined in its type order.
    ///
    /// # Errors
    ///
    /// Fails when the range records are not complete min/max pairs or are
    /// not UTF-8.
    pub fn dimension_range(&self, col: &ColumnRef) -> Result<Option<DimensionRangeInfo>> {
        let file = dimension_range_file(col);
        let bounds = self
            .channel(OutputChannel::DimensionRange)
            .filter(|r| r.file_name == file)
            .map(|r| std::str::from_utf8(&r.value).with_context(|| format!("range of {file}")))
            .collect::<Result<Vec<_>>>()?;
        if bounds.len() % 2 != 0 {
            bail!("{file}: {} range records do not form min/max pairs", bounds.len());
        }
        let comb = RangeCombiner::new(col.data_type());
        let mut acc = comb.create();
        for pair in bounds.chunks_exact(2) {
            comb.merge(&mut acc, comb.build_from(pair.iter().copied()));
        }
        Ok(comb.finish(acc))
    }
}

impl Runner {
    #[must_use]
    pub fn sequential(partitions: usize) -> Self {
        Self {
            mode: ExecMode::Sequential,
            default_partitions: partitions.max(1),
        }
    }

    #[must_use]
    pub fn parallel(partitions: usize) -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: None,
                partitions: Some(partitions.max(1)),
            },
            default_partitions: partitions.max(1),
        }
    }

    /// Split `rows` into the configured number of partitions and run the job.
    ///
    /// # Errors
    ///
    /// Fails when the model or configuration is invalid or when any
    /// partition or shard fails.
    pub fn run(&self, model: &CubeModel, config: &JobConfig, rows: &[Row]) -> Result<JobOutput> {
        let parts = match self.mode {
            ExecMode::Sequential => self.default_partitions,
            ExecMode::Parallel {
                threads,
                partitions,
            } => {
                if let Some(t) = threads {
                    // ok() to ignore "already built" on repeated calls
                    rayon::ThreadPoolBuilder::new().num_threads(t).build_global().ok();
                }
                partitions.unwrap_or(self.default_partitions)
            }
        };
        let partitions = split_rows(rows, parts);
        self.run_partitions(model, config, &partitions)
    }

    /// Run the job over explicit partitions; each one is a sampling unit.
    ///
    /// # Errors
    ///
    /// See [`Runner::run`].
    pub fn run_partitions(
        &self,
        model: &CubeModel,
        config: &JobConfig,
        partitions: &[&[Row]],
    ) -> Result<JobOutput> {
        let ctx_cell: InitOnce<Arc<WorkerContext>> = InitOnce::new();
        let context = || {
            ctx_cell
                .get_or_try_init(|| WorkerContext::new(model, config.clone()).map(Arc::new))
                .map(Arc::clone)
        };
        let ctx = context()?;

        let extract = |(i, part): (usize, &&[Row])| -> Result<ExtractOutput> {
            extract_partition(context()?, part.iter().map(Vec::as_slice))
                .with_context(|| format!("extracting partition {i}"))
        };
        let extracted: Vec<ExtractOutput> = match self.mode {
            ExecMode::Sequential => partitions.iter().enumerate().map(extract).collect::<Result<_>>()?,
            ExecMode::Parallel { .. } => partitions
                .par_iter()
                .enumerate()
                .map(extract)
                .collect::<Result<_>>()?,
        };

        let mut counters = JobCounters::default();
        let mut intermediate: Vec<IntermediateRecord> = Vec::new();
        for out in extracted {
            counters.merge(&out.counters);
            intermediate.extend(out.records);
        }
        info!(
            partitions = partitions.len(),
            input_records = counters.source_records,
            input_bytes = counters.source_bytes,
            intermediate_records = counters.intermediate_records,
            total_shards = ctx.mapping.total_shards(),
            statistics_shards = ctx.mapping.statistics_shard_count(),
            "extraction finished"
        );

        let buckets = FactDistinctPartitioner::new(&ctx.mapping).route(intermediate)?;
        let shard_inputs: Vec<ShardInput> = match self.mode {
            ExecMode::Sequential => buckets.into_iter().map(group_sorted).collect(),
            ExecMode::Parallel { .. } => buckets.into_par_iter().map(group_sorted).collect(),
        };

        let merge = |(shard, input): (usize, &ShardInput)| -> Result<Vec<OutputRecord>> {
            let mut sink = VecSink::new();
            merge_shard(context()?, shard, input, &mut sink)
                .with_context(|| format!("merging shard {shard}"))?;
            Ok(sink.into_records())
        };
        let merged: Vec<Vec<OutputRecord>> = match self.mode {
            ExecMode::Sequential => shard_inputs.iter().enumerate().map(merge).collect::<Result<_>>()?,
            ExecMode::Parallel { .. } => shard_inputs
                .par_iter()
                .enumerate()
                .map(merge)
                .collect::<Result<_>>()?,
        };

        let records: Vec<OutputRecord> = merged.into_iter().flatten().collect();
        counters.output_records = records.len() as u64;
        info!(output_records = counters.output_records, "merge finished");
        Ok(JobOutput { records, counters })
    }
}

/// Split into at most `n` contiguous, non-empty chunks.
fn split_rows(rows: &[Row], n: usize) -> Vec<&[Row]> {
    if rows.is_empty() || n <= 1 {
        return vec![rows];
    }
    rows.chunks(rows.len().div_ceil(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_every_row() {
        let rows: Vec<Row> = (0..10).map(|i| vec![Some(i.to_string())]).collect();
        let parts = split_rows(&rows, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), 10);
        assert_eq!(split_rows(&[], 4).len(), 1);
    }
}
