
use anyhow::Result;
use fact_distinct::key::KeyEncoder;
use fact_distinct::merge::merge_shard;
use fact_distinct::testing::id_and_city_model;
use fact_distinct::{
    HllCounter, JobConfig, MergeState, MergedStatistics, OutputChannel, ShardMerger,
    SortableKey, VecSink, WorkerContext,
};
use std::sync::Arc;

fn context(config: JobConfig) -> Result<Arc<WorkerContext>> {
    Ok(Arc::new(WorkerContext::new(&id_and_city_model(), config)?))
}

fn sketch(prefix: &str, n: u32) -> Result<HllCounter> {
    let mut hll = HllCounter::new_dense(14)?;
    for i in 0..n {
        hll.add_bytes(format!("{prefix}-{i}").as_bytes());
    }
    Ok(hll)
}

#[test]
fn overlap_ratio_of_two_disjoint_units() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let base = ctx.layout.base_cuboid;
    let shard = ctx.mapping.reducer_id_for_cuboid(base);

    let big = sketch("big", 1000)?;
    let small = sketch("small", 1)?;
    let (e_big, e_small) = (big.count_estimate(), small.count_estimate());
    assert_eq!(e_small, 1);

    let mut sink = VecSink::new();
    let mut merger = ShardMerger::new(Arc::clone(&ctx), shard);
    merger.accept(
        &SortableKey::statistics(base),
        &[big.to_bytes(), small.to_bytes()],
        &mut sink,
    )?;
    merger.finish(&mut sink)?;
    assert_eq!(merger.state(), MergeState::Done);

    let stats = MergedStatistics::from_records(&sink.records, 14)?;
    let merged = stats
        .estimate(base)
        .ok_or_else(|| anyhow::anyhow!("base cuboid missing"))?;
    assert!(merged >= e_big.max(e_small));
    assert_within_rel!(merged, 1001, 0.05);
    #[allow(clippy::cast_precision_loss)]
    let expected = (e_big + e_small) as f64 / merged as f64;
    assert_approx_eq!(stats.overlap_ratio, expected);
    assert_eq!(stats.sampling_units, 2);
    assert_eq!(stats.sampling_percent, 100);
    Ok(())
}

#[test]
fn overlapping_units_raise_the_ratio() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let base = ctx.layout.base_cuboid;
    let shard = ctx.mapping.reducer_id_for_cuboid(base);
    let same = sketch("row", 500)?.to_bytes();

    let input = vec![(SortableKey::statistics(base), vec![same.clone(), same])];
    let mut sink = VecSink::new();
    merge_shard(ctx, shard, &input, &mut sink)?;
    let stats = MergedStatistics::from_records(&sink.records, 14)?;
    assert_approx_eq!(stats.overlap_ratio, 2.0);
    Ok(())
}

#[test]
fn empty_statistics_shard_reports_zero_ratio() -> Result<()> {
    let ctx = context(JobConfig {
        sampling_percent: 35,
        ..JobConfig::default()
    })?;
    let shard = ctx.mapping.total_shards() - 1;
    let mut sink = VecSink::new();
    let emitted = merge_shard(ctx, shard, &Vec::new(), &mut sink)?;
    assert_eq!(emitted, 3);
    let stats = MergedStatistics::from_records(&sink.records, 14)?;
    assert_approx_eq!(stats.overlap_ratio, 0.0);
    assert_eq!(stats.sampling_units, 0);
    assert_eq!(stats.sampling_percent, 35);
    assert!(stats.cuboids.is_empty());
    Ok(())
}

#[test]
fn precision_mismatch_fails_the_shard() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let base = ctx.layout.base_cuboid;
    let shard = ctx.mapping.reducer_id_for_cuboid(base);
    let foreign = HllCounter::new(10)?.to_bytes();
    let input = vec![(SortableKey::statistics(base), vec![foreign])];
    assert!(merge_shard(ctx, shard, &input, &mut VecSink::new()).is_err());
    Ok(())
}

#[test]
fn column_shard_rejects_statistics_keys() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let mut merger = ShardMerger::new(ctx, 0);
    merger.init()?;
    assert!(!merger.is_statistics());
    let res = merger.accept(&SortableKey::statistics(3), &[Vec::new()], &mut VecSink::new());
    assert!(res.is_err());
    Ok(())
}

#[test]
fn unknown_shard_is_rejected() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let total = ctx.mapping.total_shards();
    let mut merger = ShardMerger::new(ctx, total);
    assert!(merger.init().is_err());
    Ok(())
}

#[test]
fn finished_shard_accepts_nothing() -> Result<()> {
    let ctx = context(JobConfig::default())?;
    let city = ctx
        .layout
        .columns
        .iter()
        .find(|c| c.name() == "CITY")
        .ok_or_else(|| anyhow::anyhow!("CITY not tracked"))?
        .clone();
    let shard = ctx.mapping.reducer_id_for_column(city.ordinal, None)?;
    let mut merger = ShardMerger::new(ctx, shard);
    let mut sink = VecSink::new();
    assert_eq!(merger.state(), MergeState::Uninitialized);

    let key = KeyEncoder::default().column_key(city.data_type(), u8::try_from(shard)?, "oslo")?;
    merger.accept(&key, &[Vec::new()], &mut sink)?;
    assert_eq!(merger.state(), MergeState::Accumulating);
    // range pair plus the dictionary
    assert_eq!(merger.finish(&mut sink)?, 3);
    assert!(merger.accept(&key, &[Vec::new()], &mut sink).is_err());
    assert!(merger.finish(&mut sink).is_err());
    assert_eq!(sink.channel(OutputChannel::Dictionary).count(), 1);
    assert_eq!(sink.channel(OutputChannel::DimensionRange).count(), 2);
    Ok(())
}
