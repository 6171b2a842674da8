
use anyhow::Result;
use fact_distinct::testing::*;
use fact_distinct::{
    DataType, Dictionary, JobConfig, MergedStatistics, OutputChannel, Row, Runner,
};

fn raw_values_config() -> JobConfig {
    JobConfig {
        build_dict_locally: false,
        ..JobConfig::default()
    }
}

#[test]
fn hundred_rows_ten_cities() -> Result<()> {
    let model = id_and_city_model();
    let rows = id_and_city_rows(100, 10);
    let out = Runner::sequential(3).run(&model, &raw_values_config(), &rows)?;

    let mut cities = column_values(&out, "T.CITY/");
    cities.sort();
    let expected: Vec<String> = (0..10).map(|i| format!("city-{i}")).collect();
    assert_eq!(cities, expected);

    let stats = MergedStatistics::from_records(&out.records, model.hll_precision)?;
    let layout = model.resolve()?;
    let base = stats
        .estimate(layout.base_cuboid)
        .ok_or_else(|| anyhow::anyhow!("no base cuboid statistics"))?;
    assert_within_rel!(base, 100, 0.05);
    assert_eq!(stats.sampling_percent, 100);
    assert_eq!(stats.sampling_units, 3);
    assert_eq!(out.counters.source_records, 100);
    Ok(())
}

#[test]
fn dictionary_is_built_locally_by_default() -> Result<()> {
    let model = id_and_city_model();
    let rows = id_and_city_rows(300, 12);
    let out = Runner::parallel(4).run(&model, &JobConfig::default(), &rows)?;

    assert_eq!(out.channel(OutputChannel::ColumnValues).count(), 0);
    let dicts: Vec<_> = out.channel(OutputChannel::Dictionary).collect();
    assert_eq!(dicts.len(), 1);
    assert_eq!(dicts[0].file_name, "T.CITY/CITY.rldict");
    let dict = Dictionary::from_bytes(&dicts[0].value)?;
    assert_eq!(dict.len(), 12);
    assert!(dict.id_of("city-11").is_some());
    assert!(dict.id_of("nowhere").is_none());
    Ok(())
}

#[test]
fn ranges_use_native_order() -> Result<()> {
    let model = id_and_city_model();
    // ids 5..=120: lexical order would give "10" and "99"
    let rows = id_and_city_rows_from(5, 116, 10);
    let out = Runner::sequential(4).run(&model, &JobConfig::default(), &rows)?;
    assert_eq!(
        dimension_range(&out, "T.ID/ID.dci"),
        ("5".to_string(), "120".to_string())
    );
    assert_eq!(
        dimension_range(&out, "T.CITY/CITY.dci"),
        ("city-0".to_string(), "city-9".to_string())
    );
    Ok(())
}

#[test]
fn sample_cube_end_to_end() -> Result<()> {
    let model = sample_cube_model();
    let rows = sample_rows(1_000);
    let out = Runner::parallel(5).run(&model, &raw_values_config(), &rows)?;

    assert_eq!(
        dimension_range(&out, "SALES.CAL_DT/CAL_DT.dci"),
        ("2024-01-01".to_string(), "2024-01-28".to_string())
    );
    assert_eq!(
        dimension_range(&out, "SALES.SELLER_ID/SELLER_ID.dci"),
        ("0".to_string(), "36".to_string())
    );
    let mut regions = column_values(&out, "SALES.REGION/");
    regions.sort();
    assert_eq!(regions, ["east", "north", "south", "west"]);
    assert_eq!(column_values(&out, "SALES.SELLER_ID/").len(), 37);
    // derived dimensions and measures are not tracked
    assert!(out.records.iter().all(|r| !r.file_name.contains("CATEGORY")));
    assert!(out.records.iter().all(|r| !r.file_name.contains("PRICE")));

    let stats = MergedStatistics::from_records(&out.records, model.hll_precision)?;
    let ids: Vec<_> = stats.cuboids.keys().copied().collect();
    assert_eq!(ids, [1, 3, 4, 6, 7]);
    // CAL_DT alone: 28 days; SELLER_ID alone: 37 sellers
    assert_within_rel!(stats.estimate(4).unwrap_or(0), 28, 0.05);
    assert_within_rel!(stats.estimate(1).unwrap_or(0), 37, 0.05);
    assert_eq!(stats.sampling_units, 5);
    Ok(())
}

#[test]
fn statistics_keys_come_out_in_order() -> Result<()> {
    let model = sample_cube_model();
    let out = Runner::sequential(2).run(&model, &JobConfig::default(), &sample_rows(200))?;
    let keys: Vec<i64> = out
        .channel(OutputChannel::Statistics)
        .map(|r| -> Result<i64> { Ok(i64::from_be_bytes(r.key.as_slice().try_into()?)) })
        .collect::<Result<_>>()?;
    assert_eq!(keys, [-1, -2, 0, 1, 3, 4, 6, 7]);
    assert!(
        out.channel(OutputChannel::Statistics)
            .all(|r| r.file_name == "statistics/statistics")
    );
    Ok(())
}

#[test]
fn sampling_percent_limits_sampled_rows() -> Result<()> {
    let model = id_and_city_model();
    let rows = id_and_city_rows(1_000, 10);
    let cfg = JobConfig {
        sampling_percent: 20,
        ..JobConfig::default()
    };
    let out = Runner::sequential(1).run(&model, &cfg, &rows)?;
    let stats = MergedStatistics::from_records(&out.records, model.hll_precision)?;
    assert_eq!(stats.sampling_percent, 20);
    // rows 0..20, 100..120, ... are sampled
    assert_within_rel!(stats.estimate(0b11).unwrap_or(0), 200, 0.05);
    // dictionary values are extracted from every row regardless
    let dict = out
        .channel(OutputChannel::Dictionary)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no dictionary"))?;
    assert_eq!(Dictionary::from_bytes(&dict.value)?.len(), 10);
    Ok(())
}

#[test]
fn sequential_and_parallel_agree() -> Result<()> {
    let model = sample_cube_model();
    let rows = sample_rows(777);
    for cfg in [JobConfig::default(), raw_values_config()] {
        let seq = Runner::sequential(6).run(&model, &cfg, &rows)?;
        let par = Runner::parallel(6).run(&model, &cfg, &rows)?;
        assert_eq!(seq.records, par.records);
        assert_eq!(seq.counters, par.counters);
    }
    Ok(())
}

#[test]
fn partitioning_does_not_change_distinct_outputs() -> Result<()> {
    let model = sample_cube_model();
    let rows = sample_rows(500);
    let cfg = raw_values_config();
    let one = Runner::sequential(1).run(&model, &cfg, &rows)?;
    let many = Runner::parallel(7).run(&model, &cfg, &rows)?;
    for channel in [OutputChannel::ColumnValues, OutputChannel::DimensionRange] {
        let a: Vec<_> = one.channel(channel).cloned().collect();
        let b: Vec<_> = many.channel(channel).cloned().collect();
        assert_collections_unordered_equal(&a, &b);
    }
    Ok(())
}

#[test]
fn counters_track_source_size() -> Result<()> {
    let model = id_and_city_model();
    let rows: Vec<Row> = vec![
        vec![Some("1".into()), Some("ab".into())],
        vec![Some("22".into()), None],
    ];
    let out = Runner::sequential(1).run(&model, &JobConfig::default(), &rows)?;
    assert_eq!(out.counters.source_records, 2);
    // (1+1) + (2+1) + (2+1) + (1+1)
    assert_eq!(out.counters.source_bytes, 10);
    assert_eq!(out.counters.output_records, out.records.len() as u64);
    let json = out.counters.to_json()?;
    assert!(json.contains("\"source_bytes\": 10"));
    Ok(())
}

#[test]
fn short_row_aborts_the_run() -> Result<()> {
    let model = id_and_city_model();
    let mut rows = id_and_city_rows(10, 3);
    rows[4].truncate(1);
    let err = Runner::sequential(2)
        .run(&model, &JobConfig::default(), &rows)
        .err()
        .ok_or_else(|| anyhow::anyhow!("short row was accepted"))?;
    assert!(format!("{err:#}").contains("expects position 1"));
    Ok(())
}

#[test]
fn unsupported_dictionary_type_falls_back_to_raw_values() -> Result<()> {
    let mut model = id_and_city_model();
    model.columns[1].data_type = DataType::Boolean;
    let rows: Vec<Row> = (0..50)
        .map(|i| vec![Some(i.to_string()), Some((i % 2 == 0).to_string())])
        .collect();
    let out = Runner::sequential(2).run(&model, &JobConfig::default(), &rows)?;
    assert_eq!(out.channel(OutputChannel::Dictionary).count(), 0);
    let mut values = column_values(&out, "T.CITY/");
    values.sort();
    assert_eq!(values, ["false", "true"]);
    Ok(())
}

#[test]
fn custom_and_sharded_dictionaries_emit_raw_values() -> Result<()> {
    let rows = id_and_city_rows(400, 40);

    let mut custom = id_and_city_model();
    custom.custom_dictionary_columns.push("CITY".into());
    let out = Runner::sequential(2).run(&custom, &JobConfig::default(), &rows)?;
    assert_eq!(out.channel(OutputChannel::Dictionary).count(), 0);
    assert_eq!(column_values(&out, "T.CITY/").len(), 40);

    let mut sharded = id_and_city_model();
    sharded.uhc_shards.insert("CITY".into(), 3);
    let out = Runner::parallel(3).run(&sharded, &JobConfig::default(), &rows)?;
    assert_eq!(out.channel(OutputChannel::Dictionary).count(), 0);
    let mut values = column_values(&out, "T.CITY/");
    values.sort();
    values.dedup();
    assert_eq!(values.len(), 40);
    // the range is still reported once per shard that saw values
    let ranges = out
        .channel(OutputChannel::DimensionRange)
        .filter(|r| r.file_name == "T.CITY/CITY.dci")
        .count();
    assert!(ranges >= 2 && ranges % 2 == 0);

    // per-shard pairs combine into the column-wide range
    let layout = sharded.resolve()?;
    let city = layout
        .columns
        .iter()
        .find(|c| c.name() == "CITY")
        .ok_or_else(|| anyhow::anyhow!("CITY not tracked"))?;
    let range = out
        .dimension_range(city)?
        .ok_or_else(|| anyhow::anyhow!("no CITY range"))?;
    assert_eq!((range.min.as_str(), range.max.as_str()), ("city-0", "city-9"));
    Ok(())
}

#[test]
fn disabled_dedup_still_yields_distinct_outputs() -> Result<()> {
    let model = id_and_city_model();
    let rows = id_and_city_rows(200, 5);
    let mut cfg = raw_values_config();
    cfg.dedup.enabled = false;
    let out = Runner::sequential(2).run(&model, &cfg, &rows)?;
    // every dictionary value travels, but the shuffle groups equal keys
    assert!(out.counters.intermediate_records > 200);
    assert_eq!(column_values(&out, "T.CITY/").len(), 5);
    Ok(())
}

#[test]
fn statistics_spread_over_several_shards() -> Result<()> {
    let model = sample_cube_model();
    let rows = sample_rows(400);
    let spread = JobConfig {
        hll_cuboids_per_shard: 1,
        hll_max_shards: 3,
        ..JobConfig::default()
    };
    let single = Runner::sequential(4).run(&model, &JobConfig::default(), &rows)?;
    let multi = Runner::sequential(4).run(&model, &spread, &rows)?;
    // header triple per statistics shard plus five cuboids
    assert_eq!(multi.channel(OutputChannel::Statistics).count(), 3 * 3 + 5);

    let one = MergedStatistics::from_records(&single.records, model.hll_precision)?;
    let many = MergedStatistics::from_records(&multi.records, model.hll_precision)?;
    assert_eq!(many.sampling_units, 4);
    assert_eq!(many.sampling_units, one.sampling_units);
    assert!(many.overlap_ratio > 0.0);
    assert_approx_eq!(many.overlap_ratio, one.overlap_ratio);
    assert_eq!(many.sampling_percent, 100);
    for (cuboid, hll) in &one.cuboids {
        assert_eq!(many.estimate(*cuboid), Some(hll.count_estimate()));
    }
    Ok(())
}

#[test]
fn deduper_resets_every_check_interval_when_over_budget() -> Result<()> {
    let model = id_and_city_model();
    let rows = id_and_city_rows(350, 10);
    let mut cfg = raw_values_config();
    cfg.dedup.memory_budget_bytes = 1;
    let out = Runner::sequential(1).run(&model, &cfg, &rows)?;

    // checks at rows 0, 100, 200 and 300 each find the budget exceeded
    assert_eq!(out.counters.dedup_resets, 4);
    // values are sent again after each reset
    assert!(out.counters.intermediate_records > 10);
    // but every distinct value still comes out once
    let mut cities = column_values(&out, "T.CITY/");
    cities.sort();
    let expected: Vec<String> = (0..10).map(|i| format!("city-{i}")).collect();
    assert_eq!(cities, expected);
    Ok(())
}
