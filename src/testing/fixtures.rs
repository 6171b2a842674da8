//! Pre-built cube models and rows for common testing scenarios.

use crate::model::{ColumnDesc, CubeModel, DEFAULT_HLL_PRECISION, Row};
use crate::types::DataType;
use std::collections::BTreeMap;

/// A small sales cube.
///
/// | column | type | role |
/// | --- | --- | --- |
/// | `CAL_DT` | date | row key, range |
/// | `REGION` | varchar | row key, dictionary |
/// | `SELLER_ID` | bigint | row key, dictionary |
/// | `CATEGORY` | varchar | derived dimension, not tracked |
/// | `PRICE` | decimal | measure, not tracked |
///
/// Cuboids `{7, 6, 4, 3, 1}` over the three row-key columns; base is `7`.
#[must_use]
pub fn sample_cube_model() -> CubeModel {
    CubeModel {
        name: "sales".into(),
        version: "3.1.0".into(),
        columns: vec![
            ColumnDesc::new("SALES", "CAL_DT", DataType::Date),
            ColumnDesc::new("SALES", "REGION", DataType::Varchar),
            ColumnDesc::new("SALES", "SELLER_ID", DataType::BigInt),
            ColumnDesc::new("SALES", "CATEGORY", DataType::Varchar),
            ColumnDesc::new("SALES", "PRICE", DataType::Decimal),
        ],
        dimensions: names(&["CAL_DT", "REGION", "SELLER_ID", "CATEGORY"]),
        derived: names(&["CATEGORY"]),
        dictionary_columns: names(&["REGION", "SELLER_ID"]),
        custom_dictionary_columns: Vec::new(),
        uhc_shards: BTreeMap::new(),
        row_key: names(&["CAL_DT", "REGION", "SELLER_ID"]),
        cuboids: vec![7, 6, 4, 3, 1],
        mandatory_cuboids: vec![5],
        planner_enabled: false,
        hll_precision: DEFAULT_HLL_PRECISION,
    }
}

/// Rows for [`sample_cube_model`]. Every 50th row has a null region.
#[must_use]
pub fn sample_rows(n: usize) -> Vec<Row> {
    const REGIONS: [&str; 4] = ["east", "west", "north", "south"];
    (0..n)
        .map(|i| {
            vec![
                Some(format!("2024-01-{:02}", i % 28 + 1)),
                (i % 50 != 49).then(|| REGIONS[i % REGIONS.len()].to_string()),
                Some((i % 37).to_string()),
                Some(format!("cat-{}", i % 5)),
                Some(format!("{}.{:02}", i, i % 100)),
            ]
        })
        .collect()
}

/// Two columns: a unique `ID` (bigint, range-tracked) and a `CITY`
/// dictionary column. The row key is `(ID, CITY)`, so the base cuboid `3`
/// counts rows.
#[must_use]
pub fn id_and_city_model() -> CubeModel {
    CubeModel {
        name: "cities".into(),
        version: "3.0.0".into(),
        columns: vec![
            ColumnDesc::new("T", "ID", DataType::BigInt),
            ColumnDesc::new("T", "CITY", DataType::Varchar),
        ],
        dimensions: names(&["ID", "CITY"]),
        derived: Vec::new(),
        dictionary_columns: names(&["CITY"]),
        custom_dictionary_columns: Vec::new(),
        uhc_shards: BTreeMap::new(),
        row_key: names(&["ID", "CITY"]),
        cuboids: vec![3, 2, 1],
        mandatory_cuboids: Vec::new(),
        planner_enabled: false,
        hll_precision: DEFAULT_HLL_PRECISION,
    }
}

/// `n` rows `(i, city-(i % distinct))` for [`id_and_city_model`].
#[must_use]
pub fn id_and_city_rows(n: usize, distinct: usize) -> Vec<Row> {
    id_and_city_rows_from(0, n, distinct)
}

/// Like [`id_and_city_rows`] with ids starting at `first_id`.
#[must_use]
pub fn id_and_city_rows_from(first_id: usize, n: usize, distinct: usize) -> Vec<Row> {
    (first_id..first_id + n)
        .map(|i| {
            vec![
                Some(i.to_string()),
                Some(format!("city-{}", i % distinct.max(1))),
            ]
        })
        .collect()
}

fn names(ns: &[&str]) -> Vec<String> {
    ns.iter().map(|s| (*s).to_string()).collect()
}
