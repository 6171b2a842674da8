//! The cube model consumed by every stage.
//!
//! [`CubeModel`] is the serde-facing description of a cube: its flat-table
//! columns, dimensions, dictionary needs, row key and cuboids. Stages never
//! read it directly; they work on the [`CubeLayout`] produced by
//! [`CubeModel::resolve`], which fixes column ordinals, flat-table positions
//! and the cuboid universe once so that every worker derives the same
//! numbering from the same model.

use crate::cuboid::{CuboidBitSet, CuboidId, MAX_ROW_KEY_COLUMNS, base_cuboid_id, cuboid_bit_sets};
use crate::estimator::CardinalityAlgorithm;
use crate::hll::{MAX_PRECISION, MIN_PRECISION};
use crate::types::DataType;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const DEFAULT_HLL_PRECISION: u8 = 14;

/// One flat-table row; `None` is a SQL null.
pub type Row = Vec<Option<String>>;

/// First cube version sampled with [`CardinalityAlgorithm::OrderSensitiveSum`].
const ORDER_SENSITIVE_SINCE: (u32, u32, u32) = (2, 0, 0);

/// One column of the flat fact table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub table: String,
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDesc {
    pub fn new(table: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            data_type,
        }
    }

    /// `TABLE.NAME`, used to scope output file names.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

/// Serializable cube description. Column references may be either the
/// identity (`TABLE.NAME`) or a bare name that is unique in `columns`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CubeModel {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Flat-table columns in row order.
    pub columns: Vec<ColumnDesc>,
    pub dimensions: Vec<String>,
    /// Dimensions excluded from range tracking.
    #[serde(default)]
    pub derived: Vec<String>,
    #[serde(default)]
    pub dictionary_columns: Vec<String>,
    /// Columns whose dictionary is built by a custom builder outside this job.
    #[serde(default)]
    pub custom_dictionary_columns: Vec<String>,
    /// Shard count for ultra-high-cardinality columns; absent means one shard.
    #[serde(default)]
    pub uhc_shards: BTreeMap<String, usize>,
    pub row_key: Vec<String>,
    #[serde(default)]
    pub cuboids: Vec<CuboidId>,
    #[serde(default)]
    pub mandatory_cuboids: Vec<CuboidId>,
    /// When set, mandatory cuboids are sampled as well.
    #[serde(default)]
    pub planner_enabled: bool,
    #[serde(default = "default_hll_precision")]
    pub hll_precision: u8,
}

const fn default_hll_precision() -> u8 {
    DEFAULT_HLL_PRECISION
}

/// A resolved dimension or dictionary column.
#[derive(Clone, Debug)]
pub struct ColumnRef {
    /// Index in [`CubeLayout::columns`].
    pub ordinal: usize,
    /// Index of the field in a flat-table row.
    pub position: usize,
    pub desc: ColumnDesc,
    pub needs_dictionary: bool,
    /// Non-derived dimension: gets min/max range tracking.
    pub tracks_range: bool,
    pub custom_dictionary: bool,
    pub shards: usize,
}

impl ColumnRef {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.desc.data_type
    }

    #[must_use]
    pub fn identity(&self) -> String {
        self.desc.identity()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

/// Everything the stages need, derived once from a [`CubeModel`].
#[derive(Clone, Debug)]
pub struct CubeLayout {
    pub cube_name: String,
    /// Columns needing a dictionary or range tracking, in flat-table order.
    pub columns: Vec<ColumnRef>,
    /// Flat-table positions of the row-key columns, in row-key order.
    pub row_key_positions: Vec<usize>,
    /// Sorted, deduplicated cuboid universe; always contains the base cuboid.
    pub cuboids: Vec<CuboidBitSet>,
    pub base_cuboid: CuboidId,
    pub hll_precision: u8,
    pub algorithm: CardinalityAlgorithm,
    /// Width of the flat table.
    pub row_width: usize,
}

impl CubeLayout {
    #[must_use]
    pub fn column(&self, ordinal: usize) -> Option<&ColumnRef> {
        self.columns.get(ordinal)
    }

    #[must_use]
    pub fn cuboid_ids(&self) -> Vec<CuboidId> {
        self.cuboids.iter().map(|c| c.id).collect()
    }
}

impl CubeModel {
    /// Parse a model from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON does not describe a model.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse cube model JSON")
    }

    /// Resolve names, ordinals and the cuboid universe.
    ///
    /// # Errors
    ///
    /// Fails on unknown or duplicate columns, an empty or oversized row key,
    /// cuboids outside the row key, or an HLL precision out of range.
    pub fn resolve(&self) -> Result<CubeLayout> {
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.identity()) {
                bail!("cube {}: duplicate column {}", self.name, col.identity());
            }
        }
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.hll_precision) {
            bail!(
                "cube {}: hll precision {} outside [{MIN_PRECISION}, {MAX_PRECISION}]",
                self.name,
                self.hll_precision
            );
        }
        if self.row_key.is_empty() || self.row_key.len() > MAX_ROW_KEY_COLUMNS {
            bail!(
                "cube {}: row key must have 1..={MAX_ROW_KEY_COLUMNS} columns, got {}",
                self.name,
                self.row_key.len()
            );
        }

        let dims = self.positions(&self.dimensions, "dimension")?;
        let derived = self.positions(&self.derived, "derived")?;
        let dicts = self.positions(&self.dictionary_columns, "dictionary")?;
        let customs = self.positions(&self.custom_dictionary_columns, "custom dictionary")?;
        let mut uhc = BTreeMap::new();
        for (name, &shards) in &self.uhc_shards {
            if shards == 0 {
                bail!("cube {}: column {name} configured with zero shards", self.name);
            }
            uhc.insert(self.position(name)?, shards);
        }

        let row_key_positions = self
            .row_key
            .iter()
            .map(|name| self.position(name))
            .collect::<Result<Vec<_>>>()?;
        for (i, pos) in row_key_positions.iter().enumerate() {
            if !dims.contains(pos) {
                bail!("cube {}: row key column {} is not a dimension", self.name, self.row_key[i]);
            }
        }

        let mut columns = Vec::new();
        for (position, desc) in self.columns.iter().enumerate() {
            let needs_dictionary = dicts.contains(&position);
            let tracks_range = dims.contains(&position) && !derived.contains(&position);
            if !needs_dictionary && !tracks_range {
                continue;
            }
            columns.push(ColumnRef {
                ordinal: columns.len(),
                position,
                desc: desc.clone(),
                needs_dictionary,
                tracks_range,
                custom_dictionary: customs.contains(&position),
                shards: uhc.get(&position).copied().unwrap_or(1),
            });
        }

        let n = row_key_positions.len();
        let base_cuboid = base_cuboid_id(n);
        let mut ids: BTreeSet<CuboidId> = self.cuboids.iter().copied().collect();
        if self.planner_enabled {
            ids.extend(self.mandatory_cuboids.iter().copied());
        }
        ids.insert(base_cuboid);
        let ids: Vec<CuboidId> = ids.into_iter().collect();
        let cuboids = cuboid_bit_sets(&ids, n).with_context(|| format!("cube {}", self.name))?;

        Ok(CubeLayout {
            cube_name: self.name.clone(),
            columns,
            row_key_positions,
            cuboids,
            base_cuboid,
            hll_precision: self.hll_precision,
            algorithm: self.cardinality_algorithm(),
            row_width: self.columns.len(),
        })
    }

    /// Cubes older than 2.0.0 (or without a parsable version) keep the
    /// hash-of-hashes sampling they were built with.
    #[must_use]
    pub fn cardinality_algorithm(&self) -> CardinalityAlgorithm {
        match parse_version(&self.version) {
            Some(v) if v >= ORDER_SENSITIVE_SINCE => CardinalityAlgorithm::OrderSensitiveSum,
            _ => CardinalityAlgorithm::HashOfHashes,
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        if let Some(i) = self.columns.iter().position(|c| c.identity() == name) {
            return Ok(i);
        }
        let mut matches = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name)
            .map(|(i, _)| i);
        match (matches.next(), matches.next()) {
            (Some(i), None) => Ok(i),
            (Some(_), Some(_)) => Err(anyhow!("cube {}: column name {name} is ambiguous", self.name)),
            (None, _) => Err(anyhow!("cube {}: unknown column {name}", self.name)),
        }
    }

    fn positions(&self, names: &[String], what: &str) -> Result<HashSet<usize>> {
        names
            .iter()
            .map(|n| self.position(n).with_context(|| format!("resolving {what} column")))
            .collect()
    }
}

fn parse_version(v: &str) -> Option<(u32, u32, u32)> {
    let mut parts = v.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    // tolerate suffixes such as "2.6.1-SNAPSHOT"
    let patch = parts
        .next()
        .map_or(Some(0), |p| p.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok())?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.6.0"), Some((1, 6, 0)));
        assert_eq!(parse_version("2.6.1-SNAPSHOT"), Some((2, 6, 1)));
        assert_eq!(parse_version("3"), Some((3, 0, 0)));
        assert_eq!(parse_version(""), None);
    }
}
