//! Job configuration.
//!
//! Every field has a default, so `{}` is a valid configuration:
//!
//! ```
//! use fact_distinct::JobConfig;
//!
//! let cfg = JobConfig::from_json_str(r#"{ "sampling_percent": 20 }"#).unwrap();
//! assert_eq!(cfg.sampling_percent, 20);
//! assert!(cfg.dedup.enabled);
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_SAMPLING_PERCENT: u32 = 100;
pub const DEFAULT_DEDUP_BUDGET_BYTES: usize = 256 * 1024 * 1024;
pub const DEFAULT_CHECK_INTERVAL_ROWS: u64 = 100;
pub const DEFAULT_HLL_CUBOIDS_PER_SHARD: usize = 100;
pub const DEFAULT_HLL_MAX_SHARDS: usize = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Rows with `index % 100 < sampling_percent` feed the estimator.
    pub sampling_percent: u32,
    /// Build dictionaries in the merge stage instead of emitting raw values.
    pub build_dict_locally: bool,
    pub dedup: DedupConfig,
    pub hll_cuboids_per_shard: usize,
    pub hll_max_shards: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sampling_percent: DEFAULT_SAMPLING_PERCENT,
            build_dict_locally: true,
            dedup: DedupConfig::default(),
            hll_cuboids_per_shard: DEFAULT_HLL_CUBOIDS_PER_SHARD,
            hll_max_shards: DEFAULT_HLL_MAX_SHARDS,
        }
    }
}

/// Memory bound of the per-partition value deduper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// When off every dictionary value is emitted.
    pub enabled: bool,
    /// Held value bytes above which the deduper forgets everything.
    pub memory_budget_bytes: usize,
    /// The budget is only checked on rows whose index is a multiple of this.
    pub check_interval_rows: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_budget_bytes: DEFAULT_DEDUP_BUDGET_BYTES,
            check_interval_rows: DEFAULT_CHECK_INTERVAL_ROWS,
        }
    }
}

impl JobConfig {
    /// Parse and validate.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or an invalid value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("failed to parse job config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid
    /// configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read job config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// # Errors
    ///
    /// Fails when the sampling percent exceeds 100 or a count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.sampling_percent > 100 {
            bail!("sampling_percent must be in [0, 100], got {}", self.sampling_percent);
        }
        if self.hll_cuboids_per_shard == 0 {
            bail!("hll_cuboids_per_shard must be positive");
        }
        if self.hll_max_shards == 0 {
            bail!("hll_max_shards must be positive");
        }
        if self.dedup.check_interval_rows == 0 {
            bail!("dedup.check_interval_rows must be positive");
        }
        Ok(())
    }
}
