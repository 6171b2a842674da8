//! Per-worker shared state and its one-time initialization.

use crate::config::JobConfig;
use crate::mapping::ReducerMapping;
use crate::model::{CubeLayout, CubeModel};
use anyhow::{Result, anyhow};
use std::sync::{Mutex, OnceLock};
use tracing::info;

/// What every task on a worker derives from the model and configuration.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub layout: CubeLayout,
    pub mapping: ReducerMapping,
    pub config: JobConfig,
}

impl WorkerContext {
    /// # Errors
    ///
    /// Fails when the model does not resolve or the configuration is invalid.
    pub fn new(model: &CubeModel, config: JobConfig) -> Result<Self> {
        config.validate()?;
        let layout = model.resolve()?;
        let mapping = ReducerMapping::new(&layout, &config)?;
        info!(
            cube = %layout.cube_name,
            version = %model.version,
            algorithm = ?layout.algorithm,
            cuboids = layout.cuboids.len(),
            total_shards = mapping.total_shards(),
            statistics_shards = mapping.statistics_shard_count(),
            "worker context initialized"
        );
        Ok(Self {
            layout,
            mapping,
            config,
        })
    }
}

/// A cell initialized at most once, by a fallible initializer.
///
/// Concurrent callers block on the first initialization instead of running
/// their own. A failed initialization leaves the cell empty, so a later call
/// may try again.
#[derive(Debug)]
pub struct InitOnce<T> {
    value: OnceLock<T>,
    lock: Mutex<()>,
}

impl<T> Default for InitOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InitOnce<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// # Errors
    ///
    /// Propagates the initializer's error, or reports a poisoned lock.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("initialization lock poisoned"))?;
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let v = init()?;
        Ok(self.value.get_or_init(|| v))
    }
}
