use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

pub const DEFAULT_POOL_SIZE: usize = 64;
pub const DEFAULT_REPLACER_K: usize = 10;
pub const DEFAULT_WRITE_WORKERS: usize = 4;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolOptions {
    // Number of frames, fixed for the pool's lifetime
    pub pool_size: usize,
    // History depth of the LRU-K replacer
    pub replacer_k: usize,
    // Long-lived write-back threads
    pub write_workers: usize,
    // Pages kept in the scheduler's latest-known-good cache
    pub cache_capacity: usize,
}

impl Default for BufferPoolOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer_k: DEFAULT_REPLACER_K,
            write_workers: DEFAULT_WRITE_WORKERS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl BufferPoolOptions {
    pub fn new(pool_size: usize, replacer_k: usize) -> Self {
        Self {
            pool_size,
            replacer_k,
            ..Self::default()
        }
    }

    pub fn with_write_workers(mut self, write_workers: usize) -> Self {
        self.write_workers = write_workers;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Defaults overridden by `GEODE_POOL_SIZE`, `GEODE_REPLACER_K`,
    /// `GEODE_WRITE_WORKERS` and `GEODE_CACHE_CAPACITY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut options = Self::default();
        options
            .apply_env_overrides(|key| std::env::var(key).ok())
            .context("failed to read buffer pool options from the environment")?;
        options
            .validate()
            .context("invalid buffer pool options")?;
        Ok(options)
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), OptionsError> {
        let fields: [(&'static str, &mut usize); 4] = [
            ("GEODE_POOL_SIZE", &mut self.pool_size),
            ("GEODE_REPLACER_K", &mut self.replacer_k),
            ("GEODE_WRITE_WORKERS", &mut self.write_workers),
            ("GEODE_CACHE_CAPACITY", &mut self.cache_capacity),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = value
                    .trim()
                    .parse()
                    .map_err(|_| OptionsError::Invalid { key, value })?;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.pool_size == 0 {
            return Err(OptionsError::Zero("pool_size"));
        }
        if self.replacer_k == 0 {
            return Err(OptionsError::Zero("replacer_k"));
        }
        if self.write_workers == 0 {
            return Err(OptionsError::Zero("write_workers"));
        }
        if self.cache_capacity == 0 {
            return Err(OptionsError::Zero("cache_capacity"));
        }
        Ok(())
    }
}
