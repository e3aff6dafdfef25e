use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strata_core::{CacheOptions, DiskStoreFactory, DiskStoreLimits, Format};
use strata_model::FormatSpec;

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Everything needed to build an [`ImageCache`](strata_core::ImageCache)
/// and register its formats.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Parent directory of every format store. Falls back to the platform
    /// cache directory when unset.
    pub root: Option<PathBuf>,
    /// Memory tier item limit; zero means unbounded.
    pub memory_capacity: usize,
    /// Worker threads of the cache's own runtime, when it needs one.
    pub worker_threads: Option<usize>,
    pub store: StoreTuning,
    pub formats: Vec<FormatSpec>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            root: None,
            memory_capacity: CacheOptions::DEFAULT_MEMORY_CAPACITY,
            worker_threads: None,
            store: StoreTuning::default(),
            formats: Vec::new(),
        }
    }
}

/// Disk store bookkeeping knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreTuning {
    /// Skip access-date updates of a key seen less than this long ago.
    /// Zero records every access, which keeps eviction order exact.
    pub touch_interval_ms: u64,
    /// Upper bound on how long access dates stay only in memory. Stores above
    /// 80% of their capacity flush on every change regardless.
    pub access_index_flush_interval_ms: u64,
}

impl Default for StoreTuning {
    fn default() -> Self {
        let limits = DiskStoreLimits::defaults();
        Self {
            touch_interval_ms: duration_ms(limits.touch_interval),
            access_index_flush_interval_ms: duration_ms(
                limits.access_index_flush_interval,
            ),
        }
    }
}

impl StoreTuning {
    pub fn limits(&self) -> DiskStoreLimits {
        DiskStoreLimits {
            touch_interval: Duration::from_millis(self.touch_interval_ms),
            access_index_flush_interval: Duration::from_millis(
                self.access_index_flush_interval_ms,
            ),
        }
    }
}

impl StrataConfig {
    /// Configured root, or the platform default.
    pub fn resolved_root(&self) -> anyhow::Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => CacheOptions::default_root().context(
                "no cache root configured and no platform cache directory found",
            ),
        }
    }

    /// Cache construction options with the disk store tuned per `store`.
    pub fn to_options(&self) -> anyhow::Result<CacheOptions> {
        let mut options = CacheOptions::new(self.resolved_root()?)
            .with_memory_capacity(self.memory_capacity)
            .with_store_factory(Arc::new(DiskStoreFactory::new(
                self.store.limits(),
            )));
        if let Some(threads) = self.worker_threads {
            options = options.with_worker_threads(threads);
        }
        Ok(options)
    }

    /// Format definitions in declaration order.
    pub fn format_definitions(&self) -> Vec<Format> {
        self.formats.iter().cloned().map(Format::new).collect()
    }

    pub fn format(&self, name: &str) -> Option<&FormatSpec> {
        self.formats.iter().find(|spec| spec.name == name)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
