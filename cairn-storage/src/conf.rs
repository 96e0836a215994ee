use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of the storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory holding one sub-directory per table.
    pub root: PathBuf,
    /// Deadline in milliseconds of torn-read retry and metadata reload spin.
    pub spin_lock_timeout_ms: u64,
    /// How many `_meta.swp.N` names are tried before giving up.
    pub meta_swap_retry_count: u32,
    /// Maximum byte length of table and column names.
    pub file_name_limit: usize,
    pub default_max_uncommitted_rows: i32,
    /// Out-of-order lag of new tables, in microseconds.
    pub default_o3_max_lag: i64,
    /// Interval between two refresh passes of materialized views.
    pub mat_view_refresh_interval_ms: u64,
    /// Initial backoff applied to a view after memory pressure.
    pub mat_view_memory_backoff_ms: u64,
    /// Upper bound of doubling memory backoff.
    pub mat_view_max_memory_backoff_ms: u64,
}

impl EngineConfig {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        EngineConfig {
            root: root.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn spin_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.spin_lock_timeout_ms)
    }

    #[inline]
    pub fn mat_view_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.mat_view_refresh_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            root: PathBuf::from("db"),
            spin_lock_timeout_ms: 5_000,
            meta_swap_retry_count: 30,
            file_name_limit: 127,
            default_max_uncommitted_rows: 500_000,
            default_o3_max_lag: 600_000_000,
            mat_view_refresh_interval_ms: 100,
            mat_view_memory_backoff_ms: 1_000,
            mat_view_max_memory_backoff_ms: 60_000,
        }
    }
}
