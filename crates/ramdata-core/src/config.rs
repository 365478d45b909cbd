// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    ENV_RAMDATA_CACHE_DIR, ENV_RAMDATA_CHUNK_BYTES, ENV_RAMDATA_DENSE_BATCH_VALUES,
    ENV_RAMDATA_ISOLATION, ENV_RAMDATA_LOCK_POLL_MS, ENV_RAMDATA_NUM_WORKERS,
    ENV_RAMDATA_WORKER_BIN,
};

pub const WORKER_BIN_NAME: &str = "ramdata-store-worker";

/// When array and store operations run in a spawned worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationPolicy {
    Never,
    RemoteOnly,
    Always,
}

impl IsolationPolicy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" | "off" | "0" => Some(Self::Never),
            "remote" | "remote_only" => Some(Self::RemoteOnly),
            "always" | "1" => Some(Self::Always),
            _ => None,
        }
    }

    #[must_use]
    pub const fn should_spawn(self, is_remote: bool) -> bool {
        match self {
            Self::Never => false,
            Self::RemoteOnly => is_remote,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub lock_poll_interval: Duration,
    pub worker_bin: Option<PathBuf>,
    pub isolation: IsolationPolicy,
    pub chunk_byte_budget: u64,
    pub dense_batch_values: u64,
    pub num_workers: usize,
    pub cache_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval: Duration::from_millis(100),
            worker_bin: None,
            isolation: IsolationPolicy::RemoteOnly,
            chunk_byte_budget: 1024 * 1024,
            dense_batch_values: 10_000_000,
            num_workers: 1,
            cache_dir: PathBuf::from(".ramdata").join("cache"),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves every setting through `lookup`, falling back to defaults
    /// for absent or unparsable values.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = &lookup;
        Self {
            lock_poll_interval: Duration::from_millis(env_u64(
                lookup,
                ENV_RAMDATA_LOCK_POLL_MS,
                defaults.lock_poll_interval.as_millis() as u64,
            )),
            worker_bin: lookup(ENV_RAMDATA_WORKER_BIN)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            isolation: lookup(ENV_RAMDATA_ISOLATION)
                .and_then(|v| IsolationPolicy::parse(&v))
                .unwrap_or(defaults.isolation),
            chunk_byte_budget: env_u64(lookup, ENV_RAMDATA_CHUNK_BYTES, defaults.chunk_byte_budget)
                .max(1),
            dense_batch_values: env_u64(
                lookup,
                ENV_RAMDATA_DENSE_BATCH_VALUES,
                defaults.dense_batch_values,
            )
            .max(1),
            num_workers: env_usize(lookup, ENV_RAMDATA_NUM_WORKERS, defaults.num_workers).max(1),
            cache_dir: resolve_cache_dir_with(lookup),
        }
    }

    #[must_use]
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_worker_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_bin = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationPolicy) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn with_chunk_byte_budget(mut self, bytes: u64) -> Self {
        self.chunk_byte_budget = bytes.max(1);
        self
    }

    #[must_use]
    pub fn with_dense_batch_values(mut self, values: u64) -> Self {
        self.dense_batch_values = values.max(1);
        self
    }

    #[must_use]
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers.max(1);
        self
    }

    /// Worker executable: explicit setting first, then the binary that
    /// ships next to the running executable.
    pub fn resolve_worker_bin(&self) -> Result<PathBuf, String> {
        if let Some(path) = &self.worker_bin {
            return Ok(path.clone());
        }
        let current_exe = std::env::current_exe()
            .map_err(|e| format!("failed to determine executable path: {e}"))?;
        let bin_dir = current_exe
            .parent()
            .ok_or_else(|| "failed to resolve executable directory".to_string())?;
        let direct = bin_dir.join(WORKER_BIN_NAME);
        if direct.exists() {
            return Ok(direct);
        }
        // test and bench executables live one level below target/<profile>/
        let parent = bin_dir
            .parent()
            .map(|p| p.join(WORKER_BIN_NAME))
            .filter(|p| p.exists());
        Ok(parent.unwrap_or(direct))
    }
}

#[must_use]
pub fn resolve_cache_dir() -> PathBuf {
    resolve_cache_dir_with(&|name: &str| std::env::var(name).ok())
}

fn resolve_cache_dir_with<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = lookup(ENV_RAMDATA_CACHE_DIR) {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    if let Some(xdg_cache_home) = lookup("XDG_CACHE_HOME") {
        let trimmed = xdg_cache_home.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join("ramdata");
        }
    }

    if let Some(home) = lookup("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join(".cache").join("ramdata");
        }
    }

    PathBuf::from(".ramdata").join("cache")
}

fn env_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize<F>(lookup: &F, name: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
