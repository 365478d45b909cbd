// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod canonical;
pub mod config;
mod errors;
pub mod logging;
mod value;

use sha2::{Digest, Sha256};

pub use config::{resolve_cache_dir, EngineConfig, IsolationPolicy};
pub use errors::{ErrorCode, ErrorContext, MachineError, ResultExt, ERROR_CODES};
pub use value::Value;

pub const CRATE_NAME: &str = "ramdata-core";

/// Version string written into every persisted attributes record.
pub const FORMAT_VERSION: &str = "1";

pub const ENV_RAMDATA_LOG_LEVEL: &str = "RAMDATA_LOG_LEVEL";
pub const ENV_RAMDATA_CACHE_DIR: &str = "RAMDATA_CACHE_DIR";
pub const ENV_RAMDATA_LOCK_POLL_MS: &str = "RAMDATA_LOCK_POLL_MS";
pub const ENV_RAMDATA_WORKER_BIN: &str = "RAMDATA_WORKER_BIN";
pub const ENV_RAMDATA_ISOLATION: &str = "RAMDATA_ISOLATION";
pub const ENV_RAMDATA_CHUNK_BYTES: &str = "RAMDATA_CHUNK_BYTES";
pub const ENV_RAMDATA_DENSE_BATCH_VALUES: &str = "RAMDATA_DENSE_BATCH_VALUES";
pub const ENV_RAMDATA_NUM_WORKERS: &str = "RAMDATA_NUM_WORKERS";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
