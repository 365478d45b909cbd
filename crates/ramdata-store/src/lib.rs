// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod array;
pub mod backends;
pub mod completion;
mod error;
pub mod isolation;
pub mod lock;
pub mod paths;
pub mod retry;
pub mod storage;

pub use array::selection::{DimSelection, Selection};
pub use array::{ArrayMeta, ChunkedArray, Compressor};
pub use backends::{
    open_store, validate_backend_compiled, BackendKind, BackingStore, NoopInstrumentation,
    StoreInstrumentation, StoreMetrics, StoreMetricsCollector, StoreSpec,
};
pub use completion::{clear_completed, is_completed, mark_completed};
pub use error::{StoreError, StoreErrorCode, STORE_ERROR_CODES};
pub use isolation::IsolationServer;
pub use lock::{AttrsMap, LockGuard, SpinLockCoordinator, VersionedAttrs};
pub use paths::StorePath;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use storage::{ArrayHandle, Storage};

pub const CRATE_NAME: &str = "ramdata-store";
