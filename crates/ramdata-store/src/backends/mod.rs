// SPDX-License-Identifier: Apache-2.0

#[cfg(feature = "backend-s3")]
pub mod http;
pub mod local;
#[cfg(feature = "backend-s3")]
pub mod s3;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{StoreError, StoreErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    HttpReadonly,
    S3Like,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::HttpReadonly => "http-readonly",
            Self::S3Like => "s3-like",
        }
    }
}

pub fn validate_backend_compiled(kind: BackendKind) -> Result<(), StoreError> {
    match kind {
        BackendKind::Local => Ok(()),
        BackendKind::HttpReadonly | BackendKind::S3Like => {
            #[cfg(feature = "backend-s3")]
            {
                Ok(())
            }
            #[cfg(not(feature = "backend-s3"))]
            {
                Err(StoreError::new(
                    StoreErrorCode::Unsupported,
                    format!(
                        "backend `{}` is not compiled in; rebuild with `--features backend-s3`",
                        kind.as_str()
                    ),
                ))
            }
        }
    }
}

/// Serializable description of a store, enough for another process to
/// open the same store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreSpec {
    Local {
        root: PathBuf,
    },
    Http {
        base_url: String,
        #[serde(default)]
        cache_root: Option<PathBuf>,
        #[serde(default)]
        allow_private_hosts: bool,
    },
    S3 {
        endpoint: String,
        bucket: String,
        #[serde(default)]
        bearer_token: Option<String>,
        #[serde(default)]
        allow_private_hosts: bool,
    },
}

impl StoreSpec {
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::Http { .. } => BackendKind::HttpReadonly,
            Self::S3 { .. } => BackendKind::S3Like,
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        !matches!(self, Self::Local { .. })
    }
}

/// Uniform filesystem-like operations over one store. Keys are
/// relative `/`-separated paths; see [`crate::StorePath`].
pub trait BackingStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn spec(&self) -> StoreSpec;

    fn is_remote(&self) -> bool {
        self.kind() != BackendKind::Local
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Creates a directory and its parents. Stores without directories
    /// treat this as a no-op.
    fn mkdir(&self, key: &str) -> Result<(), StoreError>;

    /// Whole object. Missing keys are `NotFound`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Bytes `[start, end)` of an object, truncated at its end.
    fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Atomically creates an empty marker at `key`. Returns `false`
    /// when something already exists there.
    fn create_exclusive(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes an object or a whole subtree. Absent keys are a no-op.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Recursive copy of an object or subtree.
    fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError>;

    fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError>;

    /// Names of the immediate children of `key`, sorted. A missing key
    /// lists as empty.
    fn list(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// Opens the store described by `spec`.
pub fn open_store(spec: &StoreSpec) -> Result<Arc<dyn BackingStore>, StoreError> {
    validate_backend_compiled(spec.kind())?;
    match spec {
        StoreSpec::Local { root } => Ok(Arc::new(local::LocalFsStore::new(root.clone()))),
        #[cfg(feature = "backend-s3")]
        StoreSpec::Http {
            base_url,
            cache_root,
            allow_private_hosts,
        } => {
            let mut store = http::HttpReadonlyStore::new(base_url.clone())
                .with_private_hosts(*allow_private_hosts);
            if let Some(root) = cache_root {
                store = store.with_cache(root.clone(), false);
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "backend-s3")]
        StoreSpec::S3 {
            endpoint,
            bucket,
            bearer_token,
            allow_private_hosts,
        } => Ok(Arc::new(
            s3::S3LikeStore::new(endpoint.clone(), bucket.clone())
                .with_bearer_token(bearer_token.clone())
                .with_private_hosts(*allow_private_hosts),
        )),
        #[cfg(not(feature = "backend-s3"))]
        _ => Err(StoreError::new(
            StoreErrorCode::Unsupported,
            "remote backends are not compiled in",
        )),
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreMetrics {
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub request_count: u64,
    pub download_count: u64,
    pub latency_ms_total: u128,
    pub failures_by_class: BTreeMap<String, u64>,
}

#[derive(Default)]
pub struct StoreMetricsCollector {
    inner: Mutex<StoreMetrics>,
}

impl StoreMetricsCollector {
    #[must_use]
    pub fn snapshot(&self) -> StoreMetrics {
        self.inner.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut m) = self.inner.lock() {
            *m = StoreMetrics::default();
        }
    }
}

pub trait StoreInstrumentation: Send + Sync + 'static {
    fn observe_download(&self, _backend: &str, _bytes: usize, _latency: Duration) {}
    fn observe_upload(&self, _backend: &str, _bytes: usize, _latency: Duration) {}
    fn observe_error(&self, _backend: &str, _code: StoreErrorCode) {}
}

#[derive(Default)]
pub struct NoopInstrumentation;

impl StoreInstrumentation for NoopInstrumentation {}

impl StoreInstrumentation for StoreMetricsCollector {
    fn observe_download(&self, _backend: &str, bytes: usize, latency: Duration) {
        if let Ok(mut m) = self.inner.lock() {
            m.bytes_downloaded = m.bytes_downloaded.saturating_add(bytes as u64);
            m.request_count = m.request_count.saturating_add(1);
            m.download_count = m.download_count.saturating_add(1);
            m.latency_ms_total = m.latency_ms_total.saturating_add(latency.as_millis());
        }
    }

    fn observe_upload(&self, _backend: &str, bytes: usize, latency: Duration) {
        if let Ok(mut m) = self.inner.lock() {
            m.bytes_uploaded = m.bytes_uploaded.saturating_add(bytes as u64);
            m.request_count = m.request_count.saturating_add(1);
            m.latency_ms_total = m.latency_ms_total.saturating_add(latency.as_millis());
        }
    }

    fn observe_error(&self, _backend: &str, code: StoreErrorCode) {
        if let Ok(mut m) = self.inner.lock() {
            m.request_count = m.request_count.saturating_add(1);
            *m.failures_by_class.entry(code.as_str().to_string()).or_insert(0) += 1;
        }
    }
}
