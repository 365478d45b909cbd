// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ETAG, IF_NONE_MATCH, RANGE};

use super::{BackendKind, BackingStore, NoopInstrumentation, StoreInstrumentation, StoreSpec};
use crate::error::{StoreError, StoreErrorCode};
use crate::paths::StorePath;
use crate::retry::{BackoffPolicy, RetryPolicy};

/// Read-only store served over plain HTTP GET. Every mutating
/// operation is `Unsupported`.
#[derive(Clone)]
pub struct HttpReadonlyStore {
    pub base_url: String,
    pub cached_only_mode: bool,
    pub cache_root: Option<PathBuf>,
    pub retry: RetryPolicy,
    allow_private_hosts: bool,
    client: Client,
    etags: Arc<Mutex<HashMap<String, String>>>,
    instrumentation: Arc<dyn StoreInstrumentation>,
}

impl HttpReadonlyStore {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cached_only_mode: false,
            cache_root: None,
            retry: RetryPolicy::default(),
            allow_private_hosts: false,
            client: Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| Client::new()),
            etags: Arc::new(Mutex::new(HashMap::new())),
            instrumentation: Arc::new(NoopInstrumentation),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache_root: PathBuf, cached_only_mode: bool) -> Self {
        self.cache_root = Some(cache_root);
        self.cached_only_mode = cached_only_mode;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Allows loopback and private addresses, which are blocked by
    /// default.
    #[must_use]
    pub fn with_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn StoreInstrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    fn url_for(&self, key: &str) -> Result<String, StoreError> {
        let key = StorePath::parse(key)?;
        let url = format!("{}/{}", self.base_url, key.as_str());
        validate_url(&url, self.allow_private_hosts)?;
        Ok(url)
    }

    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(key.replace('/', "__")))
    }

    fn fetch_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if let Some(cached) = self.cache_path(key) {
            if cached.exists() && self.cached_only_mode {
                return fs::read(&cached).map_err(|e| StoreError::io(&e, key));
            }
            if !cached.exists() && self.cached_only_mode {
                return Err(StoreError::new(
                    StoreErrorCode::CachedOnly,
                    format!("cached-only mode enabled and `{key}` not present in cache"),
                ));
            }
        } else if self.cached_only_mode {
            return Err(StoreError::new(
                StoreErrorCode::CachedOnly,
                "cached-only mode enabled without cache root",
            ));
        }
        let url = self.url_for(key)?;

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let started = Instant::now();
            let mut req = self.client.get(&url);
            if let Ok(map) = self.etags.lock() {
                if let Some(etag) = map.get(key) {
                    req = req.header(IF_NONE_MATCH, etag);
                }
            }
            match req.send() {
                Ok(resp) => {
                    let bytes = handle_etag_response(resp, key, &self.etags, self.cache_path(key))?;
                    self.instrumentation
                        .observe_download("http", bytes.len(), started.elapsed());
                    return Ok(bytes);
                }
                Err(err) => {
                    self.instrumentation
                        .observe_error("http", StoreErrorCode::Network);
                    if attempt >= self.retry.max_attempts {
                        return Err(StoreError::new(StoreErrorCode::Network, err.to_string()));
                    }
                    thread::sleep(self.retry.delay_for_attempt(attempt));
                }
            }
        }
    }
}

impl BackingStore for HttpReadonlyStore {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpReadonly
    }

    fn spec(&self) -> StoreSpec {
        StoreSpec::Http {
            base_url: self.base_url.clone(),
            cache_root: self.cache_root.clone(),
            allow_private_hosts: self.allow_private_hosts,
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if self.cache_path(key).is_some_and(|p| p.exists()) {
            return Ok(true);
        }
        let url = self.url_for(key)?;
        let resp = self
            .client
            .head(&url)
            .send()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?;
        match resp.status().as_u16() {
            404 => Ok(false),
            _ if resp.status().is_success() => Ok(true),
            s => Err(StoreError::new(
                StoreErrorCode::Network,
                format!("http head failed for {key}: {s}"),
            )),
        }
    }

    fn mkdir(&self, _key: &str) -> Result<(), StoreError> {
        Err(read_only())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.fetch_bytes(key)
    }

    fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.cache_path(key).filter(|p| p.exists()) {
            let bytes = fs::read(&cached).map_err(|e| StoreError::io(&e, key))?;
            let end = (end as usize).min(bytes.len());
            let start = (start as usize).min(end);
            return Ok(bytes[start..end].to_vec());
        }
        if self.cached_only_mode {
            return Err(StoreError::new(
                StoreErrorCode::CachedOnly,
                format!("cached-only mode enabled and `{key}` not present in cache"),
            ));
        }
        let url = self.url_for(key)?;
        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .header(RANGE, format!("bytes={start}-{}", end - 1))
            .send()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(StoreError::new(StoreErrorCode::NotFound, format!("{key}: not found")));
        }
        if status == 416 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("http range fetch failed for {key}: {status}"),
            ));
        }
        let body = resp
            .bytes()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?
            .to_vec();
        self.instrumentation
            .observe_download("http", body.len(), started.elapsed());
        // servers that ignore Range answer 200 with the whole object
        if status == 200 {
            let end = (end as usize).min(body.len());
            let start = (start as usize).min(end);
            return Ok(body[start..end].to_vec());
        }
        Ok(body)
    }

    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(read_only())
    }

    fn create_exclusive(&self, _key: &str) -> Result<bool, StoreError> {
        Err(read_only())
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(read_only())
    }

    fn copy(&self, _src: &str, _dst: &str) -> Result<(), StoreError> {
        Err(read_only())
    }

    fn rename(&self, _src: &str, _dst: &str) -> Result<(), StoreError> {
        Err(read_only())
    }

    fn list(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::new(
            StoreErrorCode::Unsupported,
            "http readonly backend cannot list keys",
        ))
    }
}

fn read_only() -> StoreError {
    StoreError::new(StoreErrorCode::Unsupported, "http readonly backend cannot write")
}

pub(crate) fn validate_url(url: &str, allow_private_hosts: bool) -> Result<(), StoreError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| StoreError::new(StoreErrorCode::Validation, "missing host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if allow_private_hosts {
        return Ok(());
    }
    if host == "localhost" || host.ends_with(".localhost") {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            "blocked localhost host",
        ));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        let blocked = match ip {
            IpAddr::V4(v4) => {
                v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_broadcast()
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        if blocked {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                "blocked private host",
            ));
        }
    }
    Ok(())
}

fn handle_etag_response(
    response: Response,
    key: &str,
    etags: &Arc<Mutex<HashMap<String, String>>>,
    cache_path: Option<PathBuf>,
) -> Result<Vec<u8>, StoreError> {
    if response.status().as_u16() == 304 {
        if let Some(target) = cache_path {
            return fs::read(target).map_err(|e| StoreError::io(&e, key));
        }
        return Err(StoreError::new(
            StoreErrorCode::Internal,
            "received 304 without cache root",
        ));
    }

    if response.status().as_u16() == 404 {
        return Err(StoreError::new(
            StoreErrorCode::NotFound,
            format!("{key}: not found"),
        ));
    }

    if !response.status().is_success() {
        return Err(StoreError::new(
            StoreErrorCode::Network,
            format!("http fetch failed for {key}: {}", response.status()),
        ));
    }

    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|h| h.to_str().ok())
        .map(ToString::to_string);

    let bytes = response
        .bytes()
        .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?
        .to_vec();

    if let Some(target) = &cache_path {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(&e, key))?;
        }
        fs::write(target, &bytes).map_err(|e| StoreError::io(&e, key))?;
        // an etag is only useful when the cached body can answer a 304
        if let Some(tag) = etag {
            if let Ok(mut map) = etags.lock() {
                map.insert(key.to_string(), tag);
            }
        }
    }

    Ok(bytes)
}
