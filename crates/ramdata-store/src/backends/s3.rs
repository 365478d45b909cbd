// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{IF_NONE_MATCH, RANGE};

use super::http::validate_url;
use super::{BackendKind, BackingStore, NoopInstrumentation, StoreInstrumentation, StoreSpec};
use crate::error::{StoreError, StoreErrorCode};
use crate::paths::{join_key, StorePath};
use crate::retry::{BackoffPolicy, RetryPolicy};

/// Object store speaking the S3 REST subset: GET/PUT/HEAD/DELETE on
/// `<endpoint>/<bucket>/<key>` and ListObjectsV2 on the bucket.
pub struct S3LikeStore {
    pub endpoint: String,
    pub bucket: String,
    pub bearer_token: Option<String>,
    pub retry: RetryPolicy,
    allow_private_hosts: bool,
    client: Client,
    instrumentation: Arc<dyn StoreInstrumentation>,
}

impl S3LikeStore {
    #[must_use]
    pub fn new(endpoint: String, bucket: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            bearer_token: None,
            retry: RetryPolicy::default(),
            allow_private_hosts: false,
            client: Client::new(),
            instrumentation: Arc::new(NoopInstrumentation),
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

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

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    fn object_url(&self, key: &str) -> Result<String, StoreError> {
        let key = StorePath::parse(key)?;
        let url = format!("{}/{}", self.bucket_url(), key.as_str());
        validate_url(&url, self.allow_private_hosts)?;
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Sends the request built by `build`, retrying transport errors
    /// and 5xx answers with backoff.
    fn send_with_retry<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.authorize(build()).send() {
                Ok(resp) if resp.status().is_server_error() => {
                    self.instrumentation
                        .observe_error("s3like", StoreErrorCode::Network);
                    if attempt >= self.retry.max_attempts {
                        return Err(StoreError::new(
                            StoreErrorCode::Network,
                            format!("s3-like request failed: {}", resp.status()),
                        ));
                    }
                }
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    self.instrumentation
                        .observe_error("s3like", StoreErrorCode::Network);
                    if attempt >= self.retry.max_attempts {
                        return Err(StoreError::new(StoreErrorCode::Network, err.to_string()));
                    }
                }
            }
            thread::sleep(self.retry.delay_for_attempt(attempt));
        }
    }

    fn read_body(resp: Response, key: &str) -> Result<Vec<u8>, StoreError> {
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(StoreError::new(StoreErrorCode::NotFound, format!("{key}: object not found")));
        }
        if status == 416 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("s3-like get failed for {key}: {status}"),
            ));
        }
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))
    }

    fn head(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.object_url(key)?;
        let resp = self.send_with_retry(|| self.client.head(&url))?;
        match resp.status().as_u16() {
            404 => Ok(false),
            _ if resp.status().is_success() => Ok(true),
            s => Err(StoreError::new(
                StoreErrorCode::Network,
                format!("s3-like head failed for {key}: {s}"),
            )),
        }
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        let resp = self.send_with_retry(|| self.client.delete(&url))?;
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            return Ok(());
        }
        Err(StoreError::new(
            StoreErrorCode::Network,
            format!("s3-like delete failed for {key}: {}", resp.status()),
        ))
    }

    /// One ListObjectsV2 sweep. With a delimiter the result holds the
    /// immediate children, otherwise every key below `prefix`.
    fn list_objects(&self, prefix: &str, delimited: bool) -> Result<Vec<String>, StoreError> {
        let url = self.bucket_url();
        validate_url(&url, self.allow_private_hosts)?;
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self.send_with_retry(|| {
                let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
                if delimited {
                    query.push(("delimiter", "/"));
                }
                if let Some(t) = &token {
                    query.push(("continuation-token", t.as_str()));
                }
                self.client.get(&url).query(&query)
            })?;
            if !resp.status().is_success() {
                return Err(StoreError::new(
                    StoreErrorCode::Network,
                    format!("s3-like list failed for {prefix}: {}", resp.status()),
                ));
            }
            let body = resp
                .text()
                .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?;
            out.extend(xml_values(&body, "Key"));
            for block in xml_values(&body, "CommonPrefixes") {
                out.extend(xml_values(&block, "Prefix"));
            }
            let truncated = xml_values(&body, "IsTruncated")
                .first()
                .is_some_and(|v| v == "true");
            token = xml_values(&body, "NextContinuationToken").into_iter().next();
            if !truncated || token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    fn keys_below(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", key.trim_end_matches('/'));
        self.list_objects(&prefix, false)
    }
}

impl BackingStore for S3LikeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::S3Like
    }

    fn spec(&self) -> StoreSpec {
        StoreSpec::S3 {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            bearer_token: self.bearer_token.clone(),
            allow_private_hosts: self.allow_private_hosts,
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if self.head(key)? {
            return Ok(true);
        }
        Ok(!self.keys_below(key)?.is_empty())
    }

    fn mkdir(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(key)?;
        let started = Instant::now();
        let resp = self.send_with_retry(|| self.client.get(&url))?;
        let bytes = Self::read_body(resp, key)?;
        self.instrumentation
            .observe_download("s3like", bytes.len(), started.elapsed());
        Ok(bytes)
    }

    fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let url = self.object_url(key)?;
        let started = Instant::now();
        let resp = self.send_with_retry(|| {
            self.client
                .get(&url)
                .header(RANGE, format!("bytes={start}-{}", end - 1))
        })?;
        let whole = resp.status().as_u16() == 200;
        let bytes = Self::read_body(resp, key)?;
        self.instrumentation
            .observe_download("s3like", bytes.len(), started.elapsed());
        if whole {
            let end = (end as usize).min(bytes.len());
            let start = (start as usize).min(end);
            return Ok(bytes[start..end].to_vec());
        }
        Ok(bytes)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        let started = Instant::now();
        let resp = self.send_with_retry(|| self.client.put(&url).body(bytes.to_vec()))?;
        if !resp.status().is_success() {
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("s3-like put failed for {key}: {}", resp.status()),
            ));
        }
        self.instrumentation
            .observe_upload("s3like", bytes.len(), started.elapsed());
        Ok(())
    }

    fn create_exclusive(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.object_url(key)?;
        let resp = self.send_with_retry(|| {
            self.client
                .put(&url)
                .header(IF_NONE_MATCH, "*")
                .body(Vec::new())
        })?;
        match resp.status().as_u16() {
            412 | 409 => Ok(false),
            _ if resp.status().is_success() => Ok(true),
            s => Err(StoreError::new(
                StoreErrorCode::Network,
                format!("s3-like conditional put failed for {key}: {s}"),
            )),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        for child in self.keys_below(key)? {
            self.delete_object(&child)?;
        }
        self.delete_object(key)
    }

    fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let src = src.trim_end_matches('/');
        let dst = dst.trim_end_matches('/');
        let mut copied = false;
        if self.head(src)? {
            let bytes = self.get(src)?;
            self.put(dst, &bytes)?;
            copied = true;
        }
        for child in self.keys_below(src)? {
            let suffix = child.strip_prefix(src).unwrap_or(&child).trim_start_matches('/');
            let bytes = self.get(&child)?;
            self.put(&join_key(dst, suffix), &bytes)?;
            copied = true;
        }
        if !copied {
            return Err(StoreError::new(StoreErrorCode::NotFound, format!("{src}: not found")));
        }
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        if self.exists(dst)? {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                format!("cannot move {src}: {dst} already exists"),
            ));
        }
        // no server-side rename: copy then delete
        self.copy(src, dst)?;
        self.remove(src)
    }

    fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = StorePath::parse(key)?;
        let prefix = if key.is_root() {
            String::new()
        } else {
            format!("{}/", key.as_str())
        };
        let mut names = BTreeSet::new();
        for entry in self.list_objects(&prefix, true)? {
            let name = entry
                .strip_prefix(&prefix)
                .unwrap_or(&entry)
                .trim_end_matches('/');
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// Text of every `<tag>...</tag>` element, entity-decoded.
fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        out.push(decode_entities(&after[..end]));
        rest = &after[end + close.len()..];
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::xml_values;

    #[test]
    fn list_response_fields_are_extracted() {
        let body = "<ListBucketResult><IsTruncated>false</IsTruncated>\
            <Contents><Key>rd/a&amp;b</Key></Contents>\
            <CommonPrefixes><Prefix>rd/layer/</Prefix></CommonPrefixes></ListBucketResult>";
        assert_eq!(xml_values(body, "Key"), vec!["rd/a&b"]);
        let blocks = xml_values(body, "CommonPrefixes");
        assert_eq!(xml_values(&blocks[0], "Prefix"), vec!["rd/layer/"]);
        assert_eq!(xml_values(body, "IsTruncated"), vec!["false"]);
    }
}
