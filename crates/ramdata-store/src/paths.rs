// SPDX-License-Identifier: Apache-2.0

use crate::error::{StoreError, StoreErrorCode};

pub const ZARRAY_FILE: &str = ".zarray";
pub const ZATTRS_FILE: &str = ".zattrs";
pub const LOCK_SUFFIX: &str = ".lock";
pub const ATTRS_LOCK_SUFFIX: &str = ".attrs.lock";
pub const COMPLETED_SUFFIX: &str = ".completed";

/// A validated store key: relative, `/`-separated, without `.` or `..`
/// segments. The empty key names the store root.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct StorePath(String);

impl StorePath {
    pub fn parse(value: impl Into<String>) -> Result<Self, StoreError> {
        let value = value.into();
        if value.starts_with('/') || value.contains('\\') {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("store path `{value}` must be relative"),
            ));
        }
        let trimmed = value.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self(String::new()));
        }
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::new(
                    StoreErrorCode::Validation,
                    format!("store path `{value}` must be normalized"),
                ));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends already-valid segments.
    #[must_use]
    pub fn join(&self, child: &str) -> String {
        join_key(&self.0, child)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(
            self.0
                .rsplit_once('/')
                .map_or_else(String::new, |(p, _)| p.to_string()),
        ))
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }
}

/// Joins two key fragments with a single `/`.
#[must_use]
pub fn join_key(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

#[must_use]
pub fn zarray_key(array: &str) -> String {
    join_key(array, ZARRAY_FILE)
}

#[must_use]
pub fn zattrs_key(resource: &str) -> String {
    join_key(resource, ZATTRS_FILE)
}

/// Marker whose existence means `resource` is locked.
#[must_use]
pub fn lock_marker_key(resource: &str) -> String {
    format!("{}{LOCK_SUFFIX}", resource.trim_end_matches('/'))
}

/// Lock guarding the attributes of `resource`.
#[must_use]
pub fn attrs_lock_resource(resource: &str) -> String {
    format!("{}.attrs", resource.trim_end_matches('/'))
}

#[must_use]
pub fn completion_marker_key(resource: &str) -> String {
    format!("{}{COMPLETED_SUFFIX}", resource.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::{attrs_lock_resource, join_key, lock_marker_key, StorePath, ATTRS_LOCK_SUFFIX};

    #[test]
    fn parse_rejects_escaping_paths() {
        assert!(StorePath::parse("/abs").is_err());
        assert!(StorePath::parse("a/../b").is_err());
        assert!(StorePath::parse("a//b").is_err());
        assert_eq!(StorePath::parse("a/b/").expect("trailing").as_str(), "a/b");
        assert!(StorePath::parse("").expect("root").is_root());
    }

    #[test]
    fn attrs_lock_marker_uses_the_conventional_suffix() {
        let marker = lock_marker_key(&attrs_lock_resource("rd/barcodes/meta"));
        assert_eq!(marker, format!("rd/barcodes/meta{ATTRS_LOCK_SUFFIX}"));
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join_key("", "a"), "a");
        assert_eq!(join_key("a/", "/b"), "a/b");
        assert_eq!(StorePath::parse("a/b").expect("p").parent().expect("parent").as_str(), "a");
    }
}
