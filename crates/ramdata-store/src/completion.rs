// SPDX-License-Identifier: Apache-2.0

//! Completion markers: `<resource>.completed` is written only after a
//! multi-step build of `resource` finished, so reruns can skip it.

use crate::backends::BackingStore;
use crate::error::StoreError;
use crate::paths::completion_marker_key;

pub fn mark_completed(store: &dyn BackingStore, resource: &str) -> Result<(), StoreError> {
    store.put(&completion_marker_key(resource), b"")
}

pub fn is_completed(store: &dyn BackingStore, resource: &str) -> Result<bool, StoreError> {
    store.exists(&completion_marker_key(resource))
}

pub fn clear_completed(store: &dyn BackingStore, resource: &str) -> Result<(), StoreError> {
    store.remove(&completion_marker_key(resource))
}
