// SPDX-License-Identifier: Apache-2.0

//! Advisory locks kept in the backing store. A lock on `resource` is held
//! while the marker `<resource>.lock` exists. Markers carry no owner and
//! never expire: a crashed holder leaves the resource locked until the
//! marker is removed by hand.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use ramdata_core::canonical::stable_json_hash_hex;
use tracing::{debug, warn};

use crate::array::{read_attrs, write_attrs};
use crate::backends::BackingStore;
use crate::error::{StoreError, StoreErrorCode};
use crate::paths::{attrs_lock_resource, lock_marker_key};
use crate::storage::Storage;

pub type AttrsMap = serde_json::Map<String, serde_json::Value>;

/// Spin lock over store markers. Clones share the record of locks held
/// by this process; re-entrancy is tracked per thread.
#[derive(Clone)]
pub struct SpinLockCoordinator {
    store: Arc<dyn BackingStore>,
    poll_interval: Duration,
    held: Arc<Mutex<HashSet<(ThreadId, String)>>>,
}

impl SpinLockCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn for_storage(storage: &Storage) -> Self {
        Self::new(Arc::new(storage.clone()), storage.config().lock_poll_interval)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn held_key(resource: &str) -> (ThreadId, String) {
        (thread::current().id(), resource.to_string())
    }

    /// Whether the calling thread holds `resource` through this
    /// coordinator.
    #[must_use]
    pub fn is_held(&self, resource: &str) -> bool {
        self.held
            .lock()
            .map(|h| h.contains(&Self::held_key(resource)))
            .unwrap_or(false)
    }

    fn mark_held(&self, resource: &str, held: bool) -> Result<(), StoreError> {
        let mut set = self
            .held
            .lock()
            .map_err(|_| StoreError::new(StoreErrorCode::Internal, "lock registry poisoned"))?;
        if held {
            set.insert(Self::held_key(resource));
        } else {
            set.remove(&Self::held_key(resource));
        }
        Ok(())
    }

    /// Takes the lock on `resource`, polling until the marker is free. With
    /// `flag_does_not_wait_and_raise_error` a held lock fails immediately
    /// with `LockUnavailable`.
    pub fn acquire(
        &self,
        resource: &str,
        flag_does_not_wait_and_raise_error: bool,
    ) -> Result<LockGuard, StoreError> {
        if self.is_held(resource) {
            return Ok(LockGuard {
                coordinator: self.clone(),
                resource: resource.to_string(),
                owning: false,
            });
        }
        let marker = lock_marker_key(resource);
        loop {
            if self.store.create_exclusive(&marker)? {
                self.mark_held(resource, true)?;
                debug!(resource, "lock acquired");
                return Ok(LockGuard {
                    coordinator: self.clone(),
                    resource: resource.to_string(),
                    owning: true,
                });
            }
            if flag_does_not_wait_and_raise_error {
                return Err(StoreError::new(
                    StoreErrorCode::LockUnavailable,
                    format!("`{resource}` is locked by another holder"),
                ));
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Removes the marker; a missing marker is not an error.
    pub fn release(&self, resource: &str) -> Result<(), StoreError> {
        self.mark_held(resource, false)?;
        self.store.remove(&lock_marker_key(resource))?;
        debug!(resource, "lock released");
        Ok(())
    }

    /// Blocks until `resource` is unlocked without taking it. Returns at
    /// once when the calling thread is the holder.
    pub fn wait(&self, resource: &str) -> Result<(), StoreError> {
        if self.is_held(resource) {
            return Ok(());
        }
        let marker = lock_marker_key(resource);
        while self.store.exists(&marker)? {
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    pub fn check(&self, resource: &str) -> Result<bool, StoreError> {
        self.store.exists(&lock_marker_key(resource))
    }

    pub fn get_metadata(&self, resource: &str) -> Result<AttrsMap, StoreError> {
        let _guard = self.acquire(&attrs_lock_resource(resource), false)?;
        read_attrs(self.store.as_ref(), resource)
    }

    pub fn set_metadata(&self, resource: &str, attrs: &AttrsMap) -> Result<(), StoreError> {
        let _guard = self.acquire(&attrs_lock_resource(resource), false)?;
        write_attrs(self.store.as_ref(), resource, attrs)
    }

    /// Read-modify-write of the attributes of `resource` under its attrs
    /// lock. Returns the written attributes.
    pub fn update_metadata<F>(&self, resource: &str, update: F) -> Result<AttrsMap, StoreError>
    where
        F: FnOnce(&mut AttrsMap) -> Result<(), StoreError>,
    {
        let _guard = self.acquire(&attrs_lock_resource(resource), false)?;
        let mut attrs = read_attrs(self.store.as_ref(), resource)?;
        update(&mut attrs)?;
        write_attrs(self.store.as_ref(), resource, &attrs)?;
        Ok(attrs)
    }

    #[must_use]
    pub fn versioned(&self, resource: &str) -> VersionedAttrs {
        VersionedAttrs {
            coordinator: self.clone(),
            resource: resource.to_string(),
        }
    }
}

/// Releases the lock when dropped, if this guard took it.
#[must_use = "the lock is released when the guard is dropped"]
pub struct LockGuard {
    coordinator: SpinLockCoordinator,
    resource: String,
    owning: bool,
}

impl LockGuard {
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// False for guards returned by a re-entrant acquire.
    #[must_use]
    pub const fn is_owning(&self) -> bool {
        self.owning
    }

    /// Releases now and reports failures that `Drop` would only log.
    pub fn release(mut self) -> Result<(), StoreError> {
        if !self.owning {
            return Ok(());
        }
        self.owning = false;
        self.coordinator.release(&self.resource)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.owning {
            if let Err(e) = self.coordinator.release(&self.resource) {
                warn!(resource = %self.resource, error = %e, "failed to release lock");
            }
        }
    }
}

/// Attributes of one resource as a versioned cell. The version is the
/// SHA-256 of the canonical JSON.
pub struct VersionedAttrs {
    coordinator: SpinLockCoordinator,
    resource: String,
}

fn version_of(attrs: &AttrsMap) -> Result<String, StoreError> {
    stable_json_hash_hex(attrs).map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))
}

impl VersionedAttrs {
    pub fn read(&self) -> Result<(AttrsMap, String), StoreError> {
        let attrs = self.coordinator.get_metadata(&self.resource)?;
        let version = version_of(&attrs)?;
        Ok((attrs, version))
    }

    /// Writes `new` if the stored attributes still have `version`.
    /// Returns false, leaving storage untouched, otherwise.
    pub fn compare_and_swap(&self, version: &str, new: &AttrsMap) -> Result<bool, StoreError> {
        let coordinator = &self.coordinator;
        let _guard = coordinator.acquire(&attrs_lock_resource(&self.resource), false)?;
        let current = read_attrs(coordinator.store.as_ref(), &self.resource)?;
        if version_of(&current)? != version {
            return Ok(false);
        }
        write_attrs(coordinator.store.as_ref(), &self.resource, new)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::SpinLockCoordinator;
    use crate::backends::local::LocalFsStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn reentrant_acquire_does_not_release_the_outer_lock() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(LocalFsStore::new(dir.path().to_path_buf()));
        let locks = SpinLockCoordinator::new(store, Duration::from_millis(5));
        let outer = locks.acquire("col", true).expect("outer");
        {
            let inner = locks.acquire("col", true).expect("inner");
            assert!(!inner.is_owning());
        }
        assert!(locks.check("col").expect("check"));
        drop(outer);
        assert!(!locks.check("col").expect("check"));
    }
}
