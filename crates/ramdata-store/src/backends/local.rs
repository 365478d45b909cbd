// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{BackendKind, BackingStore, NoopInstrumentation, StoreInstrumentation, StoreSpec};
use crate::error::{StoreError, StoreErrorCode};
use crate::paths::StorePath;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct LocalFsStore {
    pub root: PathBuf,
    instrumentation: Arc<dyn StoreInstrumentation>,
}

impl LocalFsStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            instrumentation: Arc::new(NoopInstrumentation),
        }
    }

    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn StoreInstrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let key = StorePath::parse(key)?;
        if key.is_root() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(key.as_str()))
    }

    fn ensure_parent(path: &Path, key: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(&e, key))?;
        }
        Ok(())
    }
}

impl BackingStore for LocalFsStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn spec(&self) -> StoreSpec {
        StoreSpec::Local {
            root: self.root.clone(),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.exists())
    }

    fn mkdir(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&path).map_err(|e| StoreError::io(&e, key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let started = Instant::now();
        let path = self.path_for(key)?;
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&e, key))?;
        self.instrumentation
            .observe_download("localfs", bytes.len(), started.elapsed());
        Ok(bytes)
    }

    fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        let started = Instant::now();
        let path = self.path_for(key)?;
        let mut f = fs::File::open(&path).map_err(|e| StoreError::io(&e, key))?;
        let len = f.metadata().map_err(|e| StoreError::io(&e, key))?.len();
        let end = end.min(len);
        if start >= end {
            return Ok(Vec::new());
        }
        f.seek(SeekFrom::Start(start))
            .map_err(|e| StoreError::io(&e, key))?;
        let mut buf = vec![0u8; (end - start) as usize];
        f.read_exact(&mut buf).map_err(|e| StoreError::io(&e, key))?;
        self.instrumentation
            .observe_download("localfs", buf.len(), started.elapsed());
        Ok(buf)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let started = Instant::now();
        let path = self.path_for(key)?;
        Self::ensure_parent(&path, key)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::new(StoreErrorCode::Validation, "cannot write to store root"))?;
        let tmp = path.with_file_name(format!(
            ".{name}.tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        write_and_sync(&tmp, bytes, key)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&e, key)
        })?;
        self.instrumentation
            .observe_upload("localfs", bytes.len(), started.elapsed());
        Ok(())
    }

    fn create_exclusive(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path, key)?;
        // directory creation is atomic and fails if anything exists
        match fs::create_dir(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(&e, key)),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&e, key)),
        }
    }

    fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let from = self.path_for(src)?;
        let to = self.path_for(dst)?;
        if !from.exists() {
            return Err(StoreError::new(StoreErrorCode::NotFound, format!("{src}: not found")));
        }
        Self::ensure_parent(&to, dst)?;
        copy_recursive(&from, &to).map_err(|e| StoreError::io(&e, src))
    }

    fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let from = self.path_for(src)?;
        let to = self.path_for(dst)?;
        if to.exists() {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                format!("cannot move {src}: {dst} already exists"),
            ));
        }
        Self::ensure_parent(&to, dst)?;
        fs::rename(&from, &to).map_err(|e| StoreError::io(&e, src))
    }

    fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let path = self.path_for(key)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&e, key)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&e, key))?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.contains(".tmp-") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn write_and_sync(path: &Path, bytes: &[u8], key: &str) -> Result<(), StoreError> {
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(|e| StoreError::io(&e, key))?;
    f.write_all(bytes).map_err(|e| StoreError::io(&e, key))?;
    f.sync_all().map_err(|e| StoreError::io(&e, key))?;
    Ok(())
}

fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}
