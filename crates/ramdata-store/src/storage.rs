// SPDX-License-Identifier: Apache-2.0

//! `Storage` is the handle the table and matrix engines hold. It routes
//! every operation either straight to a backing store or through a
//! spawned [`IsolationServer`], as the configured policy dictates.

use std::path::PathBuf;
use std::sync::Arc;

use ramdata_core::canonical::{decode_bytes, encode_bytes};
use ramdata_core::EngineConfig;
use ramdata_model::{ArrayData, ColumnValues};
use tracing::debug;

use crate::array::selection::Selection;
use crate::array::{read_attrs, write_attrs, ArrayMeta, ChunkedArray};
use crate::backends::{open_store, BackendKind, BackingStore, StoreSpec};
use crate::error::{StoreError, StoreErrorCode};
use crate::isolation::{IsolationServer, Reply, Request, WirePayload};
use crate::paths::zarray_key;

#[derive(Clone)]
enum Backend {
    Direct(Arc<dyn BackingStore>),
    Isolated(Arc<IsolationServer>),
}

#[derive(Clone)]
pub struct Storage {
    backend: Backend,
    spec: StoreSpec,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("spec", &self.spec)
            .field("isolated", &self.is_isolated())
            .finish()
    }
}

fn unexpected(op: &str, reply: &Reply) -> StoreError {
    StoreError::new(
        StoreErrorCode::Internal,
        format!("worker answered `{op}` with an unexpected payload: {reply:?}"),
    )
}

impl Storage {
    /// Opens `spec`, spawning a worker when the isolation policy asks
    /// for one.
    pub fn open(spec: StoreSpec, config: Arc<EngineConfig>) -> Result<Self, StoreError> {
        if config.isolation.should_spawn(spec.is_remote()) {
            Self::isolated(spec, config)
        } else {
            Ok(Self::direct(open_store(&spec)?, config))
        }
    }

    /// An in-process local store with settings from the environment.
    pub fn local(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let spec = StoreSpec::Local { root: root.into() };
        Self::open(spec, Arc::new(EngineConfig::from_env()))
    }

    #[must_use]
    pub fn direct(store: Arc<dyn BackingStore>, config: Arc<EngineConfig>) -> Self {
        Self {
            spec: store.spec(),
            backend: Backend::Direct(store),
            config,
        }
    }

    pub fn isolated(spec: StoreSpec, config: Arc<EngineConfig>) -> Result<Self, StoreError> {
        let server = IsolationServer::spawn(&spec, &config)?;
        Ok(Self {
            backend: Backend::Isolated(Arc::new(server)),
            spec,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    #[must_use]
    pub fn is_isolated(&self) -> bool {
        matches!(self.backend, Backend::Isolated(_))
    }

    /// Worker process id when isolated.
    #[must_use]
    pub fn worker_pid(&self) -> Option<u32> {
        match &self.backend {
            Backend::Isolated(server) => Some(server.pid()),
            Backend::Direct(_) => None,
        }
    }

    /// A handle safe to move into another worker: remote stores get a
    /// freshly spawned server, local ones share this handle.
    pub fn fork_safe(&self) -> Result<Self, StoreError> {
        let spawn = match &self.backend {
            Backend::Isolated(_) => true,
            Backend::Direct(_) => {
                self.spec.is_remote()
                    && self.config.isolation != ramdata_core::IsolationPolicy::Never
            }
        };
        if spawn {
            debug!(backend = self.spec.kind().as_str(), "spawning fork-safe store worker");
            Self::isolated(self.spec.clone(), Arc::clone(&self.config))
        } else {
            Ok(self.clone())
        }
    }

    /// Stops the worker, if any. Idempotent; other clones of this handle
    /// fail with `StorageUnavailable` afterwards.
    pub fn terminate(&self) {
        if let Backend::Isolated(server) = &self.backend {
            server.terminate();
        }
    }

    fn call(server: &IsolationServer, request: &Request) -> Result<Reply, StoreError> {
        server.request(request)
    }

    pub fn create_array(&self, path: &str, meta: ArrayMeta) -> Result<ArrayHandle, StoreError> {
        let meta = match &self.backend {
            Backend::Direct(store) => ChunkedArray::create(Arc::clone(store), path, meta)?.meta().clone(),
            Backend::Isolated(server) => {
                let request = Request::ArrayCreate {
                    path: path.to_string(),
                    meta,
                };
                match Self::call(server, &request)? {
                    Reply::Meta(meta) => meta,
                    other => return Err(unexpected(request.name(), &other)),
                }
            }
        };
        Ok(ArrayHandle {
            storage: self.clone(),
            path: path.to_string(),
            meta,
        })
    }

    /// Opens the array at `path`; `ResourceNotInitialized` when absent.
    pub fn open_array(&self, path: &str) -> Result<ArrayHandle, StoreError> {
        let raw = self.get(&zarray_key(path)).map_err(|e| {
            if e.is_not_found() {
                StoreError::new(
                    StoreErrorCode::NotInitialized,
                    format!("no array stored at `{path}`"),
                )
            } else {
                e
            }
        })?;
        let meta: ArrayMeta = serde_json::from_slice(&raw).map_err(|e| {
            StoreError::new(StoreErrorCode::Validation, format!("{path}/.zarray: {e}"))
        })?;
        meta.validate()?;
        Ok(ArrayHandle {
            storage: self.clone(),
            path: path.to_string(),
            meta,
        })
    }

    pub fn array_exists(&self, path: &str) -> Result<bool, StoreError> {
        self.exists(&zarray_key(path))
    }

    pub fn read_attrs(
        &self,
        resource: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        read_attrs(self, resource)
    }

    pub fn write_attrs(
        &self,
        resource: &str,
        attrs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        write_attrs(self, resource, attrs)
    }
}

macro_rules! isolated_unit {
    ($server:expr, $request:expr) => {{
        let request = $request;
        match Storage::call($server, &request)? {
            Reply::Unit => Ok(()),
            other => Err(unexpected(request.name(), &other)),
        }
    }};
}

macro_rules! isolated_bool {
    ($server:expr, $request:expr) => {{
        let request = $request;
        match Storage::call($server, &request)? {
            Reply::Bool(v) => Ok(v),
            other => Err(unexpected(request.name(), &other)),
        }
    }};
}

macro_rules! isolated_bytes {
    ($server:expr, $request:expr) => {{
        let request = $request;
        match Storage::call($server, &request)? {
            Reply::Bytes(b64) => decode_bytes(&b64)
                .map_err(|e| StoreError::new(StoreErrorCode::Internal, e)),
            other => Err(unexpected(request.name(), &other)),
        }
    }};
}

impl BackingStore for Storage {
    fn kind(&self) -> BackendKind {
        self.spec.kind()
    }

    fn spec(&self) -> StoreSpec {
        self.spec.clone()
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.exists(key),
            Backend::Isolated(server) => isolated_bool!(server, Request::Exists { key: key.to_string() }),
        }
    }

    fn mkdir(&self, key: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.mkdir(key),
            Backend::Isolated(server) => isolated_unit!(server, Request::Mkdir { key: key.to_string() }),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.get(key),
            Backend::Isolated(server) => isolated_bytes!(server, Request::Get { key: key.to_string() }),
        }
    }

    fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.get_range(key, start, end),
            Backend::Isolated(server) => isolated_bytes!(
                server,
                Request::GetRange {
                    key: key.to_string(),
                    start,
                    end,
                }
            ),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.put(key, bytes),
            Backend::Isolated(server) => isolated_unit!(
                server,
                Request::Put {
                    key: key.to_string(),
                    b64: encode_bytes(bytes),
                }
            ),
        }
    }

    fn create_exclusive(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.create_exclusive(key),
            Backend::Isolated(server) => {
                isolated_bool!(server, Request::CreateExclusive { key: key.to_string() })
            }
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.remove(key),
            Backend::Isolated(server) => isolated_unit!(server, Request::Remove { key: key.to_string() }),
        }
    }

    fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.copy(src, dst),
            Backend::Isolated(server) => isolated_unit!(
                server,
                Request::Copy {
                    src: src.to_string(),
                    dst: dst.to_string(),
                }
            ),
        }
    }

    fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.rename(src, dst),
            Backend::Isolated(server) => isolated_unit!(
                server,
                Request::Rename {
                    src: src.to_string(),
                    dst: dst.to_string(),
                }
            ),
        }
    }

    fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match &self.backend {
            Backend::Direct(store) => store.list(key),
            Backend::Isolated(server) => {
                let request = Request::List { key: key.to_string() };
                match Self::call(server, &request)? {
                    Reply::Names(names) => Ok(names),
                    other => Err(unexpected(request.name(), &other)),
                }
            }
        }
    }
}

/// An opened chunked array reached through a [`Storage`].
#[derive(Clone, Debug)]
pub struct ArrayHandle {
    storage: Storage,
    path: String,
    meta: ArrayMeta,
}

impl ArrayHandle {
    #[must_use]
    pub fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.meta.shape
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn local(&self, store: &Arc<dyn BackingStore>) -> ChunkedArray {
        ChunkedArray::from_meta(Arc::clone(store), &self.path, self.meta.clone())
    }

    fn isolated_data(&self, server: &IsolationServer, request: &Request) -> Result<(ArrayData, Vec<usize>), StoreError> {
        match server.request(request)? {
            Reply::Data(payload) => {
                let data = payload.decode()?;
                Ok((data, payload.shape))
            }
            other => Err(unexpected(request.name(), &other)),
        }
    }

    pub fn read(&self, selection: &Selection) -> Result<ColumnValues, StoreError> {
        match &self.storage.backend {
            Backend::Direct(store) => self.local(store).read(selection),
            Backend::Isolated(server) => {
                let request = Request::ArrayRead {
                    path: self.path.clone(),
                    meta: self.meta.clone(),
                    selection: selection.clone(),
                };
                let (data, shape) = self.isolated_data(server, &request)?;
                ColumnValues::with_shape(data, shape).map_err(StoreError::from)
            }
        }
    }

    pub fn read_coords(&self, coords: &[Vec<u64>]) -> Result<ArrayData, StoreError> {
        match &self.storage.backend {
            Backend::Direct(store) => self.local(store).read_coords(coords),
            Backend::Isolated(server) => {
                let request = Request::ArrayReadCoords {
                    path: self.path.clone(),
                    meta: self.meta.clone(),
                    coords: coords.to_vec(),
                };
                self.isolated_data(server, &request).map(|(data, _)| data)
            }
        }
    }

    pub fn write(&self, selection: &Selection, data: &ArrayData) -> Result<(), StoreError> {
        match &self.storage.backend {
            Backend::Direct(store) => self.local(store).write(selection, data),
            Backend::Isolated(server) => isolated_unit!(
                server,
                Request::ArrayWrite {
                    path: self.path.clone(),
                    meta: self.meta.clone(),
                    selection: selection.clone(),
                    data: WirePayload::encode(data, vec![data.len()])?,
                }
            ),
        }
    }

    pub fn write_coords(&self, coords: &[Vec<u64>], data: &ArrayData) -> Result<(), StoreError> {
        match &self.storage.backend {
            Backend::Direct(store) => self.local(store).write_coords(coords, data),
            Backend::Isolated(server) => isolated_unit!(
                server,
                Request::ArrayWriteCoords {
                    path: self.path.clone(),
                    meta: self.meta.clone(),
                    coords: coords.to_vec(),
                    data: WirePayload::encode(data, vec![data.len()])?,
                }
            ),
        }
    }

    pub fn resize(&mut self, shape: Vec<u64>) -> Result<(), StoreError> {
        let meta = match &self.storage.backend {
            Backend::Direct(store) => {
                let mut array = self.local(store);
                array.resize(shape)?;
                array.meta().clone()
            }
            Backend::Isolated(server) => {
                let request = Request::ArrayResize {
                    path: self.path.clone(),
                    meta: self.meta.clone(),
                    shape,
                };
                match server.request(&request)? {
                    Reply::Meta(meta) => meta,
                    other => return Err(unexpected(request.name(), &other)),
                }
            }
        };
        self.meta = meta;
        Ok(())
    }

    /// Re-reads `.zarray`, picking up resizes made by other processes.
    pub fn refresh(&mut self) -> Result<(), StoreError> {
        self.meta = self.storage.open_array(&self.path)?.meta;
        Ok(())
    }

    pub fn attrs(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        self.storage.read_attrs(&self.path)
    }

    pub fn set_attrs(&self, attrs: &serde_json::Map<String, serde_json::Value>) -> Result<(), StoreError> {
        self.storage.write_attrs(&self.path, attrs)
    }
}
