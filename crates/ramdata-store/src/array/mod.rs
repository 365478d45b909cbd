// SPDX-License-Identifier: Apache-2.0

//! Chunked N-dimensional arrays in the zarr v2 directory layout:
//! `<array>/.zarray` holds the metadata, `<array>/.zattrs` free
//! attributes and `<array>/<i>.<j>` one file per chunk.

pub mod codec;
pub mod selection;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ramdata_core::Value;
use ramdata_model::{ArrayData, ColumnValues, DType};
use tracing::debug;

use self::codec::{coerce_for_dtype, decode_chunk, decode_values, encode_chunk, parse_fill};
use self::selection::{for_each_product, plan_dim, DimSelection, Selection};
use crate::backends::BackingStore;
use crate::error::{StoreError, StoreErrorCode};
use crate::paths::{join_key, zarray_key, zattrs_key};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Compressor {
    pub id: String,
    pub level: i32,
}

impl Compressor {
    #[must_use]
    pub fn zstd() -> Self {
        Self {
            id: "zstd".to_string(),
            level: 3,
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.id != "zstd" {
            return Err(StoreError::new(
                StoreErrorCode::Unsupported,
                format!("compressor `{}` is not supported", self.id),
            ));
        }
        Ok(())
    }
}

fn default_separator() -> String {
    ".".to_string()
}

/// Contents of `.zarray`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArrayMeta {
    pub zarr_format: u32,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: DType,
    pub fill_value: serde_json::Value,
    pub compressor: Option<Compressor>,
    pub order: String,
    pub filters: Option<Vec<serde_json::Value>>,
    #[serde(default = "default_separator")]
    pub dimension_separator: String,
}

impl ArrayMeta {
    #[must_use]
    pub fn new(shape: Vec<u64>, chunks: Vec<u64>, dtype: DType) -> Self {
        Self {
            zarr_format: 2,
            chunks: chunks.into_iter().map(|c| c.max(1)).collect(),
            shape,
            dtype,
            fill_value: dtype.default_fill(),
            compressor: Some(Compressor::zstd()),
            order: "C".to_string(),
            filters: None,
            dimension_separator: default_separator(),
        }
    }

    #[must_use]
    pub fn with_fill(mut self, fill: serde_json::Value) -> Self {
        self.fill_value = fill;
        self
    }

    #[must_use]
    pub fn with_compressor(mut self, compressor: Option<Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |msg: String| StoreError::new(StoreErrorCode::Validation, msg);
        if self.zarr_format != 2 {
            return Err(invalid(format!("unsupported zarr_format {}", self.zarr_format)));
        }
        if self.shape.len() != self.chunks.len() || self.shape.is_empty() {
            return Err(invalid(format!(
                "shape {:?} and chunks {:?} disagree",
                self.shape, self.chunks
            )));
        }
        if self.chunks.iter().any(|c| *c == 0) {
            return Err(invalid("chunk sizes must be positive".to_string()));
        }
        if self.order != "C" {
            return Err(invalid(format!("unsupported order `{}`", self.order)));
        }
        if let Some(c) = &self.compressor {
            c.check()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Elements per chunk file, edge chunks included.
    #[must_use]
    pub fn chunk_len(&self) -> usize {
        self.chunks.iter().product::<u64>() as usize
    }

    /// Number of chunks along each dimension.
    #[must_use]
    pub fn grid(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(s, c)| s.div_ceil(*c))
            .collect()
    }

    #[must_use]
    pub fn chunk_key(&self, index: &[u64]) -> String {
        index
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&self.dimension_separator)
    }

    #[must_use]
    pub fn fill(&self) -> Value {
        parse_fill(self.dtype, &self.fill_value)
    }

    fn chunk_strides(&self) -> Vec<u64> {
        c_strides(&self.chunks)
    }

    fn in_bounds_len(&self, index: &[u64]) -> u64 {
        index
            .iter()
            .enumerate()
            .map(|(d, &i)| self.chunks[d].min(self.shape[d].saturating_sub(i * self.chunks[d])))
            .product()
    }
}

fn c_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// A chunk's decoded values together with the flat chunk offset of the
/// first value, non-zero only for ranged reads.
struct LoadedChunk {
    data: ArrayData,
    base: u64,
}

#[derive(Clone)]
pub struct ChunkedArray {
    store: Arc<dyn BackingStore>,
    path: String,
    meta: ArrayMeta,
}

impl ChunkedArray {
    /// Creates an array at `path`, replacing anything stored there.
    pub fn create(
        store: Arc<dyn BackingStore>,
        path: &str,
        meta: ArrayMeta,
    ) -> Result<Self, StoreError> {
        meta.validate()?;
        store.remove(path)?;
        store.mkdir(path)?;
        let bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
        store.put(&zarray_key(path), &bytes)?;
        debug!(path, shape = ?meta.shape, chunks = ?meta.chunks, dtype = %meta.dtype, "created chunked array");
        Ok(Self {
            store,
            path: path.to_string(),
            meta,
        })
    }

    /// Opens an existing array; `NotInitialized` when `path` holds none.
    pub fn open(store: Arc<dyn BackingStore>, path: &str) -> Result<Self, StoreError> {
        let meta = Self::read_meta(store.as_ref(), path)?;
        Ok(Self::from_meta(store, path, meta))
    }

    pub fn read_meta(store: &dyn BackingStore, path: &str) -> Result<ArrayMeta, StoreError> {
        let raw = store.get(&zarray_key(path)).map_err(|e| {
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
        Ok(meta)
    }

    /// Wraps known metadata without touching storage.
    #[must_use]
    pub fn from_meta(store: Arc<dyn BackingStore>, path: &str, meta: ArrayMeta) -> Self {
        Self {
            store,
            path: path.to_string(),
            meta,
        }
    }

    pub fn exists(store: &dyn BackingStore, path: &str) -> Result<bool, StoreError> {
        store.exists(&zarray_key(path))
    }

    #[must_use]
    pub fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.meta.shape
    }

    fn chunk_path(&self, index: &[u64]) -> String {
        join_key(&self.path, &self.meta.chunk_key(index))
    }

    fn ranged_reads(&self) -> bool {
        self.meta.compressor.is_none() && self.meta.dtype.item_size().is_some()
    }

    /// Loads flat chunk offsets `[lo, hi]` of one chunk. `None` when the
    /// chunk was never written.
    fn load_chunk(&self, index: &[u64], lo: u64, hi: u64) -> Result<Option<LoadedChunk>, StoreError> {
        let key = self.chunk_path(index);
        if self.ranged_reads() {
            let size = self.meta.dtype.item_size().unwrap_or(1) as u64;
            let bytes = match self.store.get_range(&key, lo * size, (hi + 1) * size) {
                Ok(b) => b,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            let data = decode_values(self.meta.dtype, &bytes)?;
            if (data.len() as u64) < hi - lo + 1 {
                return Err(StoreError::new(
                    StoreErrorCode::Validation,
                    format!("chunk {key} is shorter than its declared shape"),
                ));
            }
            return Ok(Some(LoadedChunk { data, base: lo }));
        }
        let bytes = match self.store.get(&key) {
            Ok(b) => b,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let data = decode_chunk(
            self.meta.dtype,
            &bytes,
            self.meta.chunk_len(),
            self.meta.compressor.as_ref(),
        )?;
        Ok(Some(LoadedChunk { data, base: 0 }))
    }

    fn load_full_chunk(&self, index: &[u64]) -> Result<ArrayData, StoreError> {
        let len = self.meta.chunk_len();
        match self.load_chunk(index, 0, len as u64 - 1)? {
            Some(chunk) => Ok(chunk.data),
            None => Ok(ArrayData::filled(self.meta.dtype.kind(), &self.meta.fill(), len)),
        }
    }

    fn store_chunk(&self, index: &[u64], data: &ArrayData) -> Result<(), StoreError> {
        let bytes = encode_chunk(self.meta.dtype, data, self.meta.compressor.as_ref())?;
        self.store.put(&self.chunk_path(index), &bytes)
    }

    /// Orthogonal read. Each touched chunk is fetched exactly once.
    pub fn read(&self, selection: &Selection) -> Result<ColumnValues, StoreError> {
        let positions = selection.resolve(&self.meta.shape)?;
        let out_shape: Vec<u64> = positions.iter().map(|p| p.len() as u64).collect();
        let total = out_shape.iter().product::<u64>() as usize;
        let mut out = ArrayData::filled(self.meta.dtype.kind(), &self.meta.fill(), total);
        if total > 0 {
            let plans: Vec<_> = positions
                .iter()
                .zip(&self.meta.chunks)
                .map(|(p, c)| plan_dim(p, *c))
                .collect();
            let chunk_lists: Vec<Vec<u64>> = plans.iter().map(|p| p.keys().copied().collect()).collect();
            let chunk_refs: Vec<&[u64]> = chunk_lists.iter().map(Vec::as_slice).collect();
            let out_strides = c_strides(&out_shape);
            let chunk_strides = self.meta.chunk_strides();

            for_each_product(&chunk_refs, |index| {
                let index: Vec<u64> = index.iter().map(|i| **i).collect();
                let entries: Vec<&[(u64, u64)]> = plans
                    .iter()
                    .zip(&index)
                    .map(|(p, i)| p.get(i).map_or(&[][..], Vec::as_slice))
                    .collect();
                let lo: u64 = entries
                    .iter()
                    .zip(&chunk_strides)
                    .map(|(e, s)| e.iter().map(|x| x.0).min().unwrap_or(0) * s)
                    .sum();
                let hi: u64 = entries
                    .iter()
                    .zip(&chunk_strides)
                    .map(|(e, s)| e.iter().map(|x| x.0).max().unwrap_or(0) * s)
                    .sum();
                let Some(chunk) = self.load_chunk(&index, lo, hi)? else {
                    return Ok(());
                };
                for_each_product(&entries, |pairs| {
                    let mut src = 0u64;
                    let mut dst = 0u64;
                    for (d, (offset, out_pos)) in pairs.iter().enumerate() {
                        src += offset * chunk_strides[d];
                        dst += out_pos * out_strides[d];
                    }
                    out.copy_from(dst as usize, &chunk.data, (src - chunk.base) as usize)
                        .map_err(StoreError::from)
                })
            })?;
        }
        ColumnValues::with_shape(out, out_shape.iter().map(|n| *n as usize).collect())
            .map_err(StoreError::from)
    }

    /// Point read; `coords[k]` holds one index per dimension.
    pub fn read_coords(&self, coords: &[Vec<u64>]) -> Result<ArrayData, StoreError> {
        let groups = self.group_coords(coords)?;
        let mut out = ArrayData::filled(self.meta.dtype.kind(), &self.meta.fill(), coords.len());
        for (index, points) in groups {
            let lo = points.iter().map(|p| p.0).min().unwrap_or(0);
            let hi = points.iter().map(|p| p.0).max().unwrap_or(0);
            let Some(chunk) = self.load_chunk(&index, lo, hi)? else {
                continue;
            };
            for (flat, out_pos) in points {
                out.copy_from(out_pos, &chunk.data, (flat - chunk.base) as usize)?;
            }
        }
        Ok(out)
    }

    /// Orthogonal write of `data`, laid out in C order over the
    /// selection's shape. Chunks only partly covered are read first.
    pub fn write(&self, selection: &Selection, data: &ArrayData) -> Result<(), StoreError> {
        let positions = selection.resolve(&self.meta.shape)?;
        let total: usize = positions.iter().map(Vec::len).product();
        if total != data.len() {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("selection covers {total} values but {} were given", data.len()),
            ));
        }
        if total == 0 {
            return Ok(());
        }
        let data = coerce_for_dtype(self.meta.dtype, data.clone())?;
        let plans: Vec<_> = positions
            .iter()
            .zip(&self.meta.chunks)
            .map(|(p, c)| plan_dim(p, *c))
            .collect();
        let chunk_lists: Vec<Vec<u64>> = plans.iter().map(|p| p.keys().copied().collect()).collect();
        let chunk_refs: Vec<&[u64]> = chunk_lists.iter().map(Vec::as_slice).collect();
        let in_strides: Vec<u64> = c_strides(&positions.iter().map(|p| p.len() as u64).collect::<Vec<_>>());
        let chunk_strides = self.meta.chunk_strides();

        for_each_product(&chunk_refs, |index| {
            let index: Vec<u64> = index.iter().map(|i| **i).collect();
            let entries: Vec<&[(u64, u64)]> = plans
                .iter()
                .zip(&index)
                .map(|(p, i)| p.get(i).map_or(&[][..], Vec::as_slice))
                .collect();
            let distinct: u64 = entries
                .iter()
                .map(|e| e.iter().map(|x| x.0).collect::<BTreeSet<_>>().len() as u64)
                .product();
            let mut buf = if distinct == self.meta.in_bounds_len(&index) {
                ArrayData::filled(self.meta.dtype.kind(), &self.meta.fill(), self.meta.chunk_len())
            } else {
                self.load_full_chunk(&index)?
            };
            for_each_product(&entries, |pairs| {
                let mut dst = 0u64;
                let mut src = 0u64;
                for (d, (offset, in_pos)) in pairs.iter().enumerate() {
                    dst += offset * chunk_strides[d];
                    src += in_pos * in_strides[d];
                }
                buf.copy_from(dst as usize, &data, src as usize)
                    .map_err(StoreError::from)
            })?;
            self.store_chunk(&index, &buf)
        })
    }

    /// Point write; `values[k]` goes to `coords[k]`.
    pub fn write_coords(&self, coords: &[Vec<u64>], values: &ArrayData) -> Result<(), StoreError> {
        if coords.len() != values.len() {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("{} coordinates for {} values", coords.len(), values.len()),
            ));
        }
        let values = coerce_for_dtype(self.meta.dtype, values.clone())?;
        for (index, points) in self.group_coords(coords)? {
            let mut buf = self.load_full_chunk(&index)?;
            for (flat, src) in points {
                buf.copy_from(flat as usize, &values, src)?;
            }
            self.store_chunk(&index, &buf)?;
        }
        Ok(())
    }

    /// Groups points by chunk: chunk index to `(flat offset in chunk,
    /// position in input)`.
    fn group_coords(&self, coords: &[Vec<u64>]) -> Result<BTreeMap<Vec<u64>, Vec<(u64, usize)>>, StoreError> {
        let strides = self.meta.chunk_strides();
        let mut groups: BTreeMap<Vec<u64>, Vec<(u64, usize)>> = BTreeMap::new();
        for (k, point) in coords.iter().enumerate() {
            if point.len() != self.meta.ndim() {
                return Err(StoreError::new(
                    StoreErrorCode::Validation,
                    format!("coordinate {point:?} does not have {} dimensions", self.meta.ndim()),
                ));
            }
            let mut index = Vec::with_capacity(point.len());
            let mut flat = 0u64;
            for (d, &p) in point.iter().enumerate() {
                if p >= self.meta.shape[d] {
                    return Err(StoreError::new(
                        StoreErrorCode::OutOfRange,
                        format!("coordinate {point:?} outside shape {:?}", self.meta.shape),
                    ));
                }
                index.push(p / self.meta.chunks[d]);
                flat += (p % self.meta.chunks[d]) * strides[d];
            }
            groups.entry(index).or_default().push((flat, k));
        }
        Ok(groups)
    }

    /// Resets the part of each edge chunk that falls outside `shape` to
    /// the fill value, so growing back later reads fill there.
    fn clear_edge_tails(&self, shape: &[u64]) -> Result<(), StoreError> {
        let kept: Vec<u64> = shape
            .iter()
            .zip(&self.meta.shape)
            .zip(&self.meta.chunks)
            .map(|((&new, &old), &chunk)| new.div_ceil(chunk).saturating_mul(chunk).min(old))
            .collect();
        for d in 0..shape.len() {
            let (new, end) = (shape[d], kept[d]);
            if new >= end {
                continue;
            }
            let dims: Vec<DimSelection> = (0..shape.len())
                .map(|o| if o == d { DimSelection::Range(new, end) } else { DimSelection::Range(0, kept[o]) })
                .collect();
            let n: u64 = (0..shape.len()).map(|o| if o == d { end - new } else { kept[o] }).product();
            if n == 0 {
                continue;
            }
            let fill = ArrayData::filled(self.meta.dtype.kind(), &self.meta.fill(), n as usize);
            self.write(&Selection::new(dims), &fill)?;
        }
        Ok(())
    }

    /// Changes the shape. Chunks entirely outside the new shape are
    /// deleted; chunks straddling the new edge get their tail reset to
    /// the fill value.
    pub fn resize(&mut self, shape: Vec<u64>) -> Result<(), StoreError> {
        if shape.len() != self.meta.ndim() {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("cannot resize a {}-dimensional array to {shape:?}", self.meta.ndim()),
            ));
        }
        let mut meta = self.meta.clone();
        meta.shape = shape;
        let grid = meta.grid();
        let shrinking = meta.shape.iter().zip(&self.meta.shape).any(|(n, o)| n < o);
        if shrinking {
            self.clear_edge_tails(&meta.shape)?;
            for name in self.store.list(&self.path)? {
                if name.starts_with('.') {
                    continue;
                }
                let index: Option<Vec<u64>> = name
                    .split(meta.dimension_separator.as_str())
                    .map(|p| p.parse::<u64>().ok())
                    .collect();
                if let Some(index) = index {
                    if index.iter().zip(&grid).any(|(i, g)| i >= g) {
                        self.store.remove(&join_key(&self.path, &name))?;
                    }
                }
            }
        }
        let bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
        self.store.put(&zarray_key(&self.path), &bytes)?;
        self.meta = meta;
        Ok(())
    }

    /// The `.zattrs` object; empty when never written.
    pub fn attrs(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        read_attrs(self.store.as_ref(), &self.path)
    }

    pub fn set_attrs(&self, attrs: &serde_json::Map<String, serde_json::Value>) -> Result<(), StoreError> {
        write_attrs(self.store.as_ref(), &self.path, attrs)
    }
}

pub fn read_attrs(
    store: &dyn BackingStore,
    resource: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    match store.get(&zattrs_key(resource)) {
        Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("{resource}/.zattrs is not a JSON object"),
            )),
            Err(e) => Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("{resource}/.zattrs: {e}"),
            )),
        },
        Err(e) if e.is_not_found() => Ok(serde_json::Map::new()),
        Err(e) => Err(e),
    }
}

pub fn write_attrs(
    store: &dyn BackingStore,
    resource: &str,
    attrs: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(attrs)
        .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
    store.put(&zattrs_key(resource), &bytes)
}
