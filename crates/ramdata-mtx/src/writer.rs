// SPDX-License-Identifier: Apache-2.0

//! Writers that lay out new matrices. Both leave `completed` unset in
//! the attributes until `finish`.

use ramdata_core::ErrorCode;
use ramdata_model::{ArrayData, Axis, DType, DataKind, RamtxAttrs, RamtxMode};
use ramdata_store::paths::join_key;
use ramdata_store::{ArrayHandle, ArrayMeta, BackingStore, DimSelection, Selection, Storage};
use tracing::{debug, info};

use crate::error::RamtxError;
use crate::query::RamtxRecords;
use crate::ramtx::{dense_dim, write_ramtx_attrs, INDEX_ARRAY, MATRIX_ARRAY, RECORDS_ARRAY};

/// Largest integer every value of `dtype` represents exactly.
fn exact_integer_limit(dtype: DType) -> Option<u64> {
    match dtype {
        DType::Float32 => Some(1 << 24),
        DType::Float64 => Some(1 << 53),
        other => other.int_bounds().map(|(_, hi)| hi as u64),
    }
}

fn check_value_dtype(dtype: DType) -> Result<(), RamtxError> {
    match dtype.kind() {
        DataKind::Int | DataKind::Float => Ok(()),
        _ => Err(RamtxError::new(
            ErrorCode::TypeConflict,
            format!("matrix values must be numeric, not {dtype}"),
        )),
    }
}

/// Converts values for an array of `dtype`; integer arrays reject
/// fractional values.
fn values_for(dtype: DType, values: Vec<f64>) -> Result<ArrayData, RamtxError> {
    if dtype.kind() == DataKind::Float {
        return Ok(ArrayData::Float(values));
    }
    if let Some(bad) = values.iter().find(|v| v.fract() != 0.0 || !v.is_finite()) {
        return Err(RamtxError::new(
            ErrorCode::TypeConflict,
            format!("value {bad} cannot be stored as {dtype}"),
        ));
    }
    Ok(ArrayData::Int(values.into_iter().map(|v| v as i64).collect()))
}

fn reset(storage: &Storage, path: &str) -> Result<(), RamtxError> {
    storage.remove(path)?;
    ramdata_store::clear_completed(storage, path)?;
    Ok(())
}

/// Appends entries of a sparse matrix in ascending order of the sorted
/// axis. Records are buffered and flushed a records chunk at a time.
pub struct SparseWriter {
    storage: Storage,
    path: String,
    attrs: RamtxAttrs,
    sorted_by: Axis,
    index: ArrayHandle,
    records: ArrayHandle,
    written: u64,
    last_entry: Option<u64>,
    pending_entries: Vec<u64>,
    pending_spans: Vec<i64>,
    pending_records: Vec<f64>,
}

impl SparseWriter {
    /// Starts a new matrix at `path`, replacing whatever was there.
    pub fn create(
        storage: &Storage,
        path: &str,
        sorted_by: Axis,
        num_barcodes: u64,
        num_features: u64,
        dtype: DType,
        chunk_len: u64,
    ) -> Result<Self, RamtxError> {
        check_value_dtype(dtype)?;
        let attrs = RamtxAttrs::new(RamtxMode::sparse_for(sorted_by), num_barcodes, num_features, dtype, chunk_len);
        let secondary_len = attrs.axis_len(sorted_by.other());
        if exact_integer_limit(dtype).is_some_and(|limit| secondary_len.saturating_sub(1) > limit) {
            return Err(RamtxError::validation(format!(
                "{dtype} records cannot address {secondary_len} {}",
                sorted_by.other()
            )));
        }
        reset(storage, path)?;
        let chunk_len = attrs.chunk_len;
        let index = storage.create_array(
            &join_key(path, INDEX_ARRAY),
            ArrayMeta::new(vec![attrs.axis_len(sorted_by), 2], vec![chunk_len, 2], DType::Int64)
                .with_fill(serde_json::json!(0)),
        )?;
        let records = storage.create_array(
            &join_key(path, RECORDS_ARRAY),
            ArrayMeta::new(vec![0, 2], vec![chunk_len, 2], dtype).with_fill(serde_json::json!(0)),
        )?;
        write_ramtx_attrs(storage, path, &attrs)?;
        debug!(path, mode = attrs.mode.as_str(), chunk_len, "sparse matrix created");
        Ok(Self {
            storage: storage.clone(),
            path: path.to_string(),
            attrs,
            sorted_by,
            index,
            records,
            written: 0,
            last_entry: None,
            pending_entries: Vec::new(),
            pending_spans: Vec::new(),
            pending_records: Vec::new(),
        })
    }

    #[must_use]
    pub fn attrs(&self) -> &RamtxAttrs {
        &self.attrs
    }

    /// Records appended so far, flushed or not.
    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.written + (self.pending_records.len() / 2) as u64
    }

    /// Appends the records of `entry`, which must come after every
    /// entry appended before.
    pub fn append(&mut self, entry: u64, secondary: &[u64], values: &[f64]) -> Result<(), RamtxError> {
        if secondary.len() != values.len() {
            return Err(RamtxError::validation(format!(
                "{} secondary indices for {} values",
                secondary.len(),
                values.len()
            )));
        }
        let primary_len = self.attrs.axis_len(self.sorted_by);
        if entry >= primary_len {
            return Err(RamtxError::new(
                ErrorCode::CoordinateOutOfRange,
                format!("entry {entry} outside {} of length {primary_len}", self.sorted_by),
            ));
        }
        if self.last_entry.is_some_and(|last| entry <= last) {
            return Err(RamtxError::validation(format!(
                "entry {entry} appended after {}",
                self.last_entry.unwrap_or_default()
            )));
        }
        let secondary_len = self.attrs.axis_len(self.sorted_by.other());
        if let Some(bad) = secondary.iter().find(|s| **s >= secondary_len) {
            return Err(RamtxError::new(
                ErrorCode::CoordinateOutOfRange,
                format!("secondary index {bad} outside length {secondary_len}"),
            ));
        }
        let start = self.num_records();
        self.pending_entries.push(entry);
        self.pending_spans
            .extend([start as i64, (start + secondary.len() as u64) as i64]);
        for (s, v) in secondary.iter().zip(values) {
            self.pending_records.extend([*s as f64, *v]);
        }
        self.last_entry = Some(entry);
        if self.num_records() - self.written >= self.attrs.chunk_len {
            self.flush()?;
        }
        Ok(())
    }

    /// Appends every entry of `records` in order.
    pub fn append_records(&mut self, records: &RamtxRecords) -> Result<(), RamtxError> {
        for (entry, secondary, values) in records.iter() {
            self.append(entry, secondary, values)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RamtxError> {
        if self.pending_entries.is_empty() {
            return Ok(());
        }
        let end = self.num_records();
        let capacity = self.records.shape().first().copied().unwrap_or(0);
        if end > capacity {
            let chunk = self.attrs.chunk_len;
            let grown = end.max(capacity.saturating_mul(2)).div_ceil(chunk) * chunk;
            self.records.resize(vec![grown, 2])?;
        }
        if end > self.written {
            let data = values_for(self.attrs.dtype, std::mem::take(&mut self.pending_records))?;
            self.records
                .write(&Selection::rows(DimSelection::Range(self.written, end)), &data)?;
        }
        self.index.write(
            &Selection::rows(DimSelection::Indices(std::mem::take(&mut self.pending_entries))),
            &ArrayData::Int(std::mem::take(&mut self.pending_spans)),
        )?;
        self.pending_records.clear();
        self.written = end;
        Ok(())
    }

    /// Flushes, trims `records` to its final length and marks the
    /// matrix completed.
    pub fn finish(mut self) -> Result<RamtxAttrs, RamtxError> {
        self.flush()?;
        self.records.resize(vec![self.written, 2])?;
        self.attrs.num_records = self.written;
        self.attrs.completed = true;
        write_ramtx_attrs(&self.storage, &self.path, &self.attrs)?;
        info!(path = %self.path, records = self.written, "sparse matrix written");
        Ok(self.attrs)
    }
}

/// Writes whole rows or columns of a dense matrix.
pub struct DenseWriter {
    storage: Storage,
    path: String,
    attrs: RamtxAttrs,
    matrix: ArrayHandle,
}

impl DenseWriter {
    /// Starts a zero-filled matrix at `path`, replacing whatever was
    /// there.
    pub fn create(
        storage: &Storage,
        path: &str,
        num_barcodes: u64,
        num_features: u64,
        dtype: DType,
        chunks: (u64, u64),
    ) -> Result<Self, RamtxError> {
        check_value_dtype(dtype)?;
        reset(storage, path)?;
        let attrs = RamtxAttrs::new(RamtxMode::Dense, num_barcodes, num_features, dtype, chunks.0);
        let matrix = storage.create_array(
            &join_key(path, MATRIX_ARRAY),
            ArrayMeta::new(vec![num_barcodes, num_features], vec![chunks.0, chunks.1], dtype)
                .with_fill(serde_json::json!(0)),
        )?;
        write_ramtx_attrs(storage, path, &attrs)?;
        Ok(Self {
            storage: storage.clone(),
            path: path.to_string(),
            attrs,
            matrix,
        })
    }

    #[must_use]
    pub fn attrs(&self) -> &RamtxAttrs {
        &self.attrs
    }

    /// Writes `values`, one row of the other axis' length per entry of
    /// `entries` along `axis`. Each cell is expected to be written once;
    /// non-zero values are counted as records.
    pub fn write_block(&mut self, axis: Axis, entries: &[u64], values: &[f64]) -> Result<(), RamtxError> {
        let width = self.attrs.axis_len(axis.other()) as usize;
        if values.len() != entries.len() * width {
            return Err(RamtxError::validation(format!(
                "{} values for {} entries of width {width}",
                values.len(),
                entries.len()
            )));
        }
        if entries.is_empty() {
            return Ok(());
        }
        let primary = DimSelection::Indices(entries.to_vec());
        let (selection, ordered) = if dense_dim(axis) == 0 {
            (Selection::new(vec![primary, DimSelection::All]), values.to_vec())
        } else {
            let n = entries.len();
            let mut transposed = vec![0.0; values.len()];
            for (i, row) in values.chunks_exact(width).enumerate() {
                for (j, v) in row.iter().enumerate() {
                    transposed[j * n + i] = *v;
                }
            }
            (Selection::new(vec![DimSelection::All, primary]), transposed)
        };
        let nonzero = ordered.iter().filter(|v| **v != 0.0).count() as u64;
        self.matrix.write(&selection, &values_for(self.attrs.dtype, ordered)?)?;
        self.attrs.num_records = self.attrs.num_records.saturating_add(nonzero);
        Ok(())
    }

    /// Densifies sparse records queried along `axis` and writes them.
    pub fn write_records(&mut self, axis: Axis, records: &RamtxRecords) -> Result<(), RamtxError> {
        let width = self.attrs.axis_len(axis.other()) as usize;
        let mut block = vec![0.0; records.len() * width];
        for (i, (_, secondary, values)) in records.iter().enumerate() {
            for (s, v) in secondary.iter().zip(values) {
                let s = *s as usize;
                if s >= width {
                    return Err(RamtxError::new(
                        ErrorCode::CoordinateOutOfRange,
                        format!("secondary index {s} outside length {width}"),
                    ));
                }
                block[i * width + s] = *v;
            }
        }
        self.write_block(axis, &records.entries, &block)
    }

    pub fn finish(mut self) -> Result<RamtxAttrs, RamtxError> {
        self.attrs.completed = true;
        write_ramtx_attrs(&self.storage, &self.path, &self.attrs)?;
        info!(path = %self.path, records = self.attrs.num_records, "dense matrix written");
        Ok(self.attrs)
    }
}
