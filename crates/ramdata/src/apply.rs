// SPDX-License-Identifier: Apache-2.0

//! Row-wise transforms from one layer into another, written in any
//! combination of storage modes.

use ramdata_core::EngineConfig;
use ramdata_model::{Axis, DType, RamtxMode};
use ramdata_mtx::{Batch, DenseWriter, PoolOptions, Ramtx, RamtxError, RamtxRecords, SparseWriter};
use ramdata_store::{is_completed, mark_completed};
use tracing::{info, info_span};

use crate::error::RamDataError;
use crate::dataset::RamData;

pub const DEFAULT_CHUNK_LEN: u64 = 65_536;
pub const DEFAULT_DENSE_CHUNKS: (u64, u64) = (1_000, 1_000);
pub const DEFAULT_TARGET_WEIGHT: u64 = 1_000_000;

/// One entry of the queried axis handed to a transform.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub axis: Axis,
    pub entry: u64,
    pub secondary: &'a [u64],
    pub values: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Modes to write. A sparse output sorted by one axis is computed
    /// from rows along that axis; dense outputs use `dense_axis`.
    pub modes: Vec<RamtxMode>,
    pub dense_axis: Axis,
    /// Output value type; the source's when unset.
    pub dtype: Option<DType>,
    pub chunk_len: u64,
    pub dense_chunks: (u64, u64),
    pub target_weight: u64,
    pub num_workers: usize,
    /// Rewrite outputs already marked completed.
    pub overwrite: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            modes: vec![RamtxMode::SparseForQueryingBarcodes],
            dense_axis: Axis::Barcodes,
            dtype: None,
            chunk_len: DEFAULT_CHUNK_LEN,
            dense_chunks: DEFAULT_DENSE_CHUNKS,
            target_weight: DEFAULT_TARGET_WEIGHT,
            num_workers: 1,
            overwrite: false,
        }
    }
}

impl ApplyOptions {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            num_workers: config.num_workers.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_modes(mut self, modes: Vec<RamtxMode>) -> Self {
        self.modes = modes;
        self
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: Vec<RamtxMode>,
    /// Outputs left alone because they were already completed.
    pub skipped: Vec<RamtxMode>,
    /// Records written, summed over outputs.
    pub num_records: u64,
}

fn transform<F>(axis: Axis, records: RamtxRecords, func: &F, keep_zeros: bool) -> Result<RamtxRecords, RamtxError>
where
    F: Fn(Row<'_>) -> Vec<f64>,
{
    let mut out = RamtxRecords {
        entries: Vec::with_capacity(records.len()),
        secondary: Vec::with_capacity(records.len()),
        values: Vec::with_capacity(records.len()),
    };
    for (entry, secondary, values) in records.iter() {
        let mapped = func(Row {
            axis,
            entry,
            secondary,
            values,
        });
        if mapped.len() != secondary.len() {
            return Err(RamtxError::validation(format!(
                "transform returned {} values for {} records of {axis} {entry}",
                mapped.len(),
                secondary.len()
            )));
        }
        let (kept_secondary, kept_values): (Vec<u64>, Vec<f64>) = secondary
            .iter()
            .copied()
            .zip(mapped)
            .filter(|(_, v)| keep_zeros || *v != 0.0)
            .unzip();
        out.entries.push(entry);
        out.secondary.push(kept_secondary);
        out.values.push(kept_values);
    }
    Ok(out)
}

impl RamData {
    /// Applies `func` to every visible row of layer `src` and writes the
    /// results to layer `dst` in each of `options.modes`.
    ///
    /// Rows and their records are restricted to the current axis
    /// filters; outputs keep the unfiltered shape. Each finished output
    /// gets a completion marker, and outputs already marked are skipped
    /// unless `options.overwrite` is set, so an interrupted run can be
    /// repeated. Sparse outputs drop records the transform maps to zero.
    pub fn apply<F>(&mut self, src: &str, dst: &str, func: F, options: &ApplyOptions) -> Result<ApplyReport, RamDataError>
    where
        F: Fn(Row<'_>) -> Vec<f64> + Sync,
    {
        if src == dst {
            return Err(RamDataError::validation(format!("layer `{src}` cannot be rewritten onto itself")));
        }
        let source = self.layer(src)?;
        let mut report = ApplyReport::default();
        let pool = PoolOptions::default()
            .with_workers(options.num_workers)
            .with_ordered(true);
        let (num_barcodes, num_features) = self.shape();

        for &mode in &options.modes {
            let path = self.layer_mode_path(dst, mode)?;
            if !options.overwrite && is_completed(self.storage(), &path)? {
                info!(layer = dst, mode = mode.as_str(), "output already completed, skipping");
                report.skipped.push(mode);
                continue;
            }
            let query_axis = mode.sorted_by().unwrap_or(options.dense_axis);
            let _span = info_span!("apply", src, dst, mode = mode.as_str()).entered();
            let ramtx: Ramtx = source.get_ramtx(query_axis, mode == RamtxMode::Dense)?;
            let dtype = options.dtype.unwrap_or(ramtx.attrs().dtype);
            self.register_layer(dst)?;
            let batches = ramtx.batch_generator(None, options.target_weight, true)?;
            let keep_zeros = mode == RamtxMode::Dense;
            let work = |handle: &Ramtx, batch: &Batch| {
                transform(query_axis, handle.get(&batch.entries)?, &func, keep_zeros)
            };
            let records = if mode == RamtxMode::Dense {
                let mut writer = DenseWriter::create(
                    self.storage(),
                    &path,
                    num_barcodes,
                    num_features,
                    dtype,
                    options.dense_chunks,
                )?;
                ramtx.run_batches(batches, pool, work, |_, rows| writer.write_records(query_axis, &rows))?;
                writer.finish()?.num_records
            } else {
                let mut writer = SparseWriter::create(
                    self.storage(),
                    &path,
                    query_axis,
                    num_barcodes,
                    num_features,
                    dtype,
                    options.chunk_len,
                )?;
                ramtx.run_batches(batches, pool, work, |_, rows| writer.append_records(&rows))?;
                writer.finish()?.num_records
            };
            mark_completed(self.storage(), &path)?;
            info!(records, "output written");
            report.num_records += records;
            report.written.push(mode);
        }
        Ok(report)
    }
}
