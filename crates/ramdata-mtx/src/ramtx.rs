// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ramdata_core::ErrorCode;
use ramdata_model::{Axis, CoordinateTranslator, DType, Filter, Mapping, RamtxAttrs, RamtxMode};
use ramdata_store::paths::join_key;
use ramdata_store::{ArrayHandle, Storage};

use crate::error::RamtxError;

pub const INDEX_ARRAY: &str = "index";
pub const RECORDS_ARRAY: &str = "records";
pub const MATRIX_ARRAY: &str = "matrix";

pub(crate) enum Layout {
    Sparse {
        index: ArrayHandle,
        records: ArrayHandle,
    },
    Dense {
        matrix: ArrayHandle,
    },
    Combined {
        components: Vec<Option<Ramtx>>,
        barcodes: Arc<Mapping>,
        features: Arc<Mapping>,
    },
}

/// A matrix queried one entry of `query_axis` at a time.
///
/// Sparse matrices can only be queried along the axis they are sorted
/// by; dense ones along either.
pub struct Ramtx {
    pub(crate) path: String,
    pub(crate) attrs: RamtxAttrs,
    pub(crate) layout: Layout,
    pub(crate) query_axis: Axis,
    pub(crate) barcode_filter: Option<Filter>,
    pub(crate) feature_filter: Option<Filter>,
    pub(crate) dense_batch_values: u64,
}

impl std::fmt::Debug for Ramtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ramtx")
            .field("path", &self.path)
            .field("mode", &self.attrs.mode)
            .field("query_axis", &self.query_axis)
            .field("combined", &self.is_combined())
            .finish_non_exhaustive()
    }
}

pub(crate) fn read_ramtx_attrs(storage: &Storage, path: &str) -> Result<Option<RamtxAttrs>, RamtxError> {
    let map = storage.read_attrs(path)?;
    if map.is_empty() {
        return Ok(None);
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map(Some)
        .map_err(|e| RamtxError::validation(format!("matrix attributes at `{path}`: {e}")))
}

pub(crate) fn write_ramtx_attrs(storage: &Storage, path: &str, attrs: &RamtxAttrs) -> Result<(), RamtxError> {
    match serde_json::to_value(attrs) {
        Ok(serde_json::Value::Object(map)) => Ok(storage.write_attrs(path, &map)?),
        Ok(_) => Err(RamtxError::new(ErrorCode::Internal, "matrix attributes are not an object")),
        Err(e) => Err(RamtxError::new(ErrorCode::Internal, e.to_string())),
    }
}

impl Ramtx {
    /// Whether a finished or in-progress matrix lives at `path`.
    pub fn exists(storage: &Storage, path: &str) -> Result<bool, RamtxError> {
        Ok(read_ramtx_attrs(storage, path)?.is_some())
    }

    pub fn open(storage: &Storage, path: &str) -> Result<Self, RamtxError> {
        let attrs = read_ramtx_attrs(storage, path)?.ok_or_else(|| {
            RamtxError::new(
                ErrorCode::ResourceNotInitialized,
                format!("no matrix at `{path}`"),
            )
        })?;
        let layout = match attrs.mode {
            RamtxMode::Dense => Layout::Dense {
                matrix: storage.open_array(&join_key(path, MATRIX_ARRAY))?,
            },
            RamtxMode::SparseForQueryingBarcodes | RamtxMode::SparseForQueryingFeatures => {
                Layout::Sparse {
                    index: storage.open_array(&join_key(path, INDEX_ARRAY))?,
                    records: storage.open_array(&join_key(path, RECORDS_ARRAY))?,
                }
            }
        };
        Ok(Self {
            path: path.to_string(),
            query_axis: attrs.mode.sorted_by().unwrap_or(Axis::Barcodes),
            attrs,
            layout,
            barcode_filter: None,
            feature_filter: None,
            dense_batch_values: storage.config().dense_batch_values,
        })
    }

    /// A matrix over component matrices sharing the combined axes'
    /// mappings. Components missing the layer are `None`.
    pub fn combined(
        components: Vec<Option<Ramtx>>,
        barcodes: Arc<Mapping>,
        features: Arc<Mapping>,
        query_axis: Axis,
    ) -> Result<Self, RamtxError> {
        if components.len() != barcodes.num_components() || components.len() != features.num_components() {
            return Err(RamtxError::validation(format!(
                "{} components for mappings of {} and {} components",
                components.len(),
                barcodes.num_components(),
                features.num_components()
            )));
        }
        let mut components = components;
        let mut all_dense = true;
        let mut num_records = 0u64;
        let mut dtype = None;
        let mut completed = true;
        for (c, slot) in components.iter_mut().enumerate() {
            let Some(component) = slot.as_mut() else {
                continue;
            };
            let (nb, nf) = (component.len(Axis::Barcodes), component.len(Axis::Features));
            if nb != barcodes.component_len(c) || nf != features.component_len(c) {
                return Err(RamtxError::validation(format!(
                    "component {c} is {nb}x{nf}, mapping expects {}x{}",
                    barcodes.component_len(c),
                    features.component_len(c)
                )));
            }
            component.set_query_axis(query_axis)?;
            all_dense &= component.attrs.mode == RamtxMode::Dense;
            num_records = num_records.saturating_add(component.attrs.num_records);
            dtype.get_or_insert(component.attrs.dtype);
            completed &= component.attrs.completed;
        }
        let mode = if all_dense {
            RamtxMode::Dense
        } else {
            RamtxMode::sparse_for(query_axis)
        };
        let mut attrs = RamtxAttrs::new(
            mode,
            barcodes.combined_len(),
            features.combined_len(),
            dtype.unwrap_or(DType::Float64),
            1,
        );
        attrs.num_records = num_records;
        attrs.completed = completed;
        let dense_batch_values = components
            .iter()
            .flatten()
            .map(|c| c.dense_batch_values)
            .max()
            .unwrap_or(10_000_000);
        Ok(Self {
            path: String::new(),
            attrs,
            layout: Layout::Combined {
                components,
                barcodes,
                features,
            },
            query_axis,
            barcode_filter: None,
            feature_filter: None,
            dense_batch_values,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn attrs(&self) -> &RamtxAttrs {
        &self.attrs
    }

    #[must_use]
    pub fn mode(&self) -> RamtxMode {
        self.attrs.mode
    }

    #[must_use]
    pub fn query_axis(&self) -> Axis {
        self.query_axis
    }

    #[must_use]
    pub fn is_combined(&self) -> bool {
        matches!(self.layout, Layout::Combined { .. })
    }

    #[must_use]
    pub fn is_dense(&self) -> bool {
        matches!(self.layout, Layout::Dense { .. })
    }

    /// Unfiltered length of `axis`.
    #[must_use]
    pub fn len(&self, axis: Axis) -> u64 {
        self.attrs.axis_len(axis)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.num_barcodes == 0 || self.attrs.num_features == 0
    }

    /// Changes the queried axis. Only dense matrices, or combined ones
    /// made of them, can switch.
    pub fn set_query_axis(&mut self, axis: Axis) -> Result<(), RamtxError> {
        if axis == self.query_axis {
            return Ok(());
        }
        match &mut self.layout {
            Layout::Dense { .. } => {}
            Layout::Sparse { .. } => {
                return Err(RamtxError::unsupported(format!(
                    "`{}` is sorted by {} and cannot be queried by {axis}",
                    self.path, self.query_axis
                )))
            }
            Layout::Combined { components, .. } => {
                for component in components.iter_mut().flatten() {
                    component.set_query_axis(axis)?;
                }
                if self.attrs.mode != RamtxMode::Dense {
                    self.attrs.mode = RamtxMode::sparse_for(axis);
                }
            }
        }
        self.query_axis = axis;
        Ok(())
    }

    pub fn with_query_axis(mut self, axis: Axis) -> Result<Self, RamtxError> {
        self.set_query_axis(axis)?;
        Ok(self)
    }

    #[must_use]
    pub fn filter(&self, axis: Axis) -> Option<&Filter> {
        match axis {
            Axis::Barcodes => self.barcode_filter.as_ref(),
            Axis::Features => self.feature_filter.as_ref(),
        }
    }

    /// Restricts `axis` to the set rows of `filter`. Entries outside it
    /// are dropped from queries on the primary axis and from records on
    /// the secondary one.
    pub fn set_filter(&mut self, axis: Axis, filter: Option<Filter>) -> Result<(), RamtxError> {
        if let Some(f) = &filter {
            if f.len() != self.len(axis) {
                return Err(RamtxError::validation(format!(
                    "{axis} filter of length {} for an axis of length {}",
                    f.len(),
                    self.len(axis)
                )));
            }
        }
        match axis {
            Axis::Barcodes => self.barcode_filter = filter,
            Axis::Features => self.feature_filter = filter,
        }
        Ok(())
    }

    /// Mapping for `axis` when combined.
    #[must_use]
    pub fn mapping(&self, axis: Axis) -> Option<&Arc<Mapping>> {
        match (&self.layout, axis) {
            (Layout::Combined { barcodes, .. }, Axis::Barcodes) => Some(barcodes),
            (Layout::Combined { features, .. }, Axis::Features) => Some(features),
            _ => None,
        }
    }

    /// Number of entries in one index chunk of the queried axis; the
    /// unit batches never split when they respect chunk boundaries.
    pub(crate) fn entry_chunk_len(&self) -> u64 {
        match &self.layout {
            Layout::Sparse { index, .. } => index.meta().chunks.first().copied().unwrap_or(1).max(1),
            Layout::Dense { matrix } => matrix
                .meta()
                .chunks
                .get(dense_dim(self.query_axis))
                .copied()
                .unwrap_or(1)
                .max(1),
            Layout::Combined { .. } => COMBINED_GROUP_LEN,
        }
    }

    /// A copy whose storage is safe to use from another worker.
    pub fn fork_safe(&self) -> Result<Self, RamtxError> {
        let layout = match &self.layout {
            Layout::Sparse { index, records } => {
                let storage = index.storage().fork_safe()?;
                Layout::Sparse {
                    index: storage.open_array(index.path())?,
                    records: storage.open_array(records.path())?,
                }
            }
            Layout::Dense { matrix } => {
                let storage = matrix.storage().fork_safe()?;
                Layout::Dense {
                    matrix: storage.open_array(matrix.path())?,
                }
            }
            Layout::Combined {
                components,
                barcodes,
                features,
            } => Layout::Combined {
                components: components
                    .iter()
                    .map(|c| c.as_ref().map(Ramtx::fork_safe).transpose())
                    .collect::<Result<_, _>>()?,
                barcodes: Arc::clone(barcodes),
                features: Arc::clone(features),
            },
        };
        Ok(Self {
            path: self.path.clone(),
            attrs: self.attrs.clone(),
            layout,
            query_axis: self.query_axis,
            barcode_filter: self.barcode_filter.clone(),
            feature_filter: self.feature_filter.clone(),
            dense_batch_values: self.dense_batch_values,
        })
    }

    /// Stops any worker process behind this matrix. Idempotent.
    pub fn terminate(&self) {
        match &self.layout {
            Layout::Sparse { index, .. } => index.storage().terminate(),
            Layout::Dense { matrix } => matrix.storage().terminate(),
            Layout::Combined { components, .. } => {
                for component in components.iter().flatten() {
                    component.terminate();
                }
            }
        }
    }
}

pub(crate) const COMBINED_GROUP_LEN: u64 = 4096;

/// Dimension of the dense matrix indexed by `axis`.
pub(crate) const fn dense_dim(axis: Axis) -> usize {
    match axis {
        Axis::Barcodes => 0,
        Axis::Features => 1,
    }
}
