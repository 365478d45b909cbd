// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ramdata_core::ErrorCode;
use ramdata_model::{Axis, Filter, Mapping, RamtxMode, RAMTX_MODES};
use ramdata_mtx::Ramtx;
use ramdata_store::paths::join_key;
use ramdata_store::Storage;
use tracing::debug;

use crate::error::RamDataError;

pub(crate) struct CombinedLayer {
    pub(crate) components: Vec<Option<RamDataLayer>>,
    pub(crate) barcodes: Arc<Mapping>,
    pub(crate) features: Arc<Mapping>,
}

/// One named layer of a dataset: up to one matrix per storage mode, or
/// the same layer of every component of a combined dataset.
///
/// Matrices are opened on request and carry the axis filters captured
/// when the layer was taken from its dataset.
pub struct RamDataLayer {
    name: String,
    path: String,
    storage: Storage,
    combined: Option<CombinedLayer>,
    barcode_filter: Option<Filter>,
    feature_filter: Option<Filter>,
}

impl std::fmt::Debug for RamDataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamDataLayer")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("combined", &self.combined.is_some())
            .finish_non_exhaustive()
    }
}

impl RamDataLayer {
    pub(crate) fn new(storage: &Storage, name: &str, path: String, combined: Option<CombinedLayer>) -> Self {
        Self {
            name: name.to_string(),
            path,
            storage: storage.clone(),
            combined,
            barcode_filter: None,
            feature_filter: None,
        }
    }

    pub(crate) fn with_filters(mut self, barcodes: Option<Filter>, features: Option<Filter>) -> Self {
        self.barcode_filter = barcodes;
        self.feature_filter = features;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Location of this layer's own matrix in `mode`.
    #[must_use]
    pub fn mode_path(&self, mode: RamtxMode) -> String {
        join_key(&self.path, mode.as_str())
    }

    /// Modes stored directly under this layer, not counting components.
    pub fn modes(&self) -> Result<Vec<RamtxMode>, RamDataError> {
        let mut modes = Vec::new();
        for mode in RAMTX_MODES {
            if Ramtx::exists(&self.storage, &self.mode_path(*mode))? {
                modes.push(*mode);
            }
        }
        Ok(modes)
    }

    /// A matrix answering queries along `query_axis`, filtered by the
    /// dataset's axis filters.
    ///
    /// A dense matrix and one sorted by `query_axis` both qualify;
    /// `prefer_dense` picks which is tried first. A combined layer
    /// without its own matrix combines those of its components.
    pub fn get_ramtx(&self, query_axis: Axis, prefer_dense: bool) -> Result<Ramtx, RamDataError> {
        let mut ramtx = self.open_unfiltered(query_axis, prefer_dense)?;
        ramtx.set_filter(Axis::Barcodes, self.barcode_filter.clone())?;
        ramtx.set_filter(Axis::Features, self.feature_filter.clone())?;
        Ok(ramtx)
    }

    fn open_unfiltered(&self, query_axis: Axis, prefer_dense: bool) -> Result<Ramtx, RamDataError> {
        let sparse = RamtxMode::sparse_for(query_axis);
        let order = if prefer_dense {
            [RamtxMode::Dense, sparse]
        } else {
            [sparse, RamtxMode::Dense]
        };
        for mode in order {
            let path = self.mode_path(mode);
            if Ramtx::exists(&self.storage, &path)? {
                debug!(layer = %self.name, mode = mode.as_str(), "opening matrix");
                return Ok(Ramtx::open(&self.storage, &path)?.with_query_axis(query_axis)?);
            }
        }
        let Some(combined) = &self.combined else {
            return Err(self.missing(query_axis));
        };
        let mut components = Vec::with_capacity(combined.components.len());
        for layer in &combined.components {
            let ramtx = match layer.as_ref().map(|l| l.open_unfiltered(query_axis, prefer_dense)) {
                Some(Ok(ramtx)) => Some(ramtx),
                Some(Err(e)) if e.code() == ErrorCode::ResourceNotInitialized => None,
                Some(Err(e)) => return Err(e),
                None => None,
            };
            components.push(ramtx);
        }
        if components.iter().all(Option::is_none) {
            return Err(self.missing(query_axis));
        }
        Ok(Ramtx::combined(
            components,
            combined.barcodes.clone(),
            combined.features.clone(),
            query_axis,
        )?)
    }

    fn missing(&self, query_axis: Axis) -> RamDataError {
        RamDataError::not_initialized(format!(
            "layer `{}` has no matrix queryable along {query_axis}",
            self.name
        ))
    }
}
