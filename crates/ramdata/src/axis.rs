// SPDX-License-Identifier: Apache-2.0

//! One axis of a dataset: string identifiers, a metadata table and the
//! filter shared by both.

use std::collections::HashMap;
use std::sync::Arc;

use ramdata_core::ErrorCode;
use ramdata_frame::{FrameOptions, ZarrDataFrame};
use ramdata_model::{ArrayData, Axis, CoordinateTranslator, DType, Filter, Mapping};
use ramdata_store::paths::join_key;
use ramdata_store::{ArrayHandle, ArrayMeta, DimSelection, Selection, Storage};
use tracing::debug;

use crate::error::RamDataError;

pub const IDS_ARRAY: &str = "ids";
pub const META_FRAME: &str = "meta";

/// Identifier storage: a local `str` array, or the components' arrays
/// seen through the axis mapping.
pub(crate) enum Identifiers {
    Stored(ArrayHandle),
    Combined {
        components: Vec<Identifiers>,
        mapping: Arc<Mapping>,
    },
}

impl Identifiers {
    fn len(&self) -> u64 {
        match self {
            Self::Stored(array) => array.shape().first().copied().unwrap_or(0),
            Self::Combined { mapping, .. } => mapping.combined_len(),
        }
    }

    fn get(&self, indices: &[u64]) -> Result<Vec<Option<String>>, RamDataError> {
        let len = self.len();
        let mut out = vec![None; indices.len()];
        match self {
            Self::Stored(array) => {
                let valid: Vec<u64> = indices.iter().copied().filter(|i| *i < len).collect();
                if valid.is_empty() {
                    return Ok(out);
                }
                let ArrayData::Str(values) = array.read(&Selection::rows(DimSelection::Indices(valid)))?.data else {
                    return Err(RamDataError::new(
                        ErrorCode::TypeConflict,
                        format!("identifiers at `{}` are not strings", array.path()),
                    ));
                };
                let mut values = values.into_iter();
                for (slot, i) in out.iter_mut().zip(indices) {
                    if *i < len {
                        *slot = values.next().flatten();
                    }
                }
            }
            Self::Combined { components, mapping } => {
                let mut wanted: Vec<Vec<(usize, u64)>> = vec![Vec::new(); components.len()];
                for (pos, i) in indices.iter().enumerate() {
                    if let Some((c, local)) = mapping.primary_component(*i) {
                        wanted[c].push((pos, local));
                    }
                }
                for (component, wanted) in components.iter().zip(wanted) {
                    if wanted.is_empty() {
                        continue;
                    }
                    let locals: Vec<u64> = wanted.iter().map(|(_, local)| *local).collect();
                    for ((pos, _), id) in wanted.into_iter().zip(component.get(&locals)?) {
                        out[pos] = id;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Barcodes or features of a dataset.
///
/// Coordinates passed to [`get_str`](Self::get_str) and returned by
/// [`get_int_indices`](Self::get_int_indices) are unfiltered; the filter
/// only decides which entries matrices and the metadata table expose.
pub struct RamDataAxis {
    axis: Axis,
    path: String,
    ids: Identifiers,
    meta: ZarrDataFrame,
    filter: Option<Filter>,
    lookup: Option<HashMap<String, u64>>,
}

impl std::fmt::Debug for RamDataAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamDataAxis")
            .field("axis", &self.axis)
            .field("path", &self.path)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl RamDataAxis {
    fn assemble(axis: Axis, path: String, ids: Identifiers, meta: ZarrDataFrame) -> Self {
        Self {
            axis,
            path,
            ids,
            meta,
            filter: None,
            lookup: None,
        }
    }

    pub(crate) fn create(
        storage: &Storage,
        root: &str,
        axis: Axis,
        ids: &[String],
        options: &FrameOptions,
    ) -> Result<Self, RamDataError> {
        let path = join_key(root, axis.as_str());
        let n = ids.len() as u64;
        let rows = DType::Str.chunk_rows_for_budget(options.chunk_byte_budget, 1).min(n.max(1));
        let array = storage.create_array(&join_key(&path, IDS_ARRAY), ArrayMeta::new(vec![n], vec![rows], DType::Str))?;
        if n > 0 {
            array.write(&Selection::all(), &ArrayData::Str(ids.iter().cloned().map(Some).collect()))?;
        }
        let meta = ZarrDataFrame::create(storage, &join_key(&path, META_FRAME), n, options.clone())?;
        debug!(path = %path, len = n, "axis created");
        Ok(Self::assemble(axis, path, Identifiers::Stored(array), meta))
    }

    pub(crate) fn open(storage: &Storage, root: &str, axis: Axis, options: &FrameOptions) -> Result<Self, RamDataError> {
        let path = join_key(root, axis.as_str());
        let array = storage.open_array(&join_key(&path, IDS_ARRAY))?;
        let meta = ZarrDataFrame::open(storage, &join_key(&path, META_FRAME), options.clone())?;
        Ok(Self::assemble(axis, path, Identifiers::Stored(array), meta))
    }

    pub(crate) fn combined(
        storage: &Storage,
        root: &str,
        axis: Axis,
        components: Vec<Self>,
        mapping: Arc<Mapping>,
        options: &FrameOptions,
    ) -> Result<Self, RamDataError> {
        let path = join_key(root, axis.as_str());
        let (ids, metas): (Vec<_>, Vec<_>) = components.into_iter().map(|a| (a.ids, a.meta)).unzip();
        let meta = ZarrDataFrame::combined(storage, &join_key(&path, META_FRAME), metas, mapping.clone(), options.clone())?;
        Ok(Self::assemble(axis, path, Identifiers::Combined { components: ids, mapping }, meta))
    }

    pub(crate) fn open_combined(
        storage: &Storage,
        root: &str,
        axis: Axis,
        components: Vec<Self>,
        options: &FrameOptions,
    ) -> Result<Self, RamDataError> {
        let path = join_key(root, axis.as_str());
        let (ids, metas): (Vec<_>, Vec<_>) = components.into_iter().map(|a| (a.ids, a.meta)).unzip();
        let meta = ZarrDataFrame::open_combined(storage, &join_key(&path, META_FRAME), metas, options.clone())?;
        let mapping = meta
            .mapping()
            .cloned()
            .ok_or_else(|| RamDataError::new(ErrorCode::Internal, format!("`{path}` lost its mapping")))?;
        Ok(Self::assemble(axis, path, Identifiers::Combined { components: ids, mapping }, meta))
    }

    #[must_use]
    pub const fn axis(&self) -> Axis {
        self.axis
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Unfiltered length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries passing the filter.
    #[must_use]
    pub fn n_visible(&self) -> u64 {
        self.filter.as_ref().map_or_else(|| self.len(), Filter::count)
    }

    #[must_use]
    pub fn is_combined(&self) -> bool {
        matches!(self.ids, Identifiers::Combined { .. })
    }

    /// Mapping shared with the metadata table and combined matrices.
    #[must_use]
    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        match &self.ids {
            Identifiers::Combined { mapping, .. } => Some(mapping),
            Identifiers::Stored(_) => None,
        }
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Sets or clears the filter of the axis and its metadata table.
    pub fn set_filter(&mut self, filter: Option<Filter>) -> Result<(), RamDataError> {
        if let Some(f) = &filter {
            if f.len() != self.len() {
                return Err(RamDataError::validation(format!(
                    "filter of length {} for {} of length {}",
                    f.len(),
                    self.axis,
                    self.len()
                )));
            }
        }
        self.meta.set_filter(filter.clone())?;
        self.filter = filter;
        Ok(())
    }

    /// Unfiltered indices of the visible entries.
    #[must_use]
    pub fn visible_indices(&self) -> Vec<u64> {
        match &self.filter {
            Some(f) => f.indices(),
            None => (0..self.len()).collect(),
        }
    }

    #[must_use]
    pub fn meta(&self) -> &ZarrDataFrame {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut ZarrDataFrame {
        &mut self.meta
    }

    /// Identifiers at `indices`; `None` outside the axis.
    pub fn get_str(&self, indices: &[u64]) -> Result<Vec<Option<String>>, RamDataError> {
        self.ids.get(indices)
    }

    /// Positions of `ids`; `None` for unknown identifiers. Repeated
    /// identifiers resolve to their first position.
    pub fn get_int_indices<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<Vec<Option<u64>>, RamDataError> {
        if self.lookup.is_none() {
            let all: Vec<u64> = (0..self.len()).collect();
            let mut lookup = HashMap::with_capacity(all.len());
            for (i, id) in self.ids.get(&all)?.into_iter().enumerate() {
                if let Some(id) = id {
                    lookup.entry(id).or_insert(i as u64);
                }
            }
            self.lookup = Some(lookup);
        }
        let lookup = self.lookup.as_ref();
        Ok(ids
            .iter()
            .map(|id| lookup.and_then(|l| l.get(id.as_ref()).copied()))
            .collect())
    }

    /// Every identifier in axis order; components of interleaved
    /// datasets are matched on these.
    pub(crate) fn all_ids(&self) -> Result<Vec<String>, RamDataError> {
        let all: Vec<u64> = (0..self.len()).collect();
        self.ids
            .get(&all)?
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                id.ok_or_else(|| RamDataError::validation(format!("{} {i} of `{}` has no identifier", self.axis, self.path)))
            })
            .collect()
    }

    pub fn terminate(&self) {
        self.meta.terminate();
    }
}
