// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ramdata_core::{ErrorCode, FORMAT_VERSION};
use ramdata_frame::FrameOptions;
use ramdata_model::{escape_name, Axis, DType, Mapping, RamtxMode};
use ramdata_mtx::{DenseWriter, Ramtx, SparseWriter};
use ramdata_store::paths::{attrs_lock_resource, join_key};
use ramdata_store::{SpinLockCoordinator, Storage};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::axis::RamDataAxis;
use crate::error::RamDataError;
use crate::layer::{CombinedLayer, RamDataLayer};

pub const LAYERS_DIR: &str = "layers";

/// Attributes record of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamDataAttrs {
    pub version: String,
    pub num_barcodes: u64,
    pub num_features: u64,
    /// Layers with matrices stored under this dataset.
    #[serde(default)]
    pub layers: Vec<String>,
    /// Datasets combined by this one; empty when standalone.
    #[serde(default)]
    pub components: Vec<String>,
}

/// How component axes combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// Entries of each component follow those of the previous one.
    Stacked,
    /// Entries sharing an identifier become one combined entry.
    ByIdentifier,
}

fn read_attrs(storage: &Storage, path: &str) -> Result<Option<RamDataAttrs>, RamDataError> {
    let map = storage.read_attrs(path)?;
    if map.is_empty() {
        return Ok(None);
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map(Some)
        .map_err(|e| RamDataError::validation(format!("dataset attributes at `{path}`: {e}")))
}

fn write_attrs(storage: &Storage, path: &str, attrs: &RamDataAttrs) -> Result<(), RamDataError> {
    match serde_json::to_value(attrs) {
        Ok(serde_json::Value::Object(map)) => Ok(storage.write_attrs(path, &map)?),
        Ok(_) => Err(RamDataError::new(ErrorCode::Internal, "dataset attributes are not an object")),
        Err(e) => Err(RamDataError::new(ErrorCode::Internal, e.to_string())),
    }
}

fn layer_path(root: &str, name: &str) -> Result<String, RamDataError> {
    Ok(join_key(&join_key(root, LAYERS_DIR), &escape_name(name)?))
}

/// Where the layers of a dataset and of its components live.
struct LayerSource {
    path: String,
    layers: Vec<String>,
    combined: Option<(Vec<LayerSource>, Arc<Mapping>, Arc<Mapping>)>,
}

impl LayerSource {
    fn names(&self, out: &mut Vec<String>) {
        out.extend(self.layers.iter().cloned());
        if let Some((components, _, _)) = &self.combined {
            for component in components {
                component.names(out);
            }
        }
    }

    fn layer(&self, storage: &Storage, name: &str) -> Result<Option<RamDataLayer>, RamDataError> {
        let combined = match &self.combined {
            Some((components, barcodes, features)) => Some(CombinedLayer {
                components: components
                    .iter()
                    .map(|c| c.layer(storage, name))
                    .collect::<Result<Vec<_>, _>>()?,
                barcodes: barcodes.clone(),
                features: features.clone(),
            }),
            None => None,
        };
        let own = self.layers.iter().any(|l| l == name);
        let in_component = combined
            .as_ref()
            .is_some_and(|c| c.components.iter().any(Option::is_some));
        if !own && !in_component {
            return Ok(None);
        }
        Ok(Some(RamDataLayer::new(storage, name, layer_path(&self.path, name)?, combined)))
    }
}

/// A dataset: barcode and feature axes plus named layers of matrices
/// over them.
///
/// Combined datasets compose component datasets along both axes. The
/// mapping of each combined axis is shared by the axis' metadata table
/// and by every combined matrix, so all three agree on coordinates.
pub struct RamData {
    storage: Storage,
    path: String,
    attrs: RamDataAttrs,
    barcodes: RamDataAxis,
    features: RamDataAxis,
    source: LayerSource,
}

impl std::fmt::Debug for RamData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamData")
            .field("path", &self.path)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl RamData {
    /// Creates an empty dataset with the given axis identifiers. Fails
    /// when a dataset already exists at `path`.
    pub fn create(storage: &Storage, path: &str, barcodes: &[String], features: &[String]) -> Result<Self, RamDataError> {
        if read_attrs(storage, path)?.is_some() {
            return Err(RamDataError::validation(format!("a dataset already exists at `{path}`")));
        }
        let options = FrameOptions::from_config(storage.config());
        let barcode_axis = RamDataAxis::create(storage, path, Axis::Barcodes, barcodes, &options)?;
        let feature_axis = RamDataAxis::create(storage, path, Axis::Features, features, &options)?;
        let attrs = RamDataAttrs {
            version: FORMAT_VERSION.to_string(),
            num_barcodes: barcodes.len() as u64,
            num_features: features.len() as u64,
            layers: Vec::new(),
            components: Vec::new(),
        };
        write_attrs(storage, path, &attrs)?;
        info!(path, barcodes = attrs.num_barcodes, features = attrs.num_features, "dataset created");
        Ok(Self {
            storage: storage.clone(),
            path: path.to_string(),
            source: LayerSource {
                path: path.to_string(),
                layers: Vec::new(),
                combined: None,
            },
            attrs,
            barcodes: barcode_axis,
            features: feature_axis,
        })
    }

    /// Opens a standalone or combined dataset; components of a combined
    /// dataset are opened from their recorded paths.
    pub fn open(storage: &Storage, path: &str) -> Result<Self, RamDataError> {
        let attrs = read_attrs(storage, path)?
            .ok_or_else(|| RamDataError::not_initialized(format!("no dataset at `{path}`")))?;
        let options = FrameOptions::from_config(storage.config());
        let data = if attrs.components.is_empty() {
            Self {
                storage: storage.clone(),
                path: path.to_string(),
                barcodes: RamDataAxis::open(storage, path, Axis::Barcodes, &options)?,
                features: RamDataAxis::open(storage, path, Axis::Features, &options)?,
                source: LayerSource {
                    path: path.to_string(),
                    layers: attrs.layers.clone(),
                    combined: None,
                },
                attrs,
            }
        } else {
            let components = attrs
                .components
                .iter()
                .map(|p| Self::open(storage, p))
                .collect::<Result<Vec<_>, _>>()?;
            let (barcodes, features, sources) = split(components);
            let barcodes = RamDataAxis::open_combined(storage, path, Axis::Barcodes, barcodes, &options)?;
            let features = RamDataAxis::open_combined(storage, path, Axis::Features, features, &options)?;
            Self::assemble_combined(storage, path, attrs, barcodes, features, sources)?
        };
        if data.barcodes.len() != data.attrs.num_barcodes || data.features.len() != data.attrs.num_features {
            return Err(RamDataError::validation(format!(
                "`{path}` declares {}x{} but its axes hold {}x{}",
                data.attrs.num_barcodes,
                data.attrs.num_features,
                data.barcodes.len(),
                data.features.len()
            )));
        }
        Ok(data)
    }

    /// Combines `components` into one dataset stored at `path`.
    /// Reopening an existing combination of the same components keeps
    /// the layers already materialized under `path`.
    pub fn combined(
        storage: &Storage,
        path: &str,
        components: Vec<Self>,
        barcodes: Combine,
        features: Combine,
    ) -> Result<Self, RamDataError> {
        if components.is_empty() {
            return Err(RamDataError::validation("a combined dataset needs at least one component"));
        }
        let paths: Vec<String> = components.iter().map(|c| c.path.clone()).collect();
        let existing = read_attrs(storage, path)?;
        if existing.as_ref().is_some_and(|a| a.components != paths) {
            return Err(RamDataError::validation(format!(
                "`{path}` already holds a dataset over other components"
            )));
        }
        let barcode_mapping = Arc::new(axis_mapping(&components, Axis::Barcodes, barcodes)?);
        let feature_mapping = Arc::new(axis_mapping(&components, Axis::Features, features)?);
        let options = FrameOptions::from_config(storage.config());
        let (barcode_axes, feature_axes, sources) = split(components);
        let barcode_axis =
            RamDataAxis::combined(storage, path, Axis::Barcodes, barcode_axes, barcode_mapping, &options)?;
        let feature_axis =
            RamDataAxis::combined(storage, path, Axis::Features, feature_axes, feature_mapping, &options)?;
        let attrs = RamDataAttrs {
            version: FORMAT_VERSION.to_string(),
            num_barcodes: barcode_axis.len(),
            num_features: feature_axis.len(),
            layers: existing.map(|a| a.layers).unwrap_or_default(),
            components: paths,
        };
        write_attrs(storage, path, &attrs)?;
        info!(
            path,
            components = attrs.components.len(),
            barcodes = attrs.num_barcodes,
            features = attrs.num_features,
            "combined dataset"
        );
        Self::assemble_combined(storage, path, attrs, barcode_axis, feature_axis, sources)
    }

    fn assemble_combined(
        storage: &Storage,
        path: &str,
        attrs: RamDataAttrs,
        barcodes: RamDataAxis,
        features: RamDataAxis,
        sources: Vec<LayerSource>,
    ) -> Result<Self, RamDataError> {
        let (Some(barcode_mapping), Some(feature_mapping)) = (barcodes.mapping(), features.mapping()) else {
            return Err(RamDataError::new(ErrorCode::Internal, format!("`{path}` has an uncombined axis")));
        };
        let source = LayerSource {
            path: path.to_string(),
            layers: attrs.layers.clone(),
            combined: Some((sources, barcode_mapping.clone(), feature_mapping.clone())),
        };
        Ok(Self {
            storage: storage.clone(),
            path: path.to_string(),
            attrs,
            barcodes,
            features,
            source,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn attrs(&self) -> &RamDataAttrs {
        &self.attrs
    }

    #[must_use]
    pub fn is_combined(&self) -> bool {
        !self.attrs.components.is_empty()
    }

    /// Unfiltered `(barcodes, features)`.
    #[must_use]
    pub fn shape(&self) -> (u64, u64) {
        (self.attrs.num_barcodes, self.attrs.num_features)
    }

    #[must_use]
    pub fn barcodes(&self) -> &RamDataAxis {
        &self.barcodes
    }

    pub fn barcodes_mut(&mut self) -> &mut RamDataAxis {
        &mut self.barcodes
    }

    #[must_use]
    pub fn features(&self) -> &RamDataAxis {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut RamDataAxis {
        &mut self.features
    }

    #[must_use]
    pub fn axis(&self, axis: Axis) -> &RamDataAxis {
        match axis {
            Axis::Barcodes => &self.barcodes,
            Axis::Features => &self.features,
        }
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut RamDataAxis {
        match axis {
            Axis::Barcodes => &mut self.barcodes,
            Axis::Features => &mut self.features,
        }
    }

    /// Names of every layer, including those only components hold.
    #[must_use]
    pub fn layers(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.source.names(&mut names);
        names.sort();
        names.dedup();
        names
    }

    /// Layer `name` with the current axis filters.
    pub fn layer(&self, name: &str) -> Result<RamDataLayer, RamDataError> {
        let layer = self
            .source
            .layer(&self.storage, name)?
            .ok_or_else(|| RamDataError::not_initialized(format!("no layer `{name}` in `{}`", self.path)))?;
        Ok(layer.with_filters(self.barcodes.filter().cloned(), self.features.filter().cloned()))
    }

    /// Shorthand for `layer(name)?.get_ramtx(query_axis, prefer_dense)`.
    pub fn get_ramtx(&self, name: &str, query_axis: Axis, prefer_dense: bool) -> Result<Ramtx, RamDataError> {
        self.layer(name)?.get_ramtx(query_axis, prefer_dense)
    }

    /// Path of the matrix of layer `name` stored in `mode` under this
    /// dataset.
    pub fn layer_mode_path(&self, name: &str, mode: RamtxMode) -> Result<String, RamDataError> {
        Ok(join_key(&layer_path(&self.path, name)?, mode.as_str()))
    }

    /// Starts a sparse matrix for layer `name` sorted by `sorted_by`,
    /// replacing one already stored in that mode.
    pub fn sparse_writer(
        &mut self,
        name: &str,
        sorted_by: Axis,
        dtype: DType,
        chunk_len: u64,
    ) -> Result<SparseWriter, RamDataError> {
        let path = self.layer_mode_path(name, RamtxMode::sparse_for(sorted_by))?;
        self.register_layer(name)?;
        let (num_barcodes, num_features) = self.shape();
        Ok(SparseWriter::create(&self.storage, &path, sorted_by, num_barcodes, num_features, dtype, chunk_len)?)
    }

    /// Starts a dense matrix for layer `name`.
    pub fn dense_writer(&mut self, name: &str, dtype: DType, chunks: (u64, u64)) -> Result<DenseWriter, RamDataError> {
        let path = self.layer_mode_path(name, RamtxMode::Dense)?;
        self.register_layer(name)?;
        let (num_barcodes, num_features) = self.shape();
        Ok(DenseWriter::create(&self.storage, &path, num_barcodes, num_features, dtype, chunks)?)
    }

    /// Adds `name` to the stored layer list under the attributes lock.
    pub(crate) fn register_layer(&mut self, name: &str) -> Result<(), RamDataError> {
        escape_name(name)?;
        if self.attrs.layers.iter().any(|l| l == name) {
            return Ok(());
        }
        let coordinator = SpinLockCoordinator::for_storage(&self.storage);
        let _guard = coordinator.acquire(&attrs_lock_resource(&self.path), false)?;
        let mut attrs = read_attrs(&self.storage, &self.path)?
            .ok_or_else(|| RamDataError::not_initialized(format!("no dataset at `{}`", self.path)))?;
        if !attrs.layers.iter().any(|l| l == name) {
            attrs.layers.push(name.to_string());
            write_attrs(&self.storage, &self.path, &attrs)?;
        }
        self.source.layers.clone_from(&attrs.layers);
        self.attrs = attrs;
        Ok(())
    }

    pub fn terminate(&self) {
        self.barcodes.terminate();
        self.features.terminate();
        self.storage.terminate();
    }
}

fn axis_mapping(components: &[RamData], axis: Axis, how: Combine) -> Result<Mapping, RamDataError> {
    match how {
        Combine::Stacked => {
            let lens: Vec<u64> = components.iter().map(|c| c.axis(axis).len()).collect();
            Ok(Mapping::stacked(&lens))
        }
        Combine::ByIdentifier => {
            let keys = components
                .iter()
                .map(|c| c.axis(axis).all_ids())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Mapping::interleaved_from_keys(&keys)?.0)
        }
    }
}

fn split(components: Vec<RamData>) -> (Vec<RamDataAxis>, Vec<RamDataAxis>, Vec<LayerSource>) {
    let mut barcodes = Vec::with_capacity(components.len());
    let mut features = Vec::with_capacity(components.len());
    let mut sources = Vec::with_capacity(components.len());
    for component in components {
        barcodes.push(component.barcodes);
        features.push(component.features);
        sources.push(component.source);
    }
    (barcodes, features, sources)
}
