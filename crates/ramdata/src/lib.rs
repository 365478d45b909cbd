// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Datasets of count matrices.
//!
//! A [`RamData`] binds two axes, barcodes and features, each with string
//! identifiers, a metadata [`ZarrDataFrame`](ramdata_frame::ZarrDataFrame)
//! and a filter, to named layers of [`Ramtx`](ramdata_mtx::Ramtx)
//! matrices. Datasets combine into larger ones without copying data;
//! [`RamData::apply`] writes row-wise transforms of a layer in the
//! storage modes a downstream reader needs.

mod apply;
mod axis;
mod dataset;
mod error;
mod layer;

pub use apply::{ApplyOptions, ApplyReport, Row, DEFAULT_CHUNK_LEN, DEFAULT_DENSE_CHUNKS, DEFAULT_TARGET_WEIGHT};
pub use axis::{RamDataAxis, IDS_ARRAY, META_FRAME};
pub use dataset::{Combine, RamData, RamDataAttrs, LAYERS_DIR};
pub use error::RamDataError;
pub use layer::RamDataLayer;

pub const CRATE_NAME: &str = "ramdata";
