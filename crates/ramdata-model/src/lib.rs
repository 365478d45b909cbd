// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Data model shared by the ramdata storage engines.
//!
//! Nothing in this crate touches storage. Types here describe what is
//! persisted (attributes records, dtypes, escaped names) and how
//! coordinates move between combined and component spaces.

mod attrs;
mod axis;
mod categorical;
mod data;
mod dtype;
mod error;
mod filter;
mod mapping;
mod naming;
mod selector;

pub use attrs::{
    ColumnAttrs, InterleavedMappingMeta, RamtxAttrs, RamtxMode, TableAttrs, RAMTX_MODES,
};
pub use axis::Axis;
pub use categorical::{categorical_code_dtype, decode_codes, encode_codes, CategoricalEncoding};
pub use data::{ArrayData, ColumnValues, DataKind};
pub use dtype::DType;
pub use error::ModelError;
pub use filter::Filter;
pub use mapping::{ComponentIndex, CoordinateTranslator, Mapping};
pub use naming::{check_name_collision, escape_name, unescape_name, MAX_NAME_COMPONENT_BYTES};
pub use selector::RowSelector;

pub const CRATE_NAME: &str = "ramdata-model";
