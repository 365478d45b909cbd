// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::axis::Axis;
use crate::dtype::DType;

/// Table-level attributes record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableAttrs {
    pub version: String,
    /// Column name to description.
    pub columns: BTreeMap<String, Option<String>>,
    pub int_num_rows: u64,
    pub int_num_rows_in_a_chunk: u64,
    pub flag_store_string_as_categorical: bool,
    #[serde(default)]
    pub is_combined: bool,
    #[serde(default)]
    pub is_interleaved: bool,
}

impl TableAttrs {
    #[must_use]
    pub fn new(int_num_rows: u64, int_num_rows_in_a_chunk: u64) -> Self {
        Self {
            version: ramdata_core::FORMAT_VERSION.to_string(),
            columns: BTreeMap::new(),
            int_num_rows,
            int_num_rows_in_a_chunk: int_num_rows_in_a_chunk.max(1),
            flag_store_string_as_categorical: true,
            is_combined: false,
            is_interleaved: false,
        }
    }
}

/// Per-column attributes record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnAttrs {
    pub dtype: DType,
    pub fill_value: serde_json::Value,
    pub flag_categorical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l_value_unique: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_contains_nan: Option<bool>,
    #[serde(default)]
    pub flag_filtered: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Set once a lazily loaded column holds every row locally.
    #[serde(default)]
    pub flag_materialized: bool,
}

impl ColumnAttrs {
    #[must_use]
    pub fn plain(dtype: DType) -> Self {
        Self {
            dtype,
            fill_value: dtype.default_fill(),
            flag_categorical: false,
            l_value_unique: None,
            flag_contains_nan: None,
            flag_filtered: false,
            description: None,
            flag_materialized: false,
        }
    }

    #[must_use]
    pub fn categorical(categories: Vec<String>) -> Self {
        let dtype = crate::categorical::categorical_code_dtype(categories.len());
        Self {
            dtype,
            fill_value: serde_json::Value::from(-1),
            flag_categorical: true,
            l_value_unique: Some(categories),
            flag_contains_nan: None,
            flag_filtered: false,
            description: None,
            flag_materialized: false,
        }
    }

    #[must_use]
    pub fn categories(&self) -> &[String] {
        self.l_value_unique.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RamtxMode {
    Dense,
    SparseForQueryingBarcodes,
    SparseForQueryingFeatures,
}

pub const RAMTX_MODES: &[RamtxMode] = &[
    RamtxMode::Dense,
    RamtxMode::SparseForQueryingBarcodes,
    RamtxMode::SparseForQueryingFeatures,
];

impl RamtxMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::SparseForQueryingBarcodes => "sparse_for_querying_barcodes",
            Self::SparseForQueryingFeatures => "sparse_for_querying_features",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        RAMTX_MODES.iter().copied().find(|m| m.as_str() == value)
    }

    #[must_use]
    pub const fn sparse_for(axis: Axis) -> Self {
        match axis {
            Axis::Barcodes => Self::SparseForQueryingBarcodes,
            Axis::Features => Self::SparseForQueryingFeatures,
        }
    }

    /// Axis a sparse matrix is sorted by; `None` for dense.
    #[must_use]
    pub const fn sorted_by(self) -> Option<Axis> {
        match self {
            Self::Dense => None,
            Self::SparseForQueryingBarcodes => Some(Axis::Barcodes),
            Self::SparseForQueryingFeatures => Some(Axis::Features),
        }
    }
}

/// Matrix attributes record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RamtxAttrs {
    pub version: String,
    pub mode: RamtxMode,
    pub num_barcodes: u64,
    pub num_features: u64,
    pub num_records: u64,
    pub dtype: DType,
    pub chunk_len: u64,
    #[serde(default)]
    pub completed: bool,
}

impl RamtxAttrs {
    #[must_use]
    pub fn new(mode: RamtxMode, num_barcodes: u64, num_features: u64, dtype: DType, chunk_len: u64) -> Self {
        Self {
            version: ramdata_core::FORMAT_VERSION.to_string(),
            mode,
            num_barcodes,
            num_features,
            num_records: 0,
            dtype,
            chunk_len: chunk_len.max(1),
            completed: false,
        }
    }

    #[must_use]
    pub const fn axis_len(&self, axis: Axis) -> u64 {
        match axis {
            Axis::Barcodes => self.num_barcodes,
            Axis::Features => self.num_features,
        }
    }
}

/// Metadata stored next to a persisted interleaved mapping.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InterleavedMappingMeta {
    /// Record count of each component.
    pub l_int_num_records: Vec<u64>,
    pub int_num_records: u64,
}

#[cfg(test)]
mod tests {
    use super::{ColumnAttrs, RamtxMode, TableAttrs};
    use crate::dtype::DType;

    #[test]
    fn column_attrs_omit_absent_categories() {
        let json = serde_json::to_value(ColumnAttrs::plain(DType::Float64)).expect("json");
        assert!(json.get("l_value_unique").is_none());
        assert_eq!(json["dtype"], "<f8");
        assert_eq!(json["fill_value"], "NaN");
    }

    #[test]
    fn table_attrs_default_to_standalone() {
        let raw = r#"{"version":"1","columns":{"a":null},"int_num_rows":4,
            "int_num_rows_in_a_chunk":2,"flag_store_string_as_categorical":true}"#;
        let attrs: TableAttrs = serde_json::from_str(raw).expect("parse");
        assert!(!attrs.is_combined);
        assert_eq!(attrs.columns.get("a"), Some(&None));
    }

    #[test]
    fn ramtx_modes_parse_back() {
        for mode in super::RAMTX_MODES {
            assert_eq!(RamtxMode::parse(mode.as_str()), Some(*mode));
        }
    }
}
