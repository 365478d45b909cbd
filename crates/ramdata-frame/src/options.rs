// SPDX-License-Identifier: Apache-2.0

use ramdata_core::{EngineConfig, Value};
use ramdata_model::{ArrayData, ColumnValues, DType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOptions {
    /// Guard column writes and attribute edits with storage locks.
    pub flag_use_lock: bool,
    /// Return categorical codes instead of decoded strings.
    pub integers_as_categories: bool,
    /// Persist rows read from a mask source or from components.
    pub lazy_load: bool,
    pub chunk_byte_budget: u64,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            flag_use_lock: false,
            integers_as_categories: false,
            lazy_load: false,
            chunk_byte_budget: EngineConfig::default().chunk_byte_budget,
        }
    }
}

impl FrameOptions {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            chunk_byte_budget: config.chunk_byte_budget,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_lock(mut self, enabled: bool) -> Self {
        self.flag_use_lock = enabled;
        self
    }

    #[must_use]
    pub fn with_integers_as_categories(mut self, enabled: bool) -> Self {
        self.integers_as_categories = enabled;
        self
    }

    #[must_use]
    pub fn with_lazy_load(mut self, enabled: bool) -> Self {
        self.lazy_load = enabled;
        self
    }

    #[must_use]
    pub fn with_chunk_byte_budget(mut self, bytes: u64) -> Self {
        self.chunk_byte_budget = bytes.max(1);
        self
    }
}

/// Declares a new column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub dtype: DType,
    pub categorical: bool,
    pub categories: Vec<String>,
    /// Shape beyond the row axis; empty for plain vectors.
    pub secondary_shape: Vec<u64>,
    pub fill_value: Option<serde_json::Value>,
    pub description: Option<String>,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        Self {
            dtype,
            categorical: false,
            categories: Vec::new(),
            secondary_shape: Vec::new(),
            fill_value: None,
            description: None,
        }
    }

    #[must_use]
    pub fn categorical(categories: Vec<String>) -> Self {
        Self {
            dtype: ramdata_model::categorical_code_dtype(categories.len()),
            categorical: true,
            categories,
            ..Self::new(DType::Int8)
        }
    }

    #[must_use]
    pub fn with_secondary_shape(mut self, shape: Vec<u64>) -> Self {
        self.secondary_shape = shape;
        self
    }

    #[must_use]
    pub fn with_fill(mut self, fill: serde_json::Value) -> Self {
        self.fill_value = Some(fill);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Column type for freshly written values.
    pub(crate) fn infer(values: &ColumnValues, strings_as_categorical: bool) -> Self {
        let secondary: Vec<u64> = values.shape.iter().skip(1).map(|d| *d as u64).collect();
        let spec = match &values.data {
            ArrayData::Bool(_) => Self::new(DType::Bool),
            ArrayData::Int(_) => Self::new(DType::Int64),
            ArrayData::Float(_) => Self::new(DType::Float64),
            ArrayData::Str(_) if strings_as_categorical => Self::categorical(Vec::new()),
            ArrayData::Str(_) => Self::new(DType::Str),
        };
        spec.with_secondary_shape(secondary)
    }
}

/// Values handed to a column write.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameInput {
    /// Broadcast to every selected row.
    Scalar(Value),
    Values(ColumnValues),
}

impl From<Value> for FrameInput {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<ColumnValues> for FrameInput {
    fn from(value: ColumnValues) -> Self {
        Self::Values(value)
    }
}

impl From<ArrayData> for FrameInput {
    fn from(value: ArrayData) -> Self {
        Self::Values(ColumnValues::vector(value))
    }
}

impl From<Vec<Option<String>>> for FrameInput {
    fn from(value: Vec<Option<String>>) -> Self {
        Self::Values(ColumnValues::vector(ArrayData::Str(value)))
    }
}

impl From<Vec<f64>> for FrameInput {
    fn from(value: Vec<f64>) -> Self {
        Self::Values(ColumnValues::vector(ArrayData::Float(value)))
    }
}

impl From<Vec<i64>> for FrameInput {
    fn from(value: Vec<i64>) -> Self {
        Self::Values(ColumnValues::vector(ArrayData::Int(value)))
    }
}
