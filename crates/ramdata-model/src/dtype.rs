// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use crate::data::DataKind;

/// On-disk element type. Names follow the numpy type strings used in
/// zarr v2 array metadata; strings are stored as JSON-encoded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Str,
}

impl DType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::Int8 => "|i1",
            Self::Int16 => "<i2",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
            Self::Str => "|O",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "|b1" | "bool" => Some(Self::Bool),
            "|i1" | "int8" => Some(Self::Int8),
            "<i2" | "int16" => Some(Self::Int16),
            "<i4" | "int32" => Some(Self::Int32),
            "<i8" | "int64" => Some(Self::Int64),
            "<f4" | "float32" => Some(Self::Float32),
            "<f8" | "float64" => Some(Self::Float64),
            "|O" | "str" => Some(Self::Str),
            _ => None,
        }
    }

    /// Bytes per element, `None` for variable-length strings.
    #[must_use]
    pub const fn item_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Str => None,
        }
    }

    /// Size used when sizing chunks. Strings are budgeted as 64 bytes.
    #[must_use]
    pub const fn budget_bits(self) -> u64 {
        match self.item_size() {
            Some(n) => n as u64 * 8,
            None => 512,
        }
    }

    #[must_use]
    pub const fn kind(self) -> DataKind {
        match self {
            Self::Bool => DataKind::Bool,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => DataKind::Int,
            Self::Float32 | Self::Float64 => DataKind::Float,
            Self::Str => DataKind::Str,
        }
    }

    /// Widest on-disk type for an in-memory kind.
    #[must_use]
    pub const fn for_kind(kind: DataKind) -> Self {
        match kind {
            DataKind::Bool => Self::Bool,
            DataKind::Int => Self::Int64,
            DataKind::Float => Self::Float64,
            DataKind::Str => Self::Str,
        }
    }

    /// Inclusive range representable by an integer dtype.
    #[must_use]
    pub const fn int_bounds(self) -> Option<(i64, i64)> {
        match self {
            Self::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Default fill value used when no explicit one is given.
    #[must_use]
    pub fn default_fill(self) -> serde_json::Value {
        match self {
            Self::Bool => serde_json::Value::Bool(false),
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => serde_json::Value::from(0),
            Self::Float32 | Self::Float64 => serde_json::Value::String("NaN".to_string()),
            Self::Str => serde_json::Value::Null,
        }
    }

    /// Rows per chunk so that `rows * bits` stays near `byte_budget`.
    #[must_use]
    pub fn chunk_rows_for_budget(self, byte_budget: u64, secondary_len: u64) -> u64 {
        let per_row_bits = self.budget_bits().saturating_mul(secondary_len.max(1));
        (byte_budget.saturating_mul(8) / per_row_bits.max(1)).max(1)
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown dtype `{value}`"))
    }
}

impl From<DType> for String {
    fn from(value: DType) -> Self {
        value.as_str().to_string()
    }
}
