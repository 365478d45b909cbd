// SPDX-License-Identifier: Apache-2.0

use ramdata_core::{ErrorCode, Value};

use crate::error::ModelError;

/// In-memory element kind. Integers and floats are always widened to
/// 64 bits here; narrowing happens only when bytes hit storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Bool,
    Int,
    Float,
    Str,
}

impl DataKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        }
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Str)
    }

    /// Whether values of kind `incoming` may be stored in a column of
    /// this kind. Only integer-to-float promotion is implicit.
    #[must_use]
    pub const fn accepts(self, incoming: Self) -> bool {
        matches!(
            (self, incoming),
            (Self::Bool, Self::Bool)
                | (Self::Int, Self::Int)
                | (Self::Float, Self::Float)
                | (Self::Float, Self::Int)
                | (Self::Str, Self::Str)
        )
    }
}

/// A flat, typed buffer. Multi-dimensional data is stored in C order
/// with the shape carried alongside (see [`ColumnValues`]).
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<Option<String>>),
}

impl ArrayData {
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Bool(_) => DataKind::Bool,
            Self::Int(_) => DataKind::Int,
            Self::Float(_) => DataKind::Float,
            Self::Str(_) => DataKind::Str,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn empty(kind: DataKind) -> Self {
        match kind {
            DataKind::Bool => Self::Bool(Vec::new()),
            DataKind::Int => Self::Int(Vec::new()),
            DataKind::Float => Self::Float(Vec::new()),
            DataKind::Str => Self::Str(Vec::new()),
        }
    }

    /// `n` copies of `fill`, coerced to `kind`. A null fill becomes
    /// NaN for floats, `false`/0 for booleans and integers.
    #[must_use]
    pub fn filled(kind: DataKind, fill: &Value, n: usize) -> Self {
        match kind {
            DataKind::Bool => {
                let v = matches!(fill, Value::Bool(true)) || fill.as_f64().is_some_and(|x| x != 0.0);
                Self::Bool(vec![v; n])
            }
            DataKind::Int => {
                let v = match fill {
                    Value::Int(v) => *v,
                    other => other.as_f64().map_or(0, |x| x as i64),
                };
                Self::Int(vec![v; n])
            }
            DataKind::Float => Self::Float(vec![fill.as_f64().unwrap_or(f64::NAN); n]),
            DataKind::Str => Self::Str(vec![fill.as_str().map(ToString::to_string); n]),
        }
    }

    /// Infers the narrowest kind holding every value. Nulls mixed with
    /// numbers become NaN floats; nulls alone or with strings stay
    /// string nulls.
    pub fn from_values(values: &[Value]) -> Result<Self, ModelError> {
        let mut has_bool = false;
        let mut has_int = false;
        let mut has_float = false;
        let mut has_str = false;
        let mut has_null = false;
        for v in values {
            match v {
                Value::Null => has_null = true,
                Value::Bool(_) => has_bool = true,
                Value::Int(_) => has_int = true,
                Value::Float(_) => has_float = true,
                Value::Str(_) => has_str = true,
            }
        }
        let numeric = has_bool || has_int || has_float;
        if has_str && numeric {
            return Err(ModelError::new(
                ErrorCode::TypeConflict,
                "cannot mix string and numeric values in one write",
            ));
        }
        if has_str || (has_null && !numeric) {
            return Ok(Self::Str(
                values
                    .iter()
                    .map(|v| v.as_str().map(ToString::to_string))
                    .collect(),
            ));
        }
        if has_bool && (has_int || has_float) {
            return Err(ModelError::new(
                ErrorCode::TypeConflict,
                "cannot mix boolean and numeric values in one write",
            ));
        }
        if has_float || has_null {
            return Ok(Self::Float(
                values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect(),
            ));
        }
        if has_int {
            return Ok(Self::Int(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(x) => *x,
                        _ => 0,
                    })
                    .collect(),
            ));
        }
        Ok(Self::Bool(
            values.iter().map(|v| matches!(v, Value::Bool(true))).collect(),
        ))
    }

    /// Broadcasts a scalar to `n` elements.
    pub fn broadcast(value: &Value, n: usize) -> Result<Self, ModelError> {
        Self::from_values(std::slice::from_ref(value)).map(|one| one.repeat(n))
    }

    fn repeat(&self, n: usize) -> Self {
        let idx = vec![0usize; n];
        if self.is_empty() {
            return self.clone();
        }
        self.take(&idx)
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Value {
        match self {
            Self::Bool(v) => v.get(i).map_or(Value::Null, |x| Value::Bool(*x)),
            Self::Int(v) => v.get(i).map_or(Value::Null, |x| Value::Int(*x)),
            Self::Float(v) => v.get(i).map_or(Value::Null, |x| Value::Float(*x)),
            Self::Str(v) => v
                .get(i)
                .and_then(Clone::clone)
                .map_or(Value::Null, Value::Str),
        }
    }

    #[must_use]
    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Gathers the elements at `indices`, in that order.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Bool(v) => Self::Bool(indices.iter().map(|&i| v[i]).collect()),
            Self::Int(v) => Self::Int(indices.iter().map(|&i| v[i]).collect()),
            Self::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            Self::Str(v) => Self::Str(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        match self {
            Self::Bool(v) => Self::Bool(v[start..end].to_vec()),
            Self::Int(v) => Self::Int(v[start..end].to_vec()),
            Self::Float(v) => Self::Float(v[start..end].to_vec()),
            Self::Str(v) => Self::Str(v[start..end].to_vec()),
        }
    }

    /// Copies element `src_idx` of `src` into position `dst`. `src`
    /// must already have this buffer's kind.
    pub fn copy_from(&mut self, dst: usize, src: &Self, src_idx: usize) -> Result<(), ModelError> {
        match (self, src) {
            (Self::Bool(d), Self::Bool(s)) => d[dst] = s[src_idx],
            (Self::Int(d), Self::Int(s)) => d[dst] = s[src_idx],
            (Self::Float(d), Self::Float(s)) => d[dst] = s[src_idx],
            (Self::Str(d), Self::Str(s)) => d[dst] = s[src_idx].clone(),
            (d, s) => {
                return Err(ModelError::new(
                    ErrorCode::TypeConflict,
                    format!("cannot copy {} element into {} buffer", s.kind().as_str(), d.kind().as_str()),
                ))
            }
        }
        Ok(())
    }

    pub fn extend(&mut self, other: &Self) -> Result<(), ModelError> {
        match (self, other) {
            (Self::Bool(d), Self::Bool(s)) => d.extend_from_slice(s),
            (Self::Int(d), Self::Int(s)) => d.extend_from_slice(s),
            (Self::Float(d), Self::Float(s)) => d.extend_from_slice(s),
            (Self::Str(d), Self::Str(s)) => d.extend_from_slice(s),
            (d, s) => {
                return Err(ModelError::new(
                    ErrorCode::TypeConflict,
                    format!("cannot append {} values to {} buffer", s.kind().as_str(), d.kind().as_str()),
                ))
            }
        }
        Ok(())
    }

    /// Converts to `kind`. Booleans widen to numbers and integers widen
    /// to floats; every other conversion is a type conflict.
    pub fn cast(self, kind: DataKind) -> Result<Self, ModelError> {
        if self.kind() == kind {
            return Ok(self);
        }
        match (self, kind) {
            (Self::Int(v), DataKind::Float) => Ok(Self::Float(v.into_iter().map(|x| x as f64).collect())),
            (Self::Bool(v), DataKind::Int) => Ok(Self::Int(v.into_iter().map(i64::from).collect())),
            (Self::Bool(v), DataKind::Float) => Ok(Self::Float(
                v.into_iter().map(|x| if x { 1.0 } else { 0.0 }).collect(),
            )),
            (data, kind) => Err(ModelError::new(
                ErrorCode::TypeConflict,
                format!("cannot convert {} values to {}", data.kind().as_str(), kind.as_str()),
            )),
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str_slice(&self) -> Option<&[Option<String>]> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view widened to `f64`; `None` for strings.
    #[must_use]
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Bool(v) => Some(v.iter().map(|x| if *x { 1.0 } else { 0.0 }).collect()),
            Self::Int(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Self::Float(v) => Some(v.clone()),
            Self::Str(_) => None,
        }
    }

    #[must_use]
    pub fn contains_nan(&self) -> bool {
        match self {
            Self::Float(v) => v.iter().any(|x| x.is_nan()),
            _ => false,
        }
    }
}

impl From<Vec<bool>> for ArrayData {
    fn from(value: Vec<bool>) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<i64>> for ArrayData {
    fn from(value: Vec<i64>) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<f64>> for ArrayData {
    fn from(value: Vec<f64>) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<String>> for ArrayData {
    fn from(value: Vec<String>) -> Self {
        Self::Str(value.into_iter().map(Some).collect())
    }
}

impl From<Vec<&str>> for ArrayData {
    fn from(value: Vec<&str>) -> Self {
        Self::Str(value.into_iter().map(|s| Some(s.to_string())).collect())
    }
}

impl From<Vec<Option<&str>>> for ArrayData {
    fn from(value: Vec<Option<&str>>) -> Self {
        Self::Str(value.into_iter().map(|s| s.map(ToString::to_string)).collect())
    }
}

/// Values read from or written to a column together with their shape.
/// `shape[0]` is the number of rows; further entries describe the
/// secondary dimensions of multi-dimensional columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValues {
    pub data: ArrayData,
    pub shape: Vec<usize>,
}

impl ColumnValues {
    #[must_use]
    pub fn vector(data: ArrayData) -> Self {
        let n = data.len();
        Self {
            data,
            shape: vec![n],
        }
    }

    pub fn with_shape(data: ArrayData, shape: Vec<usize>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::validation(format!(
                "shape {shape:?} holds {expected} values but {} were given",
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of values per row.
    #[must_use]
    pub fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }
}

#[cfg(test)]
mod tests {
    use super::{ArrayData, DataKind};
    use ramdata_core::{ErrorCode, Value};

    #[test]
    fn inference_picks_the_narrowest_kind() {
        let ints = ArrayData::from_values(&[Value::Int(1), Value::Int(2)]).expect("ints");
        assert_eq!(ints, ArrayData::Int(vec![1, 2]));

        let mixed = ArrayData::from_values(&[Value::Int(1), Value::Float(2.5)]).expect("floats");
        assert_eq!(mixed, ArrayData::Float(vec![1.0, 2.5]));

        let strings =
            ArrayData::from_values(&[Value::from("a"), Value::Null]).expect("strings");
        assert_eq!(strings, ArrayData::Str(vec![Some("a".to_string()), None]));

        let err = ArrayData::from_values(&[Value::from("a"), Value::Int(1)]).expect_err("mixed");
        assert_eq!(err.code, ErrorCode::TypeConflict);
    }

    #[test]
    fn only_integer_to_float_is_implicit() {
        assert!(DataKind::Float.accepts(DataKind::Int));
        assert!(!DataKind::Int.accepts(DataKind::Float));
        assert!(!DataKind::Str.accepts(DataKind::Int));
        assert!(!DataKind::Int.accepts(DataKind::Str));
    }

    #[test]
    fn broadcast_repeats_a_scalar() {
        let data = ArrayData::broadcast(&Value::Int(7), 3).expect("broadcast");
        assert_eq!(data, ArrayData::Int(vec![7, 7, 7]));
    }
}
