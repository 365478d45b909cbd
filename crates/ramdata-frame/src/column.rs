// SPDX-License-Identifier: Apache-2.0

//! One persisted column: a chunked array whose first dimension is the
//! table's row axis, with its [`ColumnAttrs`] in the array's `.zattrs`.

use ramdata_core::{ErrorCode, Value};
use ramdata_model::{
    categorical_code_dtype, decode_codes, encode_codes, escape_name, ArrayData, ColumnAttrs,
    ColumnValues, DataKind,
};
use ramdata_store::array::codec::parse_fill;
use ramdata_store::paths::join_key;
use ramdata_store::{ArrayHandle, ArrayMeta, DimSelection, Selection, Storage};
use tracing::info;

use crate::error::FrameError;
use crate::options::ColumnSpec;

/// Contiguous ascending rows read as one range, everything else as an
/// index list.
pub(crate) fn rows_selection(rows: &[u64]) -> DimSelection {
    match (rows.first(), rows.last()) {
        (Some(&first), Some(&last))
            if last >= first
                && last - first + 1 == rows.len() as u64
                && rows.windows(2).all(|w| w[1] == w[0] + 1) =>
        {
            DimSelection::Range(first, last + 1)
        }
        _ => DimSelection::Indices(rows.to_vec()),
    }
}

pub(crate) fn column_path(frame_path: &str, name: &str) -> Result<String, FrameError> {
    Ok(join_key(frame_path, &escape_name(name)?))
}

fn attrs_from_map(
    path: &str,
    map: serde_json::Map<String, serde_json::Value>,
) -> Result<ColumnAttrs, FrameError> {
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| FrameError::validation(format!("{path}/.zattrs: {e}")))
}

pub(crate) fn attrs_to_map<T: serde::Serialize>(
    value: &T,
) -> Result<serde_json::Map<String, serde_json::Value>, FrameError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(FrameError::new(ErrorCode::Internal, "attributes must be an object")),
        Err(e) => Err(FrameError::new(ErrorCode::Internal, e.to_string())),
    }
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub attrs: ColumnAttrs,
    array: ArrayHandle,
}

impl Column {
    /// Opens `name` under `frame_path`; `None` when never created.
    pub(crate) fn open(
        storage: &Storage,
        frame_path: &str,
        name: &str,
    ) -> Result<Option<Self>, FrameError> {
        let path = column_path(frame_path, name)?;
        if !storage.array_exists(&path)? {
            return Ok(None);
        }
        let array = storage.open_array(&path)?;
        let attrs = attrs_from_map(&path, array.attrs()?)?;
        Ok(Some(Self {
            name: name.to_string(),
            attrs,
            array,
        }))
    }

    pub(crate) fn create(
        storage: &Storage,
        path: &str,
        name: &str,
        spec: &ColumnSpec,
        n_rows: u64,
        chunk_byte_budget: u64,
    ) -> Result<Self, FrameError> {
        let mut attrs = if spec.categorical {
            ColumnAttrs::categorical(spec.categories.clone())
        } else {
            ColumnAttrs::plain(spec.dtype)
        };
        if let Some(fill) = &spec.fill_value {
            attrs.fill_value = fill.clone();
        }
        attrs.description = spec.description.clone();

        let secondary_len: u64 = spec.secondary_shape.iter().product();
        let chunk_rows = attrs.dtype.chunk_rows_for_budget(chunk_byte_budget, secondary_len);
        let mut shape = vec![n_rows];
        shape.extend(&spec.secondary_shape);
        let mut chunks = vec![chunk_rows.min(n_rows.max(1))];
        chunks.extend(spec.secondary_shape.iter().map(|d| (*d).max(1)));
        let meta = ArrayMeta::new(shape, chunks, attrs.dtype).with_fill(attrs.fill_value.clone());
        let array = storage.create_array(path, meta)?;
        let column = Self {
            name: name.to_string(),
            attrs,
            array,
        };
        column.save_attrs()?;
        Ok(column)
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.array.path()
    }

    #[must_use]
    pub fn n_rows(&self) -> u64 {
        self.array.shape()[0]
    }

    #[must_use]
    pub fn secondary_shape(&self) -> Vec<u64> {
        self.array.shape()[1..].to_vec()
    }

    /// Values per row.
    #[must_use]
    pub fn row_width(&self) -> usize {
        self.array.shape()[1..].iter().product::<u64>() as usize
    }

    #[must_use]
    pub fn is_categorical(&self) -> bool {
        self.attrs.flag_categorical
    }

    /// Kind of decoded values.
    #[must_use]
    pub fn value_kind(&self) -> DataKind {
        if self.attrs.flag_categorical {
            DataKind::Str
        } else {
            self.attrs.dtype.kind()
        }
    }

    /// Fill of decoded values; categorical columns fill with null.
    #[must_use]
    pub fn fill(&self) -> Value {
        if self.attrs.flag_categorical {
            Value::Null
        } else {
            parse_fill(self.attrs.dtype, &self.attrs.fill_value)
        }
    }

    /// Spec reproducing this column's type and shape elsewhere.
    #[must_use]
    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec {
            dtype: self.attrs.dtype,
            categorical: self.attrs.flag_categorical,
            categories: self.attrs.categories().to_vec(),
            secondary_shape: self.secondary_shape(),
            fill_value: Some(self.attrs.fill_value.clone()),
            description: self.attrs.description.clone(),
        }
    }

    pub(crate) fn save_attrs(&self) -> Result<(), FrameError> {
        self.array.set_attrs(&attrs_to_map(&self.attrs)?)?;
        Ok(())
    }

    fn selection(rows: &[u64], secondary: Option<&DimSelection>) -> Selection {
        let mut dims = vec![rows_selection(rows)];
        if let Some(sec) = secondary {
            dims.push(sec.clone());
        }
        Selection::new(dims)
    }

    /// Stored values; categorical columns yield codes.
    pub(crate) fn read_raw(
        &self,
        rows: &[u64],
        secondary: Option<&DimSelection>,
    ) -> Result<ColumnValues, FrameError> {
        Ok(self.array.read(&Self::selection(rows, secondary))?)
    }

    /// Values with categorical codes decoded unless `keep_codes`.
    pub(crate) fn read(
        &self,
        rows: &[u64],
        secondary: Option<&DimSelection>,
        keep_codes: bool,
    ) -> Result<ColumnValues, FrameError> {
        let raw = self.read_raw(rows, secondary)?;
        if !self.attrs.flag_categorical || keep_codes {
            return Ok(raw);
        }
        let codes = raw.data.as_i64().unwrap_or(&[]);
        let decoded = decode_codes(codes, self.attrs.categories());
        Ok(ColumnValues::with_shape(ArrayData::Str(decoded), raw.shape)?)
    }

    /// Writes `values` at `rows`. Strings extend the category list of a
    /// categorical column; a wider code type rewrites the whole column.
    pub(crate) fn write(
        &mut self,
        rows: &[u64],
        secondary: Option<&DimSelection>,
        values: &ArrayData,
        codes_given: bool,
    ) -> Result<(), FrameError> {
        let stored = if self.attrs.flag_categorical {
            self.encode_categorical(values, codes_given)?
        } else {
            if !self.attrs.dtype.kind().accepts(values.kind()) {
                return Err(FrameError::type_conflict(format!(
                    "column `{}` holds {} values, got {}",
                    self.name,
                    self.attrs.dtype.kind().as_str(),
                    values.kind().as_str()
                )));
            }
            values.clone()
        };
        self.array.write(&Self::selection(rows, secondary), &stored)?;
        if stored.contains_nan() && self.attrs.flag_contains_nan != Some(true) {
            self.attrs.flag_contains_nan = Some(true);
            self.save_attrs()?;
        }
        Ok(())
    }

    pub(crate) fn write_coords(
        &mut self,
        coords: &[(u64, u64)],
        values: &ArrayData,
        codes_given: bool,
    ) -> Result<(), FrameError> {
        let stored = if self.attrs.flag_categorical {
            self.encode_categorical(values, codes_given)?
        } else {
            if !self.attrs.dtype.kind().accepts(values.kind()) {
                return Err(FrameError::type_conflict(format!(
                    "column `{}` holds {} values, got {}",
                    self.name,
                    self.attrs.dtype.kind().as_str(),
                    values.kind().as_str()
                )));
            }
            values.clone()
        };
        let points: Vec<Vec<u64>> = coords.iter().map(|(r, c)| vec![*r, *c]).collect();
        self.array.write_coords(&points, &stored)?;
        Ok(())
    }

    fn encode_categorical(&mut self, values: &ArrayData, codes_given: bool) -> Result<ArrayData, FrameError> {
        match values {
            ArrayData::Str(strings) => {
                let mut categories = self.attrs.categories().to_vec();
                let encoding = encode_codes(strings, &mut categories);
                if !encoding.added.is_empty() {
                    self.grow_categories(categories)?;
                }
                Ok(ArrayData::Int(encoding.codes))
            }
            ArrayData::Int(codes) if codes_given => {
                let n = self.attrs.categories().len() as i64;
                if let Some(bad) = codes.iter().find(|c| **c < -1 || **c >= n) {
                    return Err(FrameError::new(
                        ErrorCode::CoordinateOutOfRange,
                        format!("code {bad} outside the {n} categories of `{}`", self.name),
                    ));
                }
                Ok(values.clone())
            }
            other => Err(FrameError::type_conflict(format!(
                "categorical column `{}` cannot store {} values",
                self.name,
                other.kind().as_str()
            ))),
        }
    }

    fn grow_categories(&mut self, categories: Vec<String>) -> Result<(), FrameError> {
        let dtype = categorical_code_dtype(categories.len());
        if dtype != self.attrs.dtype {
            info!(
                column = %self.name,
                from = %self.attrs.dtype,
                to = %dtype,
                "widening categorical codes; rewriting column"
            );
            let all = self.array.read(&Selection::all())?;
            let mut meta = self.array.meta().clone();
            meta.dtype = dtype;
            let storage = self.array.storage().clone();
            let path = self.array.path().to_string();
            let array = storage.create_array(&path, meta)?;
            array.write(&Selection::all(), &all.data)?;
            self.array = array;
            self.attrs.dtype = dtype;
        }
        self.attrs.l_value_unique = Some(categories);
        self.save_attrs()
    }
}
