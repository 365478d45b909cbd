// SPDX-License-Identifier: Apache-2.0

//! Row reads and writes, including the transfer of rows from a source
//! or components into local columns.

use std::collections::BTreeSet;

use ramdata_core::{ErrorCode, Value};
use ramdata_model::{encode_codes, ArrayData, ColumnValues, DType, DataKind, RowSelector};
use ramdata_store::{ArrayMeta, BackingStore, DimSelection, Selection};
use tracing::{debug, info};

use crate::column::{column_path, rows_selection, Column};
use crate::combined::read_components;
use crate::error::FrameError;
use crate::frame::{Mode, ZarrDataFrame};
use crate::options::{ColumnSpec, FrameInput};

const AVAILABLE_COUNT_KEY: &str = "int_num_available";

impl ZarrDataFrame {
    /// Unfiltered row indices for `rows`. An omitted selector follows the
    /// active filter; explicit selectors address unfiltered rows.
    fn resolve_rows(&self, rows: &RowSelector) -> Result<Vec<u64>, FrameError> {
        match (rows, &self.filter) {
            (RowSelector::All, Some(filter)) => Ok(filter.indices()),
            _ => Ok(rows.resolve(self.n_rows_unfiltered())?),
        }
    }

    /// Values of `column` at `rows`, or `None` when no such column is
    /// readable. Categorical values are decoded unless the table reads
    /// integers as categories.
    pub fn get(
        &mut self,
        column: &str,
        rows: RowSelector,
        secondary: Option<DimSelection>,
    ) -> Result<Option<ColumnValues>, FrameError> {
        if let RowSelector::Coords(coords) = &rows {
            return self.get_coords(column, coords);
        }
        let indices = self.resolve_rows(&rows)?;
        if secondary.is_none() {
            if let Some(hit) = self.cache.get(column, &indices, self.filter.as_ref()) {
                return Ok(Some(hit));
            }
        }
        let keep_codes = self.options.integers_as_categories;
        self.read_rows(column, &indices, secondary.as_ref(), keep_codes)
    }

    fn get_coords(&mut self, column: &str, coords: &[(u64, u64)]) -> Result<Option<ColumnValues>, FrameError> {
        RowSelector::Coords(coords.to_vec()).resolve(self.n_rows_unfiltered())?;
        let unique: Vec<u64> = coords
            .iter()
            .map(|(row, _)| *row)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let keep_codes = self.options.integers_as_categories;
        let Some(values) = self.read_rows(column, &unique, None, keep_codes)? else {
            return Ok(None);
        };
        let width = values.row_width();
        let mut positions = Vec::with_capacity(coords.len());
        for &(row, secondary) in coords {
            if secondary as usize >= width {
                return Err(FrameError::new(
                    ErrorCode::CoordinateOutOfRange,
                    format!("secondary index {secondary} outside width {width} of `{column}`"),
                ));
            }
            let slot = unique.binary_search(&row).unwrap_or_else(|i| i);
            positions.push(slot * width + secondary as usize);
        }
        Ok(Some(ColumnValues::vector(values.data.take(&positions))))
    }

    /// Reads unfiltered `rows` of `column` without consulting the cache.
    pub(crate) fn read_rows(
        &mut self,
        column: &str,
        rows: &[u64],
        secondary: Option<&DimSelection>,
        keep_codes: bool,
    ) -> Result<Option<ColumnValues>, FrameError> {
        let pending = match self.local_column(column)? {
            Some(_) => self.storage.array_exists(&self.availability_path(column)?)?,
            None => self.options.lazy_load && self.source_has(column),
        };
        if pending {
            self.lazy_load(rows, column)?;
        }
        if let Some(local) = self.local_column(column)? {
            return Ok(Some(local.read(rows, secondary, keep_codes)?));
        }
        let Some(values) = self.read_source(column, rows, secondary)? else {
            return Ok(None);
        };
        if !keep_codes {
            return Ok(Some(values));
        }
        match self.source_categories(column)? {
            Some(mut categories) => {
                let strings = values.data.as_str_slice().unwrap_or(&[]);
                let codes = encode_codes(strings, &mut categories).codes;
                Ok(Some(ColumnValues::with_shape(ArrayData::Int(codes), values.shape)?))
            }
            None => Ok(Some(values)),
        }
    }

    /// Decoded values from the source or components; never touches
    /// local columns.
    fn read_source(
        &mut self,
        column: &str,
        rows: &[u64],
        secondary: Option<&DimSelection>,
    ) -> Result<Option<ColumnValues>, FrameError> {
        let template = match &self.mode {
            Mode::Combined { .. } => self.column_template(column)?,
            _ => None,
        };
        match &mut self.mode {
            Mode::Standalone => Ok(None),
            Mode::Masked { source } => source.read_rows(column, rows, secondary, false),
            Mode::Combined {
                components,
                mapping,
            } => match template {
                Some(template) => read_components(components, &**mapping, column, &template, rows, secondary),
                None => Ok(None),
            },
        }
    }

    /// Local column receiving rows from the source, with an
    /// availability array tracking which rows it already holds.
    fn ensure_sink(&mut self, column: &str) -> Result<Column, FrameError> {
        if let Some(local) = self.local_column(column)? {
            return Ok(local);
        }
        let template = self.column_template(column)?.ok_or_else(|| {
            FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("column `{column}` exists neither in `{}` nor in its sources", self.path),
            )
        })?;
        let _guard = self.lock(&column_path(&self.path, column)?)?;
        // another handle may have created the sink while we waited
        if let Some(local) = self.local_column(column)? {
            return Ok(local);
        }
        // availability first: a visible sink without it reads as fully loaded
        let n_rows = self.n_rows_unfiltered();
        let chunk = self.attrs.int_num_rows_in_a_chunk.min(n_rows.max(1));
        let meta = ArrayMeta::new(vec![n_rows], vec![chunk], DType::Bool).with_fill(serde_json::Value::Bool(false));
        let availability = self.storage.create_array(&self.availability_path(column)?, meta)?;
        let mut counter = serde_json::Map::new();
        counter.insert(AVAILABLE_COUNT_KEY.to_string(), serde_json::Value::from(0u64));
        availability.set_attrs(&counter)?;
        let sink = self.create_column(column, &template.spec)?;
        debug!(table = %self.path, column, "created lazy-load sink");
        Ok(sink)
    }

    /// Records `rows` as held locally. Once every row is held the
    /// availability array is dropped and the column marked materialized.
    /// Runs under the column lock so handles loading disjoint rows keep
    /// each other's flags and count.
    fn mark_available(&mut self, column: &str, rows: &[u64]) -> Result<(), FrameError> {
        let path = self.availability_path(column)?;
        let Some(sink) = self.local_column(column)? else {
            return Ok(());
        };
        let _guard = self.lock(sink.path())?;
        if !self.storage.array_exists(&path)? {
            return Ok(());
        }
        let availability = self.storage.open_array(&path)?;
        let rows: Vec<u64> = rows.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let before = availability.read(&Selection::rows(rows_selection(&rows)))?.data;
        let newly = before.as_bool().map_or(0, |flags| flags.iter().filter(|f| !**f).count()) as u64;
        if newly == 0 {
            return Ok(());
        }
        availability.write(
            &Selection::rows(rows_selection(&rows)),
            &ArrayData::Bool(vec![true; rows.len()]),
        )?;
        let mut attrs = availability.attrs()?;
        let held = attrs
            .get(AVAILABLE_COUNT_KEY)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
            + newly;
        if held >= self.n_rows_unfiltered() {
            self.storage.remove(&path)?;
            let mut sink = self.reload_column(column, sink)?;
            sink.attrs.flag_materialized = true;
            sink.save_attrs()?;
            info!(table = %self.path, column, "column fully materialized");
        } else {
            attrs.insert(AVAILABLE_COUNT_KEY.to_string(), serde_json::Value::from(held));
            availability.set_attrs(&attrs)?;
        }
        Ok(())
    }

    /// Column state as currently stored; callers hold the column lock.
    fn reload_column(&self, column: &str, stale: Column) -> Result<Column, FrameError> {
        Ok(self.local_column(column)?.unwrap_or(stale))
    }

    /// Copies the requested rows of `column` that are not held locally
    /// from the source or components into the local column.
    pub fn lazy_load(&mut self, rows: &[u64], column: &str) -> Result<(), FrameError> {
        let had_local = self.local_column(column)?.is_some();
        let availability_path = self.availability_path(column)?;
        if had_local && !self.storage.array_exists(&availability_path)? {
            return Ok(());
        }
        let mut sink = self.ensure_sink(column)?;
        let n_rows = self.n_rows_unfiltered();
        let requested: Vec<u64> = rows
            .iter()
            .copied()
            .filter(|r| *r < n_rows)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if requested.is_empty() {
            return Ok(());
        }
        // dropped by another handle once every row was held
        if !self.storage.array_exists(&availability_path)? {
            return Ok(());
        }
        let availability = self.storage.open_array(&availability_path)?;
        let flags = availability
            .read(&Selection::rows(rows_selection(&requested)))?
            .data;
        let flags = flags
            .as_bool()
            .ok_or_else(|| FrameError::new(ErrorCode::Internal, "availability array is not boolean"))?;
        let missing: Vec<u64> = requested
            .iter()
            .zip(flags)
            .filter(|(_, held)| !**held)
            .map(|(row, _)| *row)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let values = self.read_source(column, &missing, None)?.ok_or_else(|| {
            FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("no source holds column `{column}`"),
            )
        })?;
        {
            let _guard = self.lock(sink.path())?;
            sink = self.reload_column(column, sink)?;
            sink.write(&missing, None, &values.data, false)?;
        }
        debug!(table = %self.path, column, rows = missing.len(), "lazy-loaded rows");
        self.mark_available(column, &missing)
    }

    /// Writes `values` into `column` at `rows`, creating the column on
    /// first write. Scalars broadcast over the selection.
    pub fn set(&mut self, column: &str, rows: RowSelector, values: impl Into<FrameInput>) -> Result<(), FrameError> {
        let input = values.into();
        if let RowSelector::Coords(coords) = &rows {
            return self.set_coords(column, coords, input);
        }
        let indices = self.resolve_rows(&rows)?;
        let mut local = match self.local_column(column)? {
            Some(local) => local,
            None if self.source_has(column) => self.ensure_sink(column)?,
            None => {
                let _guard = self.lock(&column_path(&self.path, column)?)?;
                match self.local_column(column)? {
                    Some(local) => local,
                    None => {
                        let sample = match &input {
                            FrameInput::Values(values) => values.clone(),
                            FrameInput::Scalar(value) => ColumnValues::vector(ArrayData::broadcast(value, 1)?),
                        };
                        let spec = ColumnSpec::infer(&sample, self.attrs.flag_store_string_as_categorical);
                        self.create_column(column, &spec)?
                    }
                }
            }
        };
        {
            let _guard = self.lock(local.path())?;
            // categories and code width as committed by other writers
            local = self.reload_column(column, local)?;
            let data = materialize(input, local.value_kind(), indices.len(), local.row_width(), column)?;
            local.write(&indices, None, &data, self.options.integers_as_categories)?;
        }
        self.mark_available(column, &indices)?;
        self.cache.remove(column);
        Ok(())
    }

    fn set_coords(&mut self, column: &str, coords: &[(u64, u64)], input: FrameInput) -> Result<(), FrameError> {
        let rows = RowSelector::Coords(coords.to_vec()).resolve(self.n_rows_unfiltered())?;
        if self.local_column(column)?.is_none() && !self.source_has(column) {
            return Err(FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("coordinate writes need an initialized column, `{column}` does not exist"),
            ));
        }
        // rows only partly overwritten must hold their source values first
        if self.local_column(column)?.is_none() || self.storage.array_exists(&self.availability_path(column)?)? {
            self.lazy_load(&rows, column)?;
        }
        let local = self.local_column(column)?.ok_or_else(|| vanished(column))?;
        {
            let _guard = self.lock(local.path())?;
            let mut local = self.reload_column(column, local)?;
            let data = materialize(input, local.value_kind(), coords.len(), 1, column)?;
            local.write_coords(coords, &data, self.options.integers_as_categories)?;
        }
        self.cache.remove(column);
        Ok(())
    }
}

fn vanished(column: &str) -> FrameError {
    FrameError::new(ErrorCode::Internal, format!("column `{column}` vanished during a write"))
}

fn materialize(input: FrameInput, kind: DataKind, n_rows: usize, width: usize, column: &str) -> Result<ArrayData, FrameError> {
    match input {
        FrameInput::Scalar(Value::Null) if matches!(kind, DataKind::Float | DataKind::Str) => {
            Ok(ArrayData::filled(kind, &Value::Null, n_rows * width))
        }
        FrameInput::Scalar(Value::Null) => Err(FrameError::type_conflict(format!(
            "{} column `{column}` has no null value",
            kind.as_str()
        ))),
        FrameInput::Scalar(value) => Ok(ArrayData::broadcast(&value, n_rows * width)?),
        FrameInput::Values(values) => {
            if values.data.len() != n_rows * width {
                return Err(FrameError::validation(format!(
                    "{} values do not fill {n_rows} rows of width {width} in `{column}`",
                    values.data.len()
                )));
            }
            Ok(values.data)
        }
    }
}
