// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;

use ramdata_core::ErrorCode;
use ramdata_model::{
    check_name_collision, escape_name, ColumnAttrs, CoordinateTranslator, DType, Filter, Mapping,
    TableAttrs,
};
use ramdata_store::paths::join_key;
use ramdata_store::{
    BackingStore, LockGuard, SpinLockCoordinator, Storage, StoreError, StoreErrorCode,
};
use tracing::{debug, info};

use crate::cache::ColumnCache;
use crate::column::{attrs_to_map, column_path, Column};
use crate::combined::{load_mapping, persist_mapping};
use crate::error::FrameError;
use crate::options::{ColumnSpec, FrameOptions};

pub(crate) const AVAILABILITY_DIR: &str = "__availability__";

pub(crate) enum Mode {
    Standalone,
    /// Local overlay over a read-only source table.
    Masked { source: Box<ZarrDataFrame> },
    Combined {
        components: Vec<ZarrDataFrame>,
        mapping: Arc<Mapping>,
    },
}

/// Type and fill of a column as seen through this table, wherever its
/// data lives.
#[derive(Debug, Clone)]
pub(crate) struct ColumnTemplate {
    pub spec: ColumnSpec,
    pub fill: ramdata_core::Value,
    pub kind: ramdata_model::DataKind,
}

/// Chunked column table. Columns are independent chunked arrays under
/// `path`; table attributes live in `path/.zattrs`.
pub struct ZarrDataFrame {
    pub(crate) storage: Storage,
    pub(crate) path: String,
    pub(crate) locks: Option<SpinLockCoordinator>,
    pub(crate) attrs: TableAttrs,
    pub(crate) filter: Option<Filter>,
    pub(crate) mode: Mode,
    pub(crate) cache: ColumnCache,
    pub(crate) options: FrameOptions,
}

impl std::fmt::Debug for ZarrDataFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            Mode::Standalone => "standalone",
            Mode::Masked { .. } => "masked",
            Mode::Combined { .. } => "combined",
        };
        f.debug_struct("ZarrDataFrame")
            .field("path", &self.path)
            .field("mode", &mode)
            .field("n_rows", &self.attrs.int_num_rows)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

fn parse_table_attrs(path: &str, map: serde_json::Map<String, serde_json::Value>) -> Result<TableAttrs, FrameError> {
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| FrameError::validation(format!("{path}/.zattrs: {e}")))
}

fn load_table_attrs(storage: &Storage, path: &str) -> Result<Option<TableAttrs>, FrameError> {
    let map = storage.read_attrs(path)?;
    if map.is_empty() {
        return Ok(None);
    }
    parse_table_attrs(path, map).map(Some)
}

fn not_initialized(path: &str) -> FrameError {
    FrameError::new(
        ErrorCode::ResourceNotInitialized,
        format!("no table stored at `{path}`"),
    )
}

impl ZarrDataFrame {
    fn assemble(storage: &Storage, path: &str, attrs: TableAttrs, mode: Mode, options: FrameOptions) -> Self {
        let locks = options
            .flag_use_lock
            .then(|| SpinLockCoordinator::for_storage(storage));
        Self {
            storage: storage.clone(),
            path: path.to_string(),
            locks,
            attrs,
            filter: None,
            mode,
            cache: ColumnCache::default(),
            options,
        }
    }

    fn fresh_attrs(n_rows: u64, options: &FrameOptions) -> TableAttrs {
        let chunk = DType::Float64.chunk_rows_for_budget(options.chunk_byte_budget, 1);
        TableAttrs::new(n_rows, chunk)
    }

    fn write_new_table(storage: &Storage, path: &str, attrs: &TableAttrs) -> Result<(), FrameError> {
        storage.mkdir(path)?;
        storage.write_attrs(path, &attrs_to_map(attrs)?)?;
        info!(path, n_rows = attrs.int_num_rows, combined = attrs.is_combined, "created table");
        Ok(())
    }

    /// Creates an empty standalone table of `n_rows` rows. Fails when a
    /// table already exists at `path`.
    pub fn create(storage: &Storage, path: &str, n_rows: u64, options: FrameOptions) -> Result<Self, FrameError> {
        if load_table_attrs(storage, path)?.is_some() {
            return Err(FrameError::validation(format!("a table already exists at `{path}`")));
        }
        let attrs = Self::fresh_attrs(n_rows, &options);
        Self::write_new_table(storage, path, &attrs)?;
        Ok(Self::assemble(storage, path, attrs, Mode::Standalone, options))
    }

    pub fn open(storage: &Storage, path: &str, options: FrameOptions) -> Result<Self, FrameError> {
        let attrs = load_table_attrs(storage, path)?.ok_or_else(|| not_initialized(path))?;
        if attrs.is_combined {
            return Err(FrameError::validation(format!(
                "`{path}` is a combined table; open it with its components"
            )));
        }
        Ok(Self::assemble(storage, path, attrs, Mode::Standalone, options))
    }

    pub fn open_or_create(storage: &Storage, path: &str, n_rows: u64, options: FrameOptions) -> Result<Self, FrameError> {
        match load_table_attrs(storage, path)? {
            Some(attrs) if attrs.int_num_rows != n_rows => Err(FrameError::validation(format!(
                "table `{path}` has {} rows, expected {n_rows}",
                attrs.int_num_rows
            ))),
            Some(_) => Self::open(storage, path, options),
            None => Self::create(storage, path, n_rows, options),
        }
    }

    /// Local overlay at `path` over `source`. Reads fall back to the
    /// source for columns the mask does not hold; writes stay local.
    pub fn masked(storage: &Storage, path: &str, source: Self, options: FrameOptions) -> Result<Self, FrameError> {
        let n_rows = source.n_rows_unfiltered();
        let attrs = match load_table_attrs(storage, path)? {
            Some(attrs) if attrs.int_num_rows != n_rows => {
                return Err(FrameError::validation(format!(
                    "mask `{path}` has {} rows but its source has {n_rows}",
                    attrs.int_num_rows
                )))
            }
            Some(attrs) => attrs,
            None => {
                let mut attrs = Self::fresh_attrs(n_rows, &options);
                attrs.flag_store_string_as_categorical = source.attrs.flag_store_string_as_categorical;
                Self::write_new_table(storage, path, &attrs)?;
                attrs
            }
        };
        Ok(Self::assemble(
            storage,
            path,
            attrs,
            Mode::Masked {
                source: Box::new(source),
            },
            options,
        ))
    }

    /// Concatenates `components` along rows.
    pub fn combined_stacked(
        storage: &Storage,
        path: &str,
        components: Vec<Self>,
        options: FrameOptions,
    ) -> Result<Self, FrameError> {
        let lens: Vec<u64> = components.iter().map(Self::n_rows_unfiltered).collect();
        Self::combined(storage, path, components, Arc::new(Mapping::stacked(&lens)), options)
    }

    /// Merges `components` whose rows are identified by `keys`; rows
    /// sharing a key become one combined row. Also returns the combined
    /// key list.
    pub fn combined_interleaved_from_keys(
        storage: &Storage,
        path: &str,
        components: Vec<Self>,
        keys: &[Vec<String>],
        options: FrameOptions,
    ) -> Result<(Self, Vec<String>), FrameError> {
        let (mapping, combined_keys) = Mapping::interleaved_from_keys(keys)?;
        let frame = Self::combined(storage, path, components, Arc::new(mapping), options)?;
        Ok((frame, combined_keys))
    }

    /// Combined table over `components` composed by an existing mapping.
    /// Interleaved mappings are persisted under `path`.
    pub fn combined(
        storage: &Storage,
        path: &str,
        components: Vec<Self>,
        mapping: Arc<Mapping>,
        options: FrameOptions,
    ) -> Result<Self, FrameError> {
        if mapping.num_components() != components.len() {
            return Err(FrameError::validation(format!(
                "mapping has {} components but {} tables were given",
                mapping.num_components(),
                components.len()
            )));
        }
        for (c, component) in components.iter().enumerate() {
            if mapping.component_len(c) != component.n_rows_unfiltered() {
                return Err(FrameError::validation(format!(
                    "component {c} has {} rows, mapping expects {}",
                    component.n_rows_unfiltered(),
                    mapping.component_len(c)
                )));
            }
        }
        let n_rows = mapping.combined_len();
        let attrs = match load_table_attrs(storage, path)? {
            Some(attrs) if !attrs.is_combined || attrs.int_num_rows != n_rows => {
                return Err(FrameError::validation(format!(
                    "`{path}` already holds a table incompatible with this combination"
                )))
            }
            Some(attrs) => attrs,
            None => {
                let mut attrs = Self::fresh_attrs(n_rows, &options);
                attrs.is_combined = true;
                attrs.is_interleaved = mapping.is_interleaved();
                Self::write_new_table(storage, path, &attrs)?;
                attrs
            }
        };
        if mapping.is_interleaved() {
            persist_mapping(storage, path, &mapping)?;
        }
        Ok(Self::assemble(
            storage,
            path,
            attrs,
            Mode::Combined {
                components,
                mapping,
            },
            options,
        ))
    }

    /// Reopens a combined table, restoring a persisted interleaved
    /// mapping without recomputing it.
    pub fn open_combined(
        storage: &Storage,
        path: &str,
        components: Vec<Self>,
        options: FrameOptions,
    ) -> Result<Self, FrameError> {
        let attrs = load_table_attrs(storage, path)?.ok_or_else(|| not_initialized(path))?;
        if !attrs.is_combined {
            return Err(FrameError::validation(format!("`{path}` is not a combined table")));
        }
        let lens: Vec<u64> = components.iter().map(Self::n_rows_unfiltered).collect();
        let mapping = if attrs.is_interleaved {
            load_mapping(storage, path, &lens)?
        } else {
            Mapping::stacked(&lens)
        };
        if mapping.combined_len() != attrs.int_num_rows {
            return Err(FrameError::validation(format!(
                "components combine into {} rows, table declares {}",
                mapping.combined_len(),
                attrs.int_num_rows
            )));
        }
        Ok(Self::assemble(
            storage,
            path,
            attrs,
            Mode::Combined {
                components,
                mapping: Arc::new(mapping),
            },
            options,
        ))
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
    pub fn options(&self) -> &FrameOptions {
        &self.options
    }

    #[must_use]
    pub fn attrs(&self) -> &TableAttrs {
        &self.attrs
    }

    #[must_use]
    pub fn is_masked(&self) -> bool {
        matches!(self.mode, Mode::Masked { .. })
    }

    #[must_use]
    pub fn is_combined(&self) -> bool {
        matches!(self.mode, Mode::Combined { .. })
    }

    #[must_use]
    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        match &self.mode {
            Mode::Combined { mapping, .. } => Some(mapping),
            _ => None,
        }
    }

    #[must_use]
    pub fn components(&self) -> &[Self] {
        match &self.mode {
            Mode::Combined { components, .. } => components,
            _ => &[],
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&Self> {
        match &self.mode {
            Mode::Masked { source } => Some(source),
            _ => None,
        }
    }

    /// Re-reads the table attributes written by other handles.
    pub fn reload_attrs(&mut self) -> Result<(), FrameError> {
        self.attrs = load_table_attrs(&self.storage, &self.path)?.ok_or_else(|| not_initialized(&self.path))?;
        Ok(())
    }

    #[must_use]
    pub fn n_rows_unfiltered(&self) -> u64 {
        self.attrs.int_num_rows
    }

    /// Visible rows under the active filter.
    #[must_use]
    pub fn n_rows(&self) -> u64 {
        self.filter.as_ref().map_or(self.attrs.int_num_rows, Filter::count)
    }

    /// Names of local columns and of columns readable from the source
    /// or components.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.attrs.columns.keys().cloned().collect();
        match &self.mode {
            Mode::Standalone => {}
            Mode::Masked { source } => names.extend(source.columns()),
            Mode::Combined { components, .. } => {
                for component in components {
                    names.extend(component.columns());
                }
            }
        }
        names.into_iter().collect()
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.attrs.columns.contains_key(column) || self.source_has(column)
    }

    pub(crate) fn source_has(&self, column: &str) -> bool {
        match &self.mode {
            Mode::Standalone => false,
            Mode::Masked { source } => source.contains(column),
            Mode::Combined { components, .. } => components.iter().any(|c| c.contains(column)),
        }
    }

    pub(crate) fn local_column(&self, column: &str) -> Result<Option<Column>, FrameError> {
        Column::open(&self.storage, &self.path, column)
    }

    pub(crate) fn availability_path(&self, column: &str) -> Result<String, FrameError> {
        Ok(join_key(
            &join_key(&self.path, AVAILABILITY_DIR),
            &escape_name(column)?,
        ))
    }

    pub(crate) fn lock(&self, resource: &str) -> Result<Option<LockGuard>, FrameError> {
        Ok(self
            .locks
            .as_ref()
            .map(|locks| locks.acquire(resource, false))
            .transpose()?)
    }

    /// Applies `update` to the table attributes, under the attrs lock
    /// when locking is enabled so edits from other processes are kept.
    pub(crate) fn update_table_attrs<F>(&mut self, update: F) -> Result<(), FrameError>
    where
        F: FnOnce(&mut TableAttrs),
    {
        match &self.locks {
            Some(locks) => {
                let path = self.path.clone();
                let written = locks.update_metadata(&self.path, |map| {
                    let mut attrs: TableAttrs = serde_json::from_value(serde_json::Value::Object(map.clone()))
                        .map_err(|e| StoreError::new(StoreErrorCode::Validation, format!("{path}/.zattrs: {e}")))?;
                    update(&mut attrs);
                    match serde_json::to_value(&attrs) {
                        Ok(serde_json::Value::Object(next)) => {
                            *map = next;
                            Ok(())
                        }
                        Ok(_) => Err(StoreError::new(StoreErrorCode::Internal, "table attributes must be an object")),
                        Err(e) => Err(StoreError::new(StoreErrorCode::Internal, e.to_string())),
                    }
                })?;
                self.attrs = parse_table_attrs(&self.path, written)?;
            }
            None => {
                update(&mut self.attrs);
                self.storage.write_attrs(&self.path, &attrs_to_map(&self.attrs)?)?;
            }
        }
        Ok(())
    }

    /// Installs or clears the row filter. Every column cache is dropped,
    /// and local columns whose length disagrees with the table are
    /// reported.
    pub fn set_filter(&mut self, filter: Option<Filter>) -> Result<(), FrameError> {
        let n_rows = self.n_rows_unfiltered();
        if let Some(f) = &filter {
            if f.len() != n_rows {
                return Err(FrameError::validation(format!(
                    "filter of length {} does not match {n_rows} rows",
                    f.len()
                )));
            }
        }
        let names: Vec<String> = self.attrs.columns.keys().cloned().collect();
        for name in names {
            if let Some(column) = self.local_column(&name)? {
                if column.n_rows() != n_rows {
                    return Err(FrameError::validation(format!(
                        "column `{name}` holds {} rows but the table declares {n_rows}",
                        column.n_rows()
                    )));
                }
            }
        }
        debug!(
            table = %self.path,
            visible = filter.as_ref().map_or(n_rows, Filter::count),
            "filter changed"
        );
        self.filter = filter;
        self.cache.clear();
        Ok(())
    }

    #[must_use]
    pub fn get_filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Unfiltered indices of the rows visible under `filter`, or under
    /// the active filter when `None`.
    #[must_use]
    pub fn get_integer_indices(&self, filter: Option<&Filter>) -> Vec<u64> {
        match filter.or(self.filter.as_ref()) {
            Some(f) => f.indices(),
            None => (0..self.n_rows_unfiltered()).collect(),
        }
    }

    /// Creates `name` if it does not exist yet.
    pub fn initialize_column(&mut self, name: &str, spec: &ColumnSpec) -> Result<(), FrameError> {
        if self.local_column(name)?.is_none() {
            self.create_column(name, spec)?;
        }
        Ok(())
    }

    /// Creates `name` with the type and shape of `template_column` in
    /// `template`.
    pub fn initialize_column_from(
        &mut self,
        name: &str,
        template: &Self,
        template_column: &str,
    ) -> Result<(), FrameError> {
        let found = template.column_template(template_column)?.ok_or_else(|| {
            FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("template column `{template_column}` does not exist"),
            )
        })?;
        let spec = ColumnSpec {
            description: None,
            ..found.spec
        };
        self.initialize_column(name, &spec)
    }

    pub(crate) fn create_column(&mut self, name: &str, spec: &ColumnSpec) -> Result<Column, FrameError> {
        let escaped = escape_name(name)?;
        let existing: Vec<String> = self
            .attrs
            .columns
            .keys()
            .filter_map(|k| escape_name(k).ok())
            .collect();
        check_name_collision(existing.iter().map(String::as_str), &escaped)?;
        let path = join_key(&self.path, &escaped);
        let column = {
            let _guard = self.lock(&path)?;
            Column::create(
                &self.storage,
                &path,
                name,
                spec,
                self.n_rows_unfiltered(),
                self.options.chunk_byte_budget,
            )?
        };
        let description = spec.description.clone();
        self.update_table_attrs(|attrs| {
            attrs.columns.insert(name.to_string(), description);
        })?;
        info!(
            table = %self.path,
            column = name,
            dtype = %column.attrs.dtype,
            categorical = column.attrs.flag_categorical,
            "initialized column"
        );
        Ok(column)
    }

    /// Removes a local column and its chunks. Absent columns are a no-op.
    pub fn delete(&mut self, column: &str) -> Result<(), FrameError> {
        let path = column_path(&self.path, column)?;
        {
            let _guard = self.lock(&path)?;
            self.storage.remove(&path)?;
            self.storage.remove(&self.availability_path(column)?)?;
        }
        self.cache.remove(column);
        if self.attrs.columns.contains_key(column) {
            self.update_table_attrs(|attrs| {
                attrs.columns.remove(column);
            })?;
            info!(table = %self.path, column, "deleted column");
        }
        Ok(())
    }

    /// Moves a local column to a new name.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FrameError> {
        let from = column_path(&self.path, old)?;
        let to = column_path(&self.path, new)?;
        let escaped = escape_name(new)?;
        let existing: Vec<String> = self
            .attrs
            .columns
            .keys()
            .filter(|k| k.as_str() != old)
            .filter_map(|k| escape_name(k).ok())
            .collect();
        check_name_collision(existing.iter().map(String::as_str), &escaped)?;
        if !self.storage.array_exists(&from)? {
            return Err(FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("column `{old}` does not exist in `{}`", self.path),
            ));
        }
        if self.storage.exists(&to)? {
            return Err(FrameError::validation(format!("column `{new}` already exists")));
        }
        {
            let _from_guard = self.lock(&from)?;
            let _to_guard = self.lock(&to)?;
            self.storage.rename(&from, &to)?;
            let availability = self.availability_path(old)?;
            if self.storage.array_exists(&availability)? {
                self.storage.rename(&availability, &self.availability_path(new)?)?;
            }
        }
        self.cache.remove(old);
        self.update_table_attrs(|attrs| {
            let description = attrs.columns.remove(old).flatten();
            attrs.columns.insert(new.to_string(), description);
        })?;
        info!(table = %self.path, from = old, to = new, "renamed column");
        Ok(())
    }

    pub fn set_description(&mut self, column: &str, description: Option<String>) -> Result<(), FrameError> {
        let text = description.clone();
        self.update_column_metadata(column, |attrs| attrs.description = text)?;
        self.update_table_attrs(|attrs| {
            attrs.columns.insert(column.to_string(), description);
        })
    }

    /// Attributes of `column`, looked up locally, then in the source or
    /// components.
    pub fn get_column_metadata(&self, column: &str) -> Result<Option<ColumnAttrs>, FrameError> {
        if let Some(local) = self.local_column(column)? {
            return Ok(Some(local.attrs));
        }
        match &self.mode {
            Mode::Standalone => Ok(None),
            Mode::Masked { source } => source.get_column_metadata(column),
            Mode::Combined { components, .. } => {
                for component in components {
                    if let Some(attrs) = component.get_column_metadata(column)? {
                        return Ok(Some(attrs));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Read-modify-write of a local column's attributes. The storage
    /// dtype cannot change this way.
    pub fn update_column_metadata<F>(&mut self, column: &str, update: F) -> Result<ColumnAttrs, FrameError>
    where
        F: FnOnce(&mut ColumnAttrs),
    {
        let mut local = self.local_column(column)?.ok_or_else(|| {
            FrameError::new(
                ErrorCode::ResourceNotInitialized,
                format!("column `{column}` does not exist in `{}`", self.path),
            )
        })?;
        let _guard = self.lock(local.path())?;
        // re-read under the lock
        if let Some(current) = self.local_column(column)? {
            local = current;
        }
        let dtype = local.attrs.dtype;
        update(&mut local.attrs);
        if local.attrs.dtype != dtype {
            return Err(FrameError::type_conflict(format!(
                "column `{column}` is stored as {dtype}; its dtype cannot be edited"
            )));
        }
        local.save_attrs()?;
        self.cache.remove(column);
        Ok(local.attrs)
    }

    /// Ordered category list of a categorical column. Combined tables
    /// report the ordered union of their components' categories.
    pub fn get_categories(&self, column: &str) -> Result<Option<Vec<String>>, FrameError> {
        if let Some(local) = self.local_column(column)? {
            return Ok(local
                .is_categorical()
                .then(|| local.attrs.categories().to_vec()));
        }
        self.source_categories(column)
    }

    pub(crate) fn source_categories(&self, column: &str) -> Result<Option<Vec<String>>, FrameError> {
        match &self.mode {
            Mode::Standalone => Ok(None),
            Mode::Masked { source } => source.get_categories(column),
            Mode::Combined { components, .. } => {
                let mut union: Vec<String> = Vec::new();
                let mut seen = std::collections::HashSet::new();
                let mut any = false;
                for component in components {
                    if let Some(categories) = component.get_categories(column)? {
                        any = true;
                        for category in categories {
                            if seen.insert(category.clone()) {
                                union.push(category);
                            }
                        }
                    }
                }
                Ok(any.then_some(union))
            }
        }
    }

    pub(crate) fn column_template(&self, column: &str) -> Result<Option<ColumnTemplate>, FrameError> {
        if let Some(local) = self.local_column(column)? {
            return Ok(Some(ColumnTemplate {
                spec: local.spec(),
                fill: local.fill(),
                kind: local.value_kind(),
            }));
        }
        let found = match &self.mode {
            Mode::Standalone => None,
            Mode::Masked { source } => source.column_template(column)?,
            Mode::Combined { components, .. } => {
                let mut found = None;
                for component in components {
                    if let Some(template) = component.column_template(column)? {
                        found = Some(template);
                        break;
                    }
                }
                found
            }
        };
        let Some(mut template) = found else {
            return Ok(None);
        };
        if template.spec.categorical && self.is_combined() {
            let categories = self.source_categories(column)?.unwrap_or_default();
            template.spec = ColumnSpec {
                dtype: ramdata_model::categorical_code_dtype(categories.len()),
                categories,
                ..template.spec
            };
        }
        Ok(Some(template))
    }

    /// Loads whole columns into memory; later reads under the same
    /// filter are served without I/O.
    pub fn load(&mut self, columns: &[&str]) -> Result<(), FrameError> {
        for column in columns {
            if self.cache.contains(column) {
                continue;
            }
            if let Some(values) = self.get(column, ramdata_model::RowSelector::All, None)? {
                self.cache.insert(column, values);
            }
        }
        Ok(())
    }

    pub fn unload(&mut self, columns: &[&str]) {
        for column in columns {
            self.cache.remove(column);
        }
    }

    #[must_use]
    pub fn loaded_columns(&self) -> Vec<String> {
        self.cache.loaded()
    }

    /// Clone safe to hand to another worker: remote storage gets its own
    /// isolation server. Filters carry over; caches do not.
    pub fn fork_safe(&self) -> Result<Self, FrameError> {
        let mode = match &self.mode {
            Mode::Standalone => Mode::Standalone,
            Mode::Masked { source } => Mode::Masked {
                source: Box::new(source.fork_safe()?),
            },
            Mode::Combined {
                components,
                mapping,
            } => Mode::Combined {
                components: components
                    .iter()
                    .map(Self::fork_safe)
                    .collect::<Result<Vec<_>, _>>()?,
                mapping: Arc::clone(mapping),
            },
        };
        let storage = self.storage.fork_safe()?;
        let mut forked = Self::assemble(&storage, &self.path, self.attrs.clone(), mode, self.options.clone());
        forked.filter = self.filter.clone();
        Ok(forked)
    }

    /// Stops the isolation servers of this table and everything it reads
    /// from. Safe to call more than once.
    pub fn terminate(&self) {
        self.storage.terminate();
        match &self.mode {
            Mode::Standalone => {}
            Mode::Masked { source } => source.terminate(),
            Mode::Combined { components, .. } => components.iter().for_each(Self::terminate),
        }
    }
}
