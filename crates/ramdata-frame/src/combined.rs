// SPDX-License-Identifier: Apache-2.0

//! Combined tables: persisted interleaved mappings and reads that
//! scatter component rows into the combined row order.

use ramdata_core::ErrorCode;
use ramdata_model::{
    ArrayData, ColumnValues, CoordinateTranslator, DType, InterleavedMappingMeta, Mapping,
};
use ramdata_store::paths::join_key;
use ramdata_store::{ArrayMeta, DimSelection, Selection, Storage};
use tracing::debug;

use crate::column::attrs_to_map;
use crate::error::FrameError;
use crate::frame::{ColumnTemplate, ZarrDataFrame};

pub const MAPPING_DIR: &str = "__mapping__";

const MAPPING_CHUNK_ROWS: u64 = 65_536;

/// Writes one `(combined_index, component_index)` array per component
/// under `<root>/__mapping__`, plus the per-component record counts.
pub fn persist_mapping(storage: &Storage, root: &str, mapping: &Mapping) -> Result<(), FrameError> {
    let dir = join_key(root, MAPPING_DIR);
    let mut counts = Vec::with_capacity(mapping.num_components());
    for component in 0..mapping.num_components() {
        let pairs = mapping.component_pairs(component);
        let n = pairs.len() as u64;
        counts.push(n);
        let meta = ArrayMeta::new(vec![n, 2], vec![MAPPING_CHUNK_ROWS.min(n.max(1)), 2], DType::Int64);
        let array = storage.create_array(&join_key(&dir, &component.to_string()), meta)?;
        if n > 0 {
            let flat: Vec<i64> = pairs
                .iter()
                .flat_map(|(combined, local)| [*combined as i64, *local as i64])
                .collect();
            array.write(&Selection::all(), &ArrayData::Int(flat))?;
        }
    }
    let meta = InterleavedMappingMeta {
        l_int_num_records: counts,
        int_num_records: mapping.combined_len(),
    };
    storage.write_attrs(&dir, &attrs_to_map(&meta)?)?;
    debug!(root, components = mapping.num_components(), "persisted interleaved mapping");
    Ok(())
}

/// Rebuilds the mapping written by [`persist_mapping`].
pub fn load_mapping(storage: &Storage, root: &str, component_lens: &[u64]) -> Result<Mapping, FrameError> {
    let dir = join_key(root, MAPPING_DIR);
    let attrs = storage.read_attrs(&dir)?;
    if attrs.is_empty() {
        return Err(FrameError::new(
            ErrorCode::ResourceNotInitialized,
            format!("no interleaved mapping stored under `{root}`"),
        ));
    }
    let meta: InterleavedMappingMeta = serde_json::from_value(serde_json::Value::Object(attrs))
        .map_err(|e| FrameError::validation(format!("{dir}/.zattrs: {e}")))?;
    if meta.l_int_num_records.len() != component_lens.len() {
        return Err(FrameError::validation(format!(
            "mapping was stored for {} components, {} given",
            meta.l_int_num_records.len(),
            component_lens.len()
        )));
    }
    let mut pairs = Vec::with_capacity(component_lens.len());
    for (component, &count) in meta.l_int_num_records.iter().enumerate() {
        if count == 0 {
            pairs.push(Vec::new());
            continue;
        }
        let array = storage.open_array(&join_key(&dir, &component.to_string()))?;
        let values = array.read(&Selection::all())?.data;
        let flat = values
            .as_i64()
            .ok_or_else(|| FrameError::validation(format!("mapping {component} is not an integer array")))?;
        pairs.push(
            flat.chunks_exact(2)
                .map(|p| (p[0] as u64, p[1] as u64))
                .collect::<Vec<_>>(),
        );
    }
    Ok(Mapping::interleaved_from_pairs(
        meta.int_num_records,
        &pairs,
        component_lens,
    )?)
}

/// Shape of values read from a column of `template` under `secondary`.
fn output_shape(
    template: &ColumnTemplate,
    n_rows: usize,
    secondary: Option<&DimSelection>,
) -> Result<Vec<usize>, FrameError> {
    let mut shape = vec![n_rows];
    for (d, &len) in template.spec.secondary_shape.iter().enumerate() {
        let selected = match (d, secondary) {
            (0, Some(sel)) => sel.resolve(len)?.len(),
            _ => len as usize,
        };
        shape.push(selected);
    }
    Ok(shape)
}

/// Reads `rows` of the combined space from the first component holding
/// each row and the column. Components are read unfiltered and decoded;
/// rows no component holds get the column's fill.
pub(crate) fn read_components(
    components: &mut [ZarrDataFrame],
    mapping: &Mapping,
    column: &str,
    template: &ColumnTemplate,
    rows: &[u64],
    secondary: Option<&DimSelection>,
) -> Result<Option<ColumnValues>, FrameError> {
    let holders: Vec<bool> = components.iter().map(|c| c.contains(column)).collect();
    if !holders.iter().any(|h| *h) {
        return Ok(None);
    }
    let mut requests: Vec<Vec<(usize, u64)>> = vec![Vec::new(); components.len()];
    for (out, &row) in rows.iter().enumerate() {
        let holder = mapping
            .to_component(row)
            .into_iter()
            .find(|(c, _)| holders.get(*c).copied().unwrap_or(false));
        if let Some((c, local)) = holder {
            requests[c].push((out, local));
        }
    }
    let shape = output_shape(template, rows.len(), secondary)?;
    let width: usize = shape[1..].iter().product();
    let mut out = ArrayData::filled(template.kind, &template.fill, rows.len() * width);
    for (component, wanted) in components.iter_mut().zip(&requests) {
        if wanted.is_empty() {
            continue;
        }
        let locals: Vec<u64> = wanted.iter().map(|(_, local)| *local).collect();
        let Some(values) = component.read_rows(column, &locals, secondary, false)? else {
            continue;
        };
        if values.row_width() != width {
            return Err(FrameError::type_conflict(format!(
                "component `{}` stores `{column}` with row width {}, expected {width}",
                component.path(),
                values.row_width()
            )));
        }
        let data = values.data.cast(template.kind)?;
        for (i, (out_row, _)) in wanted.iter().enumerate() {
            for k in 0..width {
                out.copy_from(out_row * width + k, &data, i * width + k)?;
            }
        }
    }
    Ok(Some(ColumnValues::with_shape(out, shape)?))
}
