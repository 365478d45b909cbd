// SPDX-License-Identifier: Apache-2.0

//! Entry queries. Requested entries are filtered, sorted and grouped
//! so that every chunk a query touches is fetched once.

use std::collections::HashMap;
use std::ops::Range;

use ramdata_core::ErrorCode;
use ramdata_model::{Axis, CoordinateTranslator, Filter, Mapping};
use ramdata_store::{ArrayHandle, DimSelection, Selection};
use tracing::debug;

use crate::batch::EntryGroups;
use crate::error::RamtxError;
use crate::ramtx::{dense_dim, Layout, Ramtx};

/// Records of the queried entries, ascending by entry. Entry `k` holds
/// `secondary[k].len()` records, possibly none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RamtxRecords {
    pub entries: Vec<u64>,
    pub secondary: Vec<Vec<u64>>,
    pub values: Vec<Vec<f64>>,
}

impl RamtxRecords {
    fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
            secondary: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, entry: u64, secondary: Vec<u64>, values: Vec<f64>) {
        self.entries.push(entry);
        self.secondary.push(secondary);
        self.values.push(values);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total records over all entries.
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.secondary.iter().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u64], &[f64])> + '_ {
        self.entries
            .iter()
            .zip(&self.secondary)
            .zip(&self.values)
            .map(|((e, s), v)| (*e, s.as_slice(), v.as_slice()))
    }
}

fn visible(filter: Option<&Filter>, i: u64) -> bool {
    filter.map_or(true, |f| f.get(i))
}

fn numeric(data: &ramdata_model::ArrayData, path: &str) -> Result<Vec<f64>, RamtxError> {
    data.to_f64_vec().ok_or_else(|| {
        RamtxError::new(
            ErrorCode::TypeConflict,
            format!("`{path}` does not hold numeric values"),
        )
    })
}

/// `(start, end)` of each entry's records, clamped to `num_records`.
pub(crate) fn read_spans(index: &ArrayHandle, entries: &[u64], num_records: u64) -> Result<Vec<(u64, u64)>, RamtxError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let block = index.read(&Selection::rows(DimSelection::Indices(entries.to_vec())))?;
    let flat = block.data.as_i64().ok_or_else(|| {
        RamtxError::new(
            ErrorCode::TypeConflict,
            format!("index `{}` is not an integer array", index.path()),
        )
    })?;
    Ok(flat
        .chunks_exact(2)
        .map(|pair| {
            let end = (pair[1].max(0) as u64).min(num_records);
            let start = (pair[0].max(0) as u64).min(end);
            (start, end)
        })
        .collect())
}

/// Splits entry positions, ordered by record start, into batches that
/// never share a records chunk with the next batch.
fn plan_record_batches(order: &[usize], spans: &[(u64, u64)], chunk: u64, budget: u64) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut records = 0u64;
    let mut last_chunk: Option<u64> = None;
    for (k, &i) in order.iter().enumerate() {
        let (s, e) = spans[i];
        let first = s / chunk;
        if k > start && records >= budget && last_chunk.is_some_and(|l| first > l) {
            batches.push(start..k);
            start = k;
            records = 0;
        }
        records += e - s;
        let last = (e - 1) / chunk;
        last_chunk = Some(last_chunk.map_or(last, |l| l.max(last)));
    }
    if start < order.len() {
        batches.push(start..order.len());
    }
    batches
}

/// Groups sorted entries by chunk of the queried dimension and packs
/// whole groups until `width * entries` would pass `budget`.
fn plan_dense_batches(entries: &[u64], chunk: u64, width: u64, budget: u64) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut k = 0usize;
    while k < entries.len() {
        let chunk_id = entries[k] / chunk;
        let mut end = k;
        while end < entries.len() && entries[end] / chunk == chunk_id {
            end += 1;
        }
        let grown = (end - start) as u64;
        if k > start && grown.saturating_mul(width.max(1)) > budget {
            batches.push(start..k);
            start = k;
        }
        k = end;
    }
    if start < entries.len() {
        batches.push(start..entries.len());
    }
    batches
}

impl Ramtx {
    /// Records of `entries` along the queried axis.
    ///
    /// Out-of-range entries and entries hidden by the queried axis'
    /// filter are dropped; duplicates collapse. Records whose secondary
    /// index is hidden by the other axis' filter are skipped.
    pub fn get(&self, entries: &[u64]) -> Result<RamtxRecords, RamtxError> {
        let len = self.len(self.query_axis);
        let filter = self.filter(self.query_axis);
        let mut wanted: Vec<u64> = entries
            .iter()
            .copied()
            .filter(|&e| e < len && visible(filter, e))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        self.get_resolved(&wanted, self.filter(self.query_axis.other()))
    }

    /// `entries` must be sorted, unique and in range.
    pub(crate) fn get_resolved(&self, entries: &[u64], secondary: Option<&Filter>) -> Result<RamtxRecords, RamtxError> {
        match &self.layout {
            Layout::Sparse { index, records } => self.get_sparse(index, records, entries, secondary),
            Layout::Dense { matrix } => self.get_dense(matrix, entries, secondary),
            Layout::Combined {
                components,
                barcodes,
                features,
            } => {
                let (primary, other) = match self.query_axis {
                    Axis::Barcodes => (&**barcodes, &**features),
                    Axis::Features => (&**features, &**barcodes),
                };
                self.get_combined(components, primary, other, entries, secondary)
            }
        }
    }

    fn get_sparse(
        &self,
        index: &ArrayHandle,
        records: &ArrayHandle,
        entries: &[u64],
        secondary: Option<&Filter>,
    ) -> Result<RamtxRecords, RamtxError> {
        let mut per_entry: Vec<(Vec<u64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); entries.len()];
        let num_records = records.shape().first().copied().unwrap_or(0);
        let spans = read_spans(index, entries, num_records)?;
        let secondary_len = self.len(self.query_axis.other());
        let chunk = records.meta().chunks.first().copied().unwrap_or(1).max(1);

        let mut order: Vec<usize> = (0..entries.len()).filter(|&i| spans[i].1 > spans[i].0).collect();
        order.sort_by_key(|&i| spans[i].0);
        let batches = plan_record_batches(&order, &spans, chunk, chunk);
        debug!(
            path = %self.path,
            entries = entries.len(),
            batches = batches.len(),
            "sparse matrix query"
        );
        for batch in batches {
            let members = &order[batch];
            let ranges: Vec<(u64, u64)> = members.iter().map(|&i| spans[i]).collect();
            let block = records.read(&Selection::rows(DimSelection::Ranges(ranges.clone())))?;
            let flat = numeric(&block.data, records.path())?;
            let mut cursor = 0usize;
            for (&i, (s, e)) in members.iter().zip(&ranges) {
                let n = (e - s) as usize;
                let (sec_out, val_out) = &mut per_entry[i];
                for pair in flat[cursor * 2..(cursor + n) * 2].chunks_exact(2) {
                    let raw = pair[0];
                    if !raw.is_finite() || raw < 0.0 {
                        continue;
                    }
                    let sec = raw as u64;
                    if sec < secondary_len && visible(secondary, sec) {
                        sec_out.push(sec);
                        val_out.push(pair[1]);
                    }
                }
                cursor += n;
            }
        }

        let mut out = RamtxRecords::with_capacity(entries.len());
        for (&entry, (sec, val)) in entries.iter().zip(per_entry) {
            out.push(entry, sec, val);
        }
        Ok(out)
    }

    fn get_dense(&self, matrix: &ArrayHandle, entries: &[u64], secondary: Option<&Filter>) -> Result<RamtxRecords, RamtxError> {
        let q = dense_dim(self.query_axis);
        let secondary_len = matrix.shape().get(1 - q).copied().unwrap_or(0);
        let positions: Option<Vec<u64>> = secondary.filter(|f| !f.is_full()).map(Filter::indices);
        let width = positions.as_ref().map_or(secondary_len, |p| p.len() as u64);
        let secondary_sel = positions
            .as_ref()
            .map_or(DimSelection::All, |p| DimSelection::Indices(p.clone()));
        let chunk = matrix.meta().chunks.get(q).copied().unwrap_or(1).max(1);
        let batches = plan_dense_batches(entries, chunk, width, self.dense_batch_values.max(1));
        debug!(
            path = %self.path,
            entries = entries.len(),
            batches = batches.len(),
            width,
            "dense matrix query"
        );

        let mut out = RamtxRecords::with_capacity(entries.len());
        for batch in batches {
            let members = &entries[batch];
            let primary_sel = DimSelection::Indices(members.to_vec());
            let dims = if q == 0 {
                vec![primary_sel, secondary_sel.clone()]
            } else {
                vec![secondary_sel.clone(), primary_sel]
            };
            let block = matrix.read(&Selection::new(dims))?;
            let flat = numeric(&block.data, matrix.path())?;
            let (b, m) = (members.len(), width as usize);
            for (i, &entry) in members.iter().enumerate() {
                let mut sec_out = Vec::new();
                let mut val_out = Vec::new();
                for j in 0..m {
                    let v = if q == 0 { flat[i * m + j] } else { flat[j * b + i] };
                    if v != 0.0 {
                        sec_out.push(positions.as_ref().map_or(j as u64, |p| p[j]));
                        val_out.push(v);
                    }
                }
                out.push(entry, sec_out, val_out);
            }
        }
        Ok(out)
    }

    fn get_combined(
        &self,
        components: &[Option<Ramtx>],
        primary: &Mapping,
        other: &Mapping,
        entries: &[u64],
        secondary: Option<&Filter>,
    ) -> Result<RamtxRecords, RamtxError> {
        let secondary_len = other.combined_len();
        let mut requests: Vec<Vec<(u64, usize)>> = vec![Vec::new(); components.len()];
        for (pos, &entry) in entries.iter().enumerate() {
            for (c, local) in primary.to_component(entry) {
                if let Some(Some(_)) = components.get(c) {
                    requests[c].push((local, pos));
                }
            }
        }

        // (combined secondary, component, value)
        let mut gathered: Vec<Vec<(u64, usize, f64)>> = vec![Vec::new(); entries.len()];
        for (c, mut request) in requests.into_iter().enumerate() {
            let Some(Some(component)) = components.get(c) else {
                continue;
            };
            let local_len = component.len(self.query_axis);
            request.retain(|(local, _)| *local < local_len);
            if request.is_empty() {
                continue;
            }
            request.sort_unstable();
            let positions: HashMap<u64, usize> = request.iter().copied().collect();
            let mut locals: Vec<u64> = request.iter().map(|r| r.0).collect();
            locals.dedup();
            let part = component.get_resolved(&locals, None)?;
            for (local, sec, values) in part.iter() {
                let Some(&pos) = positions.get(&local) else {
                    continue;
                };
                for (&s, &v) in sec.iter().zip(values) {
                    let Some(combined) = other.to_combined(c, s) else {
                        continue;
                    };
                    if combined < secondary_len && visible(secondary, combined) {
                        gathered[pos].push((combined, c, v));
                    }
                }
            }
        }

        let mut out = RamtxRecords::with_capacity(entries.len());
        for (&entry, mut records) in entries.iter().zip(gathered) {
            records.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            // a secondary row held by several components keeps the lowest
            records.dedup_by_key(|r| r.0);
            out.push(
                entry,
                records.iter().map(|r| r.0).collect(),
                records.iter().map(|r| r.2).collect(),
            );
        }
        Ok(out)
    }

    /// Estimated record count of each entry: index spans for sparse
    /// matrices, the visible secondary length for dense ones.
    /// Out-of-range entries weigh zero.
    pub fn get_sparse_weights(&self, entries: &[u64]) -> Result<Vec<u64>, RamtxError> {
        let len = self.len(self.query_axis);
        match &self.layout {
            Layout::Sparse { index, records } => {
                let in_range: Vec<u64> = entries.iter().copied().filter(|&e| e < len).collect();
                let num_records = records.shape().first().copied().unwrap_or(0);
                let spans = read_spans(index, &in_range, num_records)?;
                let mut spans = spans.into_iter();
                Ok(entries
                    .iter()
                    .map(|&e| {
                        if e < len {
                            spans.next().map_or(0, |(s, end)| end - s)
                        } else {
                            0
                        }
                    })
                    .collect())
            }
            Layout::Dense { .. } => {
                let secondary = self.query_axis.other();
                let width = self
                    .filter(secondary)
                    .map_or_else(|| self.len(secondary), Filter::count);
                Ok(entries.iter().map(|&e| if e < len { width } else { 0 }).collect())
            }
            Layout::Combined {
                components,
                barcodes,
                features,
            } => {
                let primary = match self.query_axis {
                    Axis::Barcodes => &**barcodes,
                    Axis::Features => &**features,
                };
                let mut weights = vec![0u64; entries.len()];
                let mut requests: Vec<Vec<(u64, usize)>> = vec![Vec::new(); components.len()];
                for (pos, &entry) in entries.iter().enumerate() {
                    for (c, local) in primary.to_component(entry) {
                        if let Some(list) = requests.get_mut(c) {
                            list.push((local, pos));
                        }
                    }
                }
                for (c, request) in requests.into_iter().enumerate() {
                    let Some(Some(component)) = components.get(c) else {
                        continue;
                    };
                    let locals: Vec<u64> = request.iter().map(|r| r.0).collect();
                    let part = component.get_sparse_weights(&locals)?;
                    for ((_, pos), w) in request.into_iter().zip(part) {
                        weights[pos] = weights[pos].saturating_add(w);
                    }
                }
                Ok(weights)
            }
        }
    }

    /// Sum of entry weights over `filter`, or over the matrix' own
    /// filter of the queried axis when `None`.
    pub fn get_total_num_records(&self, filter: Option<&Filter>) -> Result<u64, RamtxError> {
        let mut groups = EntryGroups::new(self, filter)?;
        let mut total = 0u64;
        while let Some(group) = groups.next_group() {
            for w in self.get_sparse_weights(&group)? {
                total = total.saturating_add(w);
            }
        }
        Ok(total)
    }
}
