// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use ramdata_model::{ArrayData, ColumnValues, Filter};

/// Whole-column values loaded into memory, one entry per visible row
/// under the filter active at load time.
#[derive(Debug, Default)]
pub(crate) struct ColumnCache {
    columns: HashMap<String, ColumnValues>,
}

impl ColumnCache {
    pub(crate) fn insert(&mut self, column: &str, values: ColumnValues) {
        self.columns.insert(column.to_string(), values);
    }

    pub(crate) fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub(crate) fn remove(&mut self, column: &str) {
        self.columns.remove(column);
    }

    pub(crate) fn clear(&mut self) {
        self.columns.clear();
    }

    pub(crate) fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.keys().cloned().collect();
        names.sort();
        names
    }

    /// Values of unfiltered `rows`, or `None` when any row is outside
    /// the cached set.
    pub(crate) fn get(&self, column: &str, rows: &[u64], filter: Option<&Filter>) -> Option<ColumnValues> {
        let cached = self.columns.get(column)?;
        let width = cached.row_width();
        let n_cached = cached.n_rows() as u64;
        let mut positions = Vec::with_capacity(rows.len() * width);
        for &row in rows {
            let slot = match filter {
                Some(f) if row < f.len() => f.rank(row)?,
                Some(_) => return None,
                None => row,
            };
            if slot >= n_cached {
                return None;
            }
            let start = slot as usize * width;
            positions.extend(start..start + width);
        }
        let data: ArrayData = cached.data.take(&positions);
        let mut shape = cached.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = rows.len();
        }
        ColumnValues::with_shape(data, shape).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::ColumnCache;
    use ramdata_model::{ArrayData, ColumnValues, Filter};

    #[test]
    fn cached_rows_follow_the_filter_rank() {
        let mut cache = ColumnCache::default();
        // visible rows 1, 2 and 4
        let filter = Filter::from_bools(&[false, true, true, false, true]);
        cache.insert("n", ColumnValues::vector(ArrayData::Int(vec![10, 20, 40])));
        let got = cache.get("n", &[4, 1], Some(&filter)).expect("hit");
        assert_eq!(got.data, ArrayData::Int(vec![40, 10]));
        assert!(cache.get("n", &[3], Some(&filter)).is_none());
        assert!(cache.get("other", &[1], Some(&filter)).is_none());
    }
}
