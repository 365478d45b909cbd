// SPDX-License-Identifier: Apache-2.0

use ramdata_core::ErrorCode;

use crate::error::ModelError;
use crate::filter::Filter;

/// Row selection for column reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSelector {
    /// Every row, or every visible row when a filter is active.
    All,
    /// Half-open range `[start, end)`.
    Slice(u64, u64),
    /// Explicit indices, in the order they should be returned.
    Indices(Vec<u64>),
    /// Boolean mask over the unfiltered rows.
    Mask(Filter),
    /// `(row, secondary)` coordinate pairs of a multi-dimensional column.
    Coords(Vec<(u64, u64)>),
}

impl RowSelector {
    /// Unfiltered row indices selected out of `n_rows`. Coordinate
    /// selectors yield their row components.
    pub fn resolve(&self, n_rows: u64) -> Result<Vec<u64>, ModelError> {
        let out_of_range = |i: u64| {
            ModelError::new(
                ErrorCode::CoordinateOutOfRange,
                format!("row {i} outside table of {n_rows} rows"),
            )
        };
        match self {
            Self::All => Ok((0..n_rows).collect()),
            Self::Slice(start, end) => {
                let end = (*end).min(n_rows);
                Ok((*start.min(&end)..end).collect())
            }
            Self::Indices(indices) => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= n_rows) {
                    return Err(out_of_range(bad));
                }
                Ok(indices.clone())
            }
            Self::Mask(mask) => {
                if mask.len() != n_rows {
                    return Err(ModelError::validation(format!(
                        "mask of length {} does not match {n_rows} rows",
                        mask.len()
                    )));
                }
                Ok(mask.indices())
            }
            Self::Coords(coords) => {
                if let Some(&(bad, _)) = coords.iter().find(|(r, _)| *r >= n_rows) {
                    return Err(out_of_range(bad));
                }
                Ok(coords.iter().map(|(r, _)| *r).collect())
            }
        }
    }

    /// Whether the selector covers every row of an `n_rows` table.
    #[must_use]
    pub fn covers_all(&self, n_rows: u64) -> bool {
        match self {
            Self::All => true,
            Self::Slice(start, end) => *start == 0 && *end >= n_rows,
            Self::Mask(mask) => mask.len() == n_rows && mask.is_full(),
            Self::Indices(_) | Self::Coords(_) => false,
        }
    }
}

impl From<Vec<u64>> for RowSelector {
    fn from(value: Vec<u64>) -> Self {
        Self::Indices(value)
    }
}

impl From<std::ops::Range<u64>> for RowSelector {
    fn from(value: std::ops::Range<u64>) -> Self {
        Self::Slice(value.start, value.end)
    }
}

impl From<Filter> for RowSelector {
    fn from(value: Filter) -> Self {
        Self::Mask(value)
    }
}
