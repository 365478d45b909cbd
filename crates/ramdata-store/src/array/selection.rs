// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::error::{StoreError, StoreErrorCode};

/// Selection along one dimension.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DimSelection {
    All,
    /// Half-open `[start, end)`, clamped to the dimension.
    Range(u64, u64),
    /// Positions in output order; duplicates allowed.
    Indices(Vec<u64>),
    Mask(Vec<bool>),
    /// Concatenation of half-open ranges, in the given order.
    Ranges(Vec<(u64, u64)>),
}

impl DimSelection {
    /// Positions selected out of a dimension of length `len`.
    pub fn resolve(&self, len: u64) -> Result<Vec<u64>, StoreError> {
        let out_of_range = |i: u64| {
            StoreError::new(
                StoreErrorCode::OutOfRange,
                format!("index {i} outside dimension of length {len}"),
            )
        };
        match self {
            Self::All => Ok((0..len).collect()),
            Self::Range(start, end) => {
                let end = (*end).min(len);
                Ok(((*start).min(end)..end).collect())
            }
            Self::Indices(idx) => {
                if let Some(&bad) = idx.iter().find(|&&i| i >= len) {
                    return Err(out_of_range(bad));
                }
                Ok(idx.clone())
            }
            Self::Mask(mask) => {
                if mask.len() as u64 != len {
                    return Err(StoreError::new(
                        StoreErrorCode::Validation,
                        format!("mask of length {} for dimension of length {len}", mask.len()),
                    ));
                }
                Ok(mask
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| **b)
                    .map(|(i, _)| i as u64)
                    .collect())
            }
            Self::Ranges(ranges) => {
                let mut out = Vec::new();
                for &(start, end) in ranges {
                    if end > len {
                        return Err(out_of_range(end - 1));
                    }
                    out.extend(start.min(end)..end);
                }
                Ok(out)
            }
        }
    }
}

/// Orthogonal selection; dimensions beyond the listed ones select all.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Selection {
    pub dims: Vec<DimSelection>,
}

impl Selection {
    #[must_use]
    pub fn all() -> Self {
        Self { dims: Vec::new() }
    }

    #[must_use]
    pub fn new(dims: Vec<DimSelection>) -> Self {
        Self { dims }
    }

    /// Selects along the first dimension only.
    #[must_use]
    pub fn rows(dim: DimSelection) -> Self {
        Self { dims: vec![dim] }
    }

    pub fn resolve(&self, shape: &[u64]) -> Result<Vec<Vec<u64>>, StoreError> {
        if self.dims.len() > shape.len() {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("{} selections for a {}-dimensional array", self.dims.len(), shape.len()),
            ));
        }
        shape
            .iter()
            .enumerate()
            .map(|(d, &len)| self.dims.get(d).unwrap_or(&DimSelection::All).resolve(len))
            .collect()
    }
}

/// Per-dimension positions grouped by chunk: chunk index to
/// `(offset within chunk, output position)` pairs.
pub(crate) type DimPlan = BTreeMap<u64, Vec<(u64, u64)>>;

pub(crate) fn plan_dim(positions: &[u64], chunk: u64) -> DimPlan {
    let mut plan: DimPlan = BTreeMap::new();
    for (out, &p) in positions.iter().enumerate() {
        plan.entry(p / chunk)
            .or_default()
            .push((p % chunk, out as u64));
    }
    plan
}

/// Calls `f` for every element of the cartesian product of `lists`,
/// in C order.
pub(crate) fn for_each_product<T, F>(lists: &[&[T]], mut f: F) -> Result<(), StoreError>
where
    F: FnMut(&[&T]) -> Result<(), StoreError>,
{
    if lists.iter().any(|l| l.is_empty()) {
        return Ok(());
    }
    let mut cursor = vec![0usize; lists.len()];
    let mut current: Vec<&T> = lists.iter().map(|l| &l[0]).collect();
    loop {
        f(&current)?;
        let mut d = lists.len();
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            cursor[d] += 1;
            if cursor[d] < lists[d].len() {
                current[d] = &lists[d][cursor[d]];
                break;
            }
            cursor[d] = 0;
            current[d] = &lists[d][0];
        }
    }
}
