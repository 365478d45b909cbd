// SPDX-License-Identifier: Apache-2.0

use bitvec::prelude::*;

use crate::error::ModelError;

/// Row visibility over the unfiltered length of an axis. A set bit
/// means the row is visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    bits: BitVec<u64, Lsb0>,
}

impl Filter {
    /// All rows visible.
    #[must_use]
    pub fn all(len: u64) -> Self {
        Self {
            bits: bitvec![u64, Lsb0; 1; len as usize],
        }
    }

    /// No rows visible.
    #[must_use]
    pub fn none(len: u64) -> Self {
        Self {
            bits: bitvec![u64, Lsb0; 0; len as usize],
        }
    }

    #[must_use]
    pub fn from_bools(values: &[bool]) -> Self {
        let mut bits = BitVec::<u64, Lsb0>::with_capacity(values.len());
        bits.extend(values.iter().copied());
        Self { bits }
    }

    pub fn from_indices(len: u64, indices: &[u64]) -> Result<Self, ModelError> {
        let mut filter = Self::none(len);
        for &i in indices {
            if i >= len {
                return Err(ModelError::new(
                    ramdata_core::ErrorCode::CoordinateOutOfRange,
                    format!("index {i} outside filter of length {len}"),
                ));
            }
            filter.bits.set(i as usize, true);
        }
        Ok(filter)
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.bits.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of visible rows.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.bits.count_ones() as u64
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.bits.all()
    }

    #[must_use]
    pub fn get(&self, i: u64) -> bool {
        self.bits.get(i as usize).map_or(false, |b| *b)
    }

    pub fn set(&mut self, i: u64, visible: bool) {
        if (i as usize) < self.bits.len() {
            self.bits.set(i as usize, visible);
        }
    }

    /// Visible row indices in ascending order.
    #[must_use]
    pub fn indices(&self) -> Vec<u64> {
        self.bits.iter_ones().map(|i| i as u64).collect()
    }

    pub fn iter_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits.iter_ones().map(|i| i as u64)
    }

    #[must_use]
    pub fn to_bools(&self) -> Vec<bool> {
        self.bits.iter().map(|b| *b).collect()
    }

    /// Position of row `i` among visible rows, `None` when `i` is hidden.
    #[must_use]
    pub fn rank(&self, i: u64) -> Option<u64> {
        if !self.get(i) {
            return None;
        }
        Some(self.bits[..i as usize].count_ones() as u64)
    }

    /// Unfiltered index of the `k`-th visible row.
    #[must_use]
    pub fn select(&self, k: u64) -> Option<u64> {
        self.bits.iter_ones().nth(k as usize).map(|i| i as u64)
    }

    /// Intersection of two filters of equal length.
    pub fn and(&self, other: &Self) -> Result<Self, ModelError> {
        self.check_same_len(other)?;
        let mut bits = self.bits.clone();
        bits &= other.bits.as_bitslice();
        Ok(Self { bits })
    }

    pub fn or(&self, other: &Self) -> Result<Self, ModelError> {
        self.check_same_len(other)?;
        let mut bits = self.bits.clone();
        bits |= other.bits.as_bitslice();
        Ok(Self { bits })
    }

    #[must_use]
    pub fn not(&self) -> Self {
        let mut bits = self.bits.clone();
        bits = !bits;
        Self { bits }
    }

    fn check_same_len(&self, other: &Self) -> Result<(), ModelError> {
        if self.len() != other.len() {
            return Err(ModelError::validation(format!(
                "filter length mismatch: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Filter;

    #[test]
    fn rank_and_select_agree() {
        let f = Filter::from_bools(&[true, false, true, true, false]);
        assert_eq!(f.count(), 3);
        assert_eq!(f.indices(), vec![0, 2, 3]);
        assert_eq!(f.rank(3), Some(2));
        assert_eq!(f.rank(1), None);
        assert_eq!(f.select(1), Some(2));
        assert_eq!(f.select(3), None);
    }

    #[test]
    fn set_operations_require_equal_lengths() {
        let a = Filter::from_bools(&[true, true, false]);
        let b = Filter::from_bools(&[false, true, true]);
        assert_eq!(a.and(&b).expect("and").indices(), vec![1]);
        assert_eq!(a.or(&b).expect("or").count(), 3);
        assert_eq!(a.not().indices(), vec![2]);
        assert!(a.and(&Filter::all(4)).is_err());
    }
}
