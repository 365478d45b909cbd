// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use ramdata_core::ErrorCode;

use crate::error::ModelError;

/// Component number inside a combined object.
pub type ComponentIndex = usize;

/// Moves coordinates between the combined space and each component's
/// local space. Tables and matrices of one combined axis hold the same
/// translator so both agree on every coordinate.
pub trait CoordinateTranslator: Send + Sync {
    fn num_components(&self) -> usize;

    fn combined_len(&self) -> u64;

    fn component_len(&self, component: ComponentIndex) -> u64;

    /// Every `(component, local)` pair holding combined row `combined`,
    /// ordered by component. Empty when the row is out of range.
    fn to_component(&self, combined: u64) -> Vec<(ComponentIndex, u64)>;

    fn to_combined(&self, component: ComponentIndex, local: u64) -> Option<u64>;

    /// Lowest-numbered component holding the row.
    fn primary_component(&self, combined: u64) -> Option<(ComponentIndex, u64)> {
        self.to_component(combined).into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterleavedComponent {
    /// combined index to local index
    pub forward: HashMap<u64, u64>,
    /// local index to combined index
    pub backward: HashMap<u64, u64>,
    pub len: u64,
}

/// How component coordinate spaces compose into one combined space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    /// Cumulative offsets, `offsets[c]..offsets[c + 1]` belongs to
    /// component `c`. Length is `num_components + 1`.
    Stacked(Vec<u64>),
    Interleaved {
        combined_len: u64,
        components: Vec<InterleavedComponent>,
    },
}

impl Mapping {
    /// Stacked mapping for components of the given lengths.
    #[must_use]
    pub fn stacked(lengths: &[u64]) -> Self {
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut acc = 0u64;
        offsets.push(acc);
        for len in lengths {
            acc += len;
            offsets.push(acc);
        }
        Self::Stacked(offsets)
    }

    /// Interleaved mapping from per-component string keys. Keys shared
    /// between components map to one combined row; combined rows follow
    /// first appearance in component order. Returns the mapping and the
    /// combined key list.
    pub fn interleaved_from_keys(keys: &[Vec<String>]) -> Result<(Self, Vec<String>), ModelError> {
        let mut combined_keys: Vec<String> = Vec::new();
        let mut position: HashMap<&str, u64> = HashMap::new();
        let mut components = Vec::with_capacity(keys.len());
        for (c, component_keys) in keys.iter().enumerate() {
            let mut comp = InterleavedComponent {
                len: component_keys.len() as u64,
                ..InterleavedComponent::default()
            };
            for (local, key) in component_keys.iter().enumerate() {
                let local = local as u64;
                let combined = match position.get(key.as_str()) {
                    Some(&p) => p,
                    None => {
                        let p = combined_keys.len() as u64;
                        position.insert(key.as_str(), p);
                        combined_keys.push(key.clone());
                        p
                    }
                };
                if comp.forward.insert(combined, local).is_some() {
                    return Err(ModelError::validation(format!(
                        "component {c} holds key `{key}` more than once"
                    )));
                }
                comp.backward.insert(local, combined);
            }
            components.push(comp);
        }
        Ok((
            Self::Interleaved {
                combined_len: combined_keys.len() as u64,
                components,
            },
            combined_keys,
        ))
    }

    /// Rebuilds an interleaved mapping from persisted
    /// `(combined_index, component_index)` pairs.
    pub fn interleaved_from_pairs(
        combined_len: u64,
        pairs: &[Vec<(u64, u64)>],
        component_lens: &[u64],
    ) -> Result<Self, ModelError> {
        if pairs.len() != component_lens.len() {
            return Err(ModelError::validation(format!(
                "{} pair lists for {} components",
                pairs.len(),
                component_lens.len()
            )));
        }
        let mut components = Vec::with_capacity(pairs.len());
        for (list, &len) in pairs.iter().zip(component_lens) {
            let mut comp = InterleavedComponent {
                len,
                ..InterleavedComponent::default()
            };
            for &(combined, local) in list {
                if combined >= combined_len || local >= len {
                    return Err(ModelError::new(
                        ErrorCode::CoordinateOutOfRange,
                        format!("mapping pair ({combined}, {local}) out of range"),
                    ));
                }
                comp.forward.insert(combined, local);
                comp.backward.insert(local, combined);
            }
            components.push(comp);
        }
        Ok(Self::Interleaved {
            combined_len,
            components,
        })
    }

    /// Persistable `(combined_index, component_index)` pairs of one
    /// component, sorted by combined index.
    #[must_use]
    pub fn component_pairs(&self, component: ComponentIndex) -> Vec<(u64, u64)> {
        match self {
            Self::Stacked(offsets) => match (offsets.get(component), offsets.get(component + 1)) {
                (Some(&start), Some(&end)) => (start..end).map(|i| (i, i - start)).collect(),
                _ => Vec::new(),
            },
            Self::Interleaved { components, .. } => {
                let mut pairs: Vec<(u64, u64)> = components
                    .get(component)
                    .map(|c| c.forward.iter().map(|(&k, &v)| (k, v)).collect())
                    .unwrap_or_default();
                pairs.sort_unstable();
                pairs
            }
        }
    }

    #[must_use]
    pub const fn is_interleaved(&self) -> bool {
        matches!(self, Self::Interleaved { .. })
    }
}

impl CoordinateTranslator for Mapping {
    fn num_components(&self) -> usize {
        match self {
            Self::Stacked(offsets) => offsets.len().saturating_sub(1),
            Self::Interleaved { components, .. } => components.len(),
        }
    }

    fn combined_len(&self) -> u64 {
        match self {
            Self::Stacked(offsets) => offsets.last().copied().unwrap_or(0),
            Self::Interleaved { combined_len, .. } => *combined_len,
        }
    }

    fn component_len(&self, component: ComponentIndex) -> u64 {
        match self {
            Self::Stacked(offsets) => match (offsets.get(component), offsets.get(component + 1)) {
                (Some(start), Some(end)) => end - start,
                _ => 0,
            },
            Self::Interleaved { components, .. } => components.get(component).map_or(0, |c| c.len),
        }
    }

    fn to_component(&self, combined: u64) -> Vec<(ComponentIndex, u64)> {
        match self {
            Self::Stacked(offsets) => {
                if combined >= self.combined_len() {
                    return Vec::new();
                }
                // first offset strictly greater than `combined`, minus one
                let c = offsets.partition_point(|&o| o <= combined) - 1;
                vec![(c, combined - offsets[c])]
            }
            Self::Interleaved { components, .. } => components
                .iter()
                .enumerate()
                .filter_map(|(c, comp)| comp.forward.get(&combined).map(|&l| (c, l)))
                .collect(),
        }
    }

    fn to_combined(&self, component: ComponentIndex, local: u64) -> Option<u64> {
        match self {
            Self::Stacked(offsets) => {
                let start = *offsets.get(component)?;
                let end = *offsets.get(component + 1)?;
                (start + local < end).then_some(start + local)
            }
            Self::Interleaved { components, .. } => {
                components.get(component)?.backward.get(&local).copied()
            }
        }
    }
}
