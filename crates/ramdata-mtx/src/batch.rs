// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use ramdata_model::Filter;

use crate::error::RamtxError;
use crate::ramtx::Ramtx;

/// A unit of work: ascending entries of the queried axis and their
/// summed weight. `index` numbers batches in generation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub entries: Vec<u64>,
    pub weight: u64,
}

/// Visible entries of the queried axis, one index chunk at a time.
pub(crate) struct EntryGroups {
    filter: Filter,
    cursor: u64,
    group_len: u64,
}

impl EntryGroups {
    pub(crate) fn new(ramtx: &Ramtx, filter: Option<&Filter>) -> Result<Self, RamtxError> {
        let len = ramtx.len(ramtx.query_axis());
        let filter = match filter.or_else(|| ramtx.filter(ramtx.query_axis())) {
            Some(f) if f.len() != len => {
                return Err(RamtxError::validation(format!(
                    "filter of length {} for an axis of length {len}",
                    f.len()
                )))
            }
            Some(f) => f.clone(),
            None => Filter::all(len),
        };
        Ok(Self {
            filter,
            cursor: 0,
            group_len: ramtx.entry_chunk_len(),
        })
    }

    pub(crate) fn next_group(&mut self) -> Option<Vec<u64>> {
        let len = self.filter.len();
        while self.cursor < len {
            let end = ((self.cursor / self.group_len + 1) * self.group_len).min(len);
            let group: Vec<u64> = (self.cursor..end).filter(|&i| self.filter.get(i)).collect();
            self.cursor = end;
            if !group.is_empty() {
                return Some(group);
            }
        }
        None
    }
}

/// Lazily cuts the visible entries into batches of about
/// `target_weight` records. Weights are read one index chunk at a
/// time, so the whole axis is never loaded.
///
/// Without chunk alignment a batch is closed before an entry would push
/// it past the target, so only a single heavy entry can exceed it. With
/// chunk alignment batches close at the first index chunk boundary
/// after reaching the target and never split a chunk.
pub struct BatchGenerator<'a> {
    ramtx: &'a Ramtx,
    groups: EntryGroups,
    target: u64,
    respect_chunks: bool,
    current: Batch,
    ready: VecDeque<Batch>,
    next_index: usize,
    failed: bool,
}

impl BatchGenerator<'_> {
    fn close_current(&mut self) {
        let index = self.next_index;
        self.next_index += 1;
        let batch = std::mem::take(&mut self.current);
        self.ready.push_back(Batch { index, ..batch });
    }

    fn fill(&mut self) -> Result<bool, RamtxError> {
        let Some(group) = self.groups.next_group() else {
            return Ok(false);
        };
        let weights = self.ramtx.get_sparse_weights(&group)?;
        for (entry, weight) in group.into_iter().zip(weights) {
            if !self.respect_chunks
                && !self.current.entries.is_empty()
                && self.current.weight.saturating_add(weight) > self.target
            {
                self.close_current();
            }
            self.current.entries.push(entry);
            self.current.weight = self.current.weight.saturating_add(weight);
        }
        if self.respect_chunks && self.current.weight >= self.target {
            self.close_current();
        }
        Ok(true)
    }
}

impl Iterator for BatchGenerator<'_> {
    type Item = Result<Batch, RamtxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.ready.is_empty() {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        if let Some(batch) = self.ready.pop_front() {
            return Some(Ok(batch));
        }
        if self.current.entries.is_empty() {
            return None;
        }
        self.close_current();
        self.ready.pop_front().map(Ok)
    }
}

impl Ramtx {
    /// Batches over `filter` (or the queried axis' own filter) whose
    /// weights approach `target_weight`.
    pub fn batch_generator(
        &self,
        filter: Option<&Filter>,
        target_weight: u64,
        respect_chunks: bool,
    ) -> Result<BatchGenerator<'_>, RamtxError> {
        Ok(BatchGenerator {
            ramtx: self,
            groups: EntryGroups::new(self, filter)?,
            target: target_weight.max(1),
            respect_chunks,
            current: Batch::default(),
            ready: VecDeque::new(),
            next_index: 0,
            failed: false,
        })
    }
}
