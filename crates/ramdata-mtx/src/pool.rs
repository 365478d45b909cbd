// SPDX-License-Identifier: Apache-2.0

//! Batch worker pool. One producer thread feeds batches to N workers,
//! each holding its own fork-safe copy of the matrix; the calling
//! thread consumes results.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel as xchan;
use ramdata_core::ErrorCode;
use tracing::{debug, info_span, warn};

use crate::batch::Batch;
use crate::error::RamtxError;
use crate::ramtx::Ramtx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub num_workers: usize,
    /// Consume results in batch order instead of arrival order.
    pub ordered: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            ordered: false,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    #[must_use]
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }
}

fn panicked(what: &str) -> RamtxError {
    RamtxError::new(ErrorCode::Internal, format!("{what} thread panicked"))
}

impl Ramtx {
    /// Runs `work` over every batch on `options.num_workers` threads and
    /// hands each result to `consume` on the calling thread.
    ///
    /// With `ordered` set, results are buffered until every earlier
    /// batch index has been consumed. The first error from the batch
    /// source, a worker or the consumer stops the pool; it is returned
    /// after all threads have been joined. Returns the number of
    /// batches consumed.
    pub fn run_batches<I, T, W, C>(
        &self,
        batches: I,
        options: PoolOptions,
        work: W,
        mut consume: C,
    ) -> Result<usize, RamtxError>
    where
        I: Iterator<Item = Result<Batch, RamtxError>> + Send,
        T: Send,
        W: Fn(&Ramtx, &Batch) -> Result<T, RamtxError> + Sync,
        C: FnMut(Batch, T) -> Result<(), RamtxError>,
    {
        let num_workers = options.num_workers.max(1);
        let handles = (0..num_workers)
            .map(|_| self.fork_safe())
            .collect::<Result<Vec<_>, _>>()?;
        let (work_tx, work_rx) = xchan::bounded::<Batch>(num_workers * 2);
        let (result_tx, result_rx) = xchan::unbounded::<(Batch, Result<T, RamtxError>)>();
        let cancelled = AtomicBool::new(false);
        let cancelled = &cancelled;
        let work = &work;

        thread::scope(|scope| {
            let producer = scope.spawn(move || -> Result<usize, RamtxError> {
                let mut sent = 0usize;
                for batch in batches {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    if work_tx.send(batch?).is_err() {
                        break;
                    }
                    sent += 1;
                }
                Ok(sent)
            });

            let mut workers = Vec::with_capacity(num_workers);
            for (worker, handle) in handles.into_iter().enumerate() {
                let rx = work_rx.clone();
                let tx = result_tx.clone();
                workers.push(scope.spawn(move || {
                    let _span = info_span!("ramtx_worker", worker).entered();
                    let mut done = 0usize;
                    for batch in rx {
                        if cancelled.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = work(&handle, &batch);
                        let failed = result.is_err();
                        if tx.send((batch, result)).is_err() || failed {
                            break;
                        }
                        done += 1;
                    }
                    debug!(worker, batches = done, "worker finished");
                    handle.terminate();
                }));
            }
            drop(work_rx);
            drop(result_tx);

            let mut first_error: Option<RamtxError> = None;
            let mut pending: BTreeMap<usize, (Batch, T)> = BTreeMap::new();
            let mut next = 0usize;
            let mut consumed = 0usize;
            let fail = |err: RamtxError, first_error: &mut Option<RamtxError>| {
                cancelled.store(true, Ordering::Relaxed);
                first_error.get_or_insert(err);
            };

            for (batch, result) in &result_rx {
                if first_error.is_some() {
                    continue;
                }
                let value = match result {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(batch = batch.index, error = %err, "batch failed");
                        fail(err, &mut first_error);
                        continue;
                    }
                };
                if !options.ordered {
                    match consume(batch, value) {
                        Ok(()) => consumed += 1,
                        Err(err) => fail(err, &mut first_error),
                    }
                    continue;
                }
                pending.insert(batch.index, (batch, value));
                while let Some((batch, value)) = pending.remove(&next) {
                    next += 1;
                    if let Err(err) = consume(batch, value) {
                        fail(err, &mut first_error);
                        break;
                    }
                    consumed += 1;
                }
            }

            for worker in workers {
                if worker.join().is_err() {
                    fail(panicked("worker"), &mut first_error);
                }
            }
            match producer.join() {
                Ok(Ok(sent)) => debug!(sent, consumed, "batch source drained"),
                Ok(Err(err)) => fail(err, &mut first_error),
                Err(_) => fail(panicked("producer"), &mut first_error),
            }
            if let Some(err) = first_error {
                return Err(err);
            }
            // batch indices with gaps leave results behind; consume them in order
            for (_, (batch, value)) in std::mem::take(&mut pending) {
                consume(batch, value)?;
                consumed += 1;
            }
            Ok(consumed)
        })
    }
}
