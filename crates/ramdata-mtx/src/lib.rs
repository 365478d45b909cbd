// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Random-access count matrices over the ramdata chunked store.
//!
//! A sparse matrix keeps `index[primary, 2]` spans into
//! `records[n, 2] = (secondary, value)` and is queried along the axis it
//! is sorted by. A dense matrix keeps `matrix[barcodes, features]` and
//! is queried along either axis. Combined matrices translate entries
//! through the same [`ramdata_model::Mapping`] objects the axis
//! metadata uses.

mod batch;
mod error;
mod pool;
mod query;
mod ramtx;
mod writer;

pub use batch::{Batch, BatchGenerator};
pub use error::RamtxError;
pub use pool::PoolOptions;
pub use query::RamtxRecords;
pub use ramtx::{Ramtx, INDEX_ARRAY, MATRIX_ARRAY, RECORDS_ARRAY};
pub use writer::{DenseWriter, SparseWriter};

pub const CRATE_NAME: &str = "ramdata-mtx";
