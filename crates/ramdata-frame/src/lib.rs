// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! ZarrDataFrame: a column table over chunked arrays.
//!
//! Each column is an independent chunked array whose first dimension is
//! the row axis. Tables can overlay a read-only source (masked mode) or
//! combine several tables into one row space (stacked or interleaved).
//! Rows that live elsewhere can be copied in on demand with
//! [`ZarrDataFrame::lazy_load`].

mod access;
mod cache;
mod column;
mod combined;
mod error;
mod frame;
mod options;

pub use combined::{load_mapping, persist_mapping, MAPPING_DIR};
pub use error::FrameError;
pub use frame::ZarrDataFrame;
pub use options::{ColumnSpec, FrameInput, FrameOptions};

pub const CRATE_NAME: &str = "ramdata-frame";
