// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;

use ramdata_frame::{FrameOptions, ZarrDataFrame};
use ramdata_model::{ArrayData, DType, RowSelector};
use ramdata_store::{BackingStore, Storage};
use tempfile::tempdir;

const WRITERS: u64 = 2;

fn locked() -> FrameOptions {
    FrameOptions::default().with_lock(true)
}

#[test]
fn concurrent_categorical_writers_keep_every_category() {
    let root = tempdir().expect("tempdir");
    let per_writer = 70u64;
    let n_rows = WRITERS * per_writer;
    let storage = Storage::local(root.path()).expect("storage");
    ZarrDataFrame::create(&storage, "obs", n_rows, locked()).expect("create");

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let dir: PathBuf = root.path().to_path_buf();
            thread::spawn(move || {
                let storage = Storage::local(&dir).expect("storage");
                let mut obs = ZarrDataFrame::open(&storage, "obs", locked()).expect("open");
                for i in 0..per_writer {
                    let row = i * WRITERS + w;
                    obs.set("label", RowSelector::Indices(vec![row]), vec![Some(format!("w{w}-{i}"))])
                        .expect("set");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer");
    }

    let mut obs = ZarrDataFrame::open(&storage, "obs", FrameOptions::default()).expect("reopen");
    let attrs = obs.get_column_metadata("label").expect("meta").expect("present");
    let categories: BTreeSet<&String> = attrs.categories().iter().collect();
    assert_eq!(categories.len() as u64, n_rows);
    assert_eq!(attrs.categories().len() as u64, n_rows);
    // 140 categories no longer fit int8 codes
    assert_eq!(attrs.dtype, DType::Int16);

    let expected: Vec<Option<String>> = (0..n_rows)
        .map(|row| Some(format!("w{}-{}", row % WRITERS, row / WRITERS)))
        .collect();
    let got = obs.get("label", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(got.data, ArrayData::Str(expected));
}

#[test]
fn concurrent_lazy_loads_finish_materialization() {
    let root = tempdir().expect("tempdir");
    let n_rows = 60u64;
    let storage = Storage::local(root.path()).expect("storage");
    let scores: Vec<i64> = (0..n_rows as i64).map(|i| i * 10).collect();
    let mut source = ZarrDataFrame::create(&storage, "remote/obs", n_rows, FrameOptions::default()).expect("source");
    source.set("score", RowSelector::All, scores.clone()).expect("scores");
    ZarrDataFrame::masked(&storage, "local/obs", source, locked()).expect("mask");

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let dir: PathBuf = root.path().to_path_buf();
            thread::spawn(move || {
                let storage = Storage::local(&dir).expect("storage");
                let source = ZarrDataFrame::open(&storage, "remote/obs", FrameOptions::default()).expect("source");
                let mut mask = ZarrDataFrame::masked(&storage, "local/obs", source, locked().with_lazy_load(true))
                    .expect("mask");
                let half = n_rows / WRITERS;
                let rows: Vec<u64> = (w * half..(w + 1) * half).collect();
                for batch in rows.chunks(5) {
                    mask.lazy_load(batch, "score").expect("lazy load");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("loader");
    }

    assert!(!storage.exists("local/obs/__availability__/score").expect("availability gone"));
    let mut local = ZarrDataFrame::open(&storage, "local/obs", FrameOptions::default()).expect("local");
    let attrs = local.get_column_metadata("score").expect("meta").expect("present");
    assert!(attrs.flag_materialized);
    let got = local.get("score", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(got.data, ArrayData::Int(scores));
}
