// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use proptest::prelude::*;
use ramdata_model::{ArrayData, DType};
use ramdata_store::backends::local::LocalFsStore;
use ramdata_store::{
    ArrayMeta, BackingStore, ChunkedArray, DimSelection, Selection, StoreErrorCode,
    StoreMetricsCollector,
};
use tempfile::tempdir;

fn grid(rows: u64, cols: u64) -> Vec<i64> {
    (0..rows * cols).map(|i| i as i64).collect()
}

fn metered_store(root: &std::path::Path) -> (Arc<dyn BackingStore>, Arc<StoreMetricsCollector>) {
    let metrics = Arc::new(StoreMetricsCollector::default());
    let store = LocalFsStore::new(root.to_path_buf()).with_instrumentation(metrics.clone());
    (Arc::new(store), metrics)
}

#[test]
fn orthogonal_reads_follow_c_order() {
    let root = tempdir().expect("tempdir");
    let (store, _) = metered_store(root.path());
    let meta = ArrayMeta::new(vec![10, 4], vec![3, 2], DType::Int32);
    let array = ChunkedArray::create(store, "m/matrix", meta).expect("create");
    array
        .write(&Selection::all(), &ArrayData::Int(grid(10, 4)))
        .expect("write");

    let out = array
        .read(&Selection::new(vec![
            DimSelection::Indices(vec![9, 0, 5]),
            DimSelection::Range(1, 3),
        ]))
        .expect("read");
    assert_eq!(out.shape, vec![3, 2]);
    assert_eq!(out.data, ArrayData::Int(vec![37, 38, 1, 2, 21, 22]));
}

#[test]
fn each_touched_chunk_is_fetched_once() {
    let root = tempdir().expect("tempdir");
    let (store, metrics) = metered_store(root.path());
    let meta = ArrayMeta::new(vec![10, 4], vec![3, 2], DType::Int64).with_compressor(None);
    let array = ChunkedArray::create(store, "dense", meta).expect("create");
    array
        .write(&Selection::all(), &ArrayData::Int(grid(10, 4)))
        .expect("write");
    metrics.reset();

    // rows 0..6 span row-chunks 0 and 1, all columns span two col-chunks
    let out = array
        .read(&Selection::rows(DimSelection::Range(0, 6)))
        .expect("read");
    assert_eq!(out.n_rows(), 6);
    assert_eq!(metrics.snapshot().download_count, 4);

    metrics.reset();
    let out = array
        .read(&Selection::rows(DimSelection::Indices(vec![1, 2, 1, 0])))
        .expect("read duplicates");
    assert_eq!(out.row_width(), 4);
    assert_eq!(metrics.snapshot().download_count, 2);
}

#[test]
fn uncompressed_reads_fetch_only_the_needed_span() {
    let root = tempdir().expect("tempdir");
    let (store, metrics) = metered_store(root.path());
    let meta = ArrayMeta::new(vec![1000], vec![1000], DType::Float64).with_compressor(None);
    let array = ChunkedArray::create(store, "v", meta).expect("create");
    let values: Vec<f64> = (0..1000).map(f64::from).collect();
    array
        .write(&Selection::all(), &ArrayData::Float(values))
        .expect("write");
    metrics.reset();

    let out = array
        .read(&Selection::rows(DimSelection::Range(100, 110)))
        .expect("read");
    assert_eq!(out.data.as_f64().expect("floats")[0], 100.0);
    assert_eq!(metrics.snapshot().bytes_downloaded, 80);
}

#[test]
fn missing_chunks_read_as_fill() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let meta = ArrayMeta::new(vec![6], vec![2], DType::Float32);
    let array = ChunkedArray::create(store, "f", meta).expect("create");
    array
        .write(&Selection::rows(DimSelection::Range(2, 4)), &ArrayData::Float(vec![1.0, 2.0]))
        .expect("write middle chunk");
    let out = array.read(&Selection::all()).expect("read");
    let floats = out.data.as_f64().expect("floats");
    assert!(floats[0].is_nan() && floats[5].is_nan());
    assert_eq!(&floats[2..4], &[1.0, 2.0]);
}

#[test]
fn partial_writes_keep_neighbouring_values() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let meta = ArrayMeta::new(vec![5], vec![4], DType::Int16).with_fill(serde_json::json!(0));
    let array = ChunkedArray::create(store, "i", meta).expect("create");
    array
        .write(&Selection::all(), &ArrayData::Int(vec![1, 2, 3, 4, 5]))
        .expect("write");
    array
        .write_coords(&[vec![1], vec![4]], &ArrayData::Int(vec![20, 50]))
        .expect("points");
    array
        .write(&Selection::rows(DimSelection::Mask(vec![false, false, true, false, false])), &ArrayData::Int(vec![30]))
        .expect("mask");
    let out = array.read(&Selection::all()).expect("read");
    assert_eq!(out.data, ArrayData::Int(vec![1, 20, 30, 4, 50]));
    assert_eq!(
        array.read_coords(&[vec![4], vec![0]]).expect("coords"),
        ArrayData::Int(vec![50, 1])
    );
}

#[test]
fn out_of_range_values_and_coordinates_are_rejected() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let array = ChunkedArray::create(store, "n", ArrayMeta::new(vec![3], vec![3], DType::Int8))
        .expect("create");
    let err = array
        .write(&Selection::all(), &ArrayData::Int(vec![1, 300, 2]))
        .expect_err("overflow");
    assert_eq!(err.code, StoreErrorCode::TypeConflict);
    let err = array.read_coords(&[vec![3]]).expect_err("outside");
    assert_eq!(err.code, StoreErrorCode::OutOfRange);
}

#[test]
fn strings_round_trip_with_nulls() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let array = ChunkedArray::create(store, "s", ArrayMeta::new(vec![3], vec![2], DType::Str))
        .expect("create");
    let values = ArrayData::Str(vec![Some("AAAC".into()), None, Some("ééé".into())]);
    array.write(&Selection::all(), &values).expect("write");
    assert_eq!(array.read(&Selection::all()).expect("read").data, values);
}

#[test]
fn shrinking_removes_chunks_outside_the_new_shape() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let mut array = ChunkedArray::create(
        Arc::clone(&store),
        "r",
        ArrayMeta::new(vec![8], vec![2], DType::Int32),
    )
    .expect("create");
    array
        .write(&Selection::all(), &ArrayData::Int((0..8).collect()))
        .expect("write");
    array.resize(vec![3]).expect("shrink");
    assert!(store.exists("r/1").expect("exists"));
    assert!(!store.exists("r/2").expect("exists"));
    assert!(!store.exists("r/3").expect("exists"));

    array.resize(vec![12]).expect("grow");
    let reopened = ChunkedArray::open(store, "r").expect("open");
    assert_eq!(reopened.shape(), &[12]);
    let tail = reopened
        .read(&Selection::rows(DimSelection::Range(0, 12)))
        .expect("read");
    let mut expected = vec![0, 1, 2];
    expected.extend([0; 9]);
    assert_eq!(tail.data, ArrayData::Int(expected));
}

#[test]
fn regrown_edge_chunks_read_fill_in_both_dimensions() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let mut array = ChunkedArray::create(
        Arc::clone(&store),
        "m",
        ArrayMeta::new(vec![4, 4], vec![3, 3], DType::Float64).with_fill(serde_json::json!(-1.0)),
    )
    .expect("create");
    array
        .write(&Selection::all(), &ArrayData::Float((0..16).map(f64::from).collect()))
        .expect("write");
    array.resize(vec![2, 2]).expect("shrink");
    array.resize(vec![4, 4]).expect("grow");
    let got = array.read(&Selection::all()).expect("read");
    let expected: Vec<f64> = (0..16)
        .map(|i| if i / 4 < 2 && i % 4 < 2 { f64::from(i) } else { -1.0 })
        .collect();
    assert_eq!(got.data, ArrayData::Float(expected));
}

#[test]
fn opening_a_missing_array_reports_not_initialized() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let err = ChunkedArray::open(store, "ghost").err().expect("missing");
    assert_eq!(err.code, StoreErrorCode::NotInitialized);
}

#[test]
fn attributes_default_to_an_empty_object() {
    let root = tempdir().expect("tempdir");
    let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let array = ChunkedArray::create(store, "a", ArrayMeta::new(vec![1], vec![1], DType::Bool))
        .expect("create");
    assert!(array.attrs().expect("attrs").is_empty());
    let mut attrs = serde_json::Map::new();
    attrs.insert("description".into(), serde_json::json!("flags"));
    array.set_attrs(&attrs).expect("set");
    assert_eq!(array.attrs().expect("attrs"), attrs);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_match_an_in_memory_reference(
        rows in 1u64..14,
        cols in 1u64..6,
        row_chunk in 1u64..5,
        col_chunk in 1u64..4,
        compressed in any::<bool>(),
        picks in proptest::collection::vec(0u64..1000, 0..12),
        patch in proptest::collection::vec(0u64..1000, 1..6),
    ) {
        let root = tempdir().expect("tempdir");
        let store: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
        let compressor = if compressed { Some(ramdata_store::Compressor::zstd()) } else { None };
        let meta = ArrayMeta::new(vec![rows, cols], vec![row_chunk, col_chunk], DType::Int64)
            .with_compressor(compressor);
        let array = ChunkedArray::create(store, "p", meta).expect("create");

        let mut reference = grid(rows, cols);
        array.write(&Selection::all(), &ArrayData::Int(reference.clone())).expect("write");

        // overwrite a set of distinct rows in one orthogonal write
        let mut patch_rows: Vec<u64> = patch.iter().map(|p| p % rows).collect();
        patch_rows.sort_unstable();
        patch_rows.dedup();
        let patch_values: Vec<i64> = (0..patch_rows.len() as u64 * cols).map(|i| -(i as i64) - 1).collect();
        array
            .write(&Selection::rows(DimSelection::Indices(patch_rows.clone())), &ArrayData::Int(patch_values.clone()))
            .expect("patch");
        for (k, r) in patch_rows.iter().enumerate() {
            for c in 0..cols {
                reference[(r * cols + c) as usize] = patch_values[k * cols as usize + c as usize];
            }
        }

        let pick_rows: Vec<u64> = picks.iter().map(|p| p % rows).collect();
        let out = array
            .read(&Selection::rows(DimSelection::Indices(pick_rows.clone())))
            .expect("read");
        let expected: Vec<i64> = pick_rows
            .iter()
            .flat_map(|r| reference[(r * cols) as usize..((r + 1) * cols) as usize].to_vec())
            .collect();
        prop_assert_eq!(out.data, ArrayData::Int(expected));
    }
}
