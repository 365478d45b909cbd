// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use proptest::prelude::*;
use ramdata_core::{EngineConfig, ErrorCode};
use ramdata_model::{Axis, DType, Filter, Mapping, RamtxMode};
use ramdata_mtx::{DenseWriter, Ramtx, SparseWriter};
use ramdata_store::backends::local::LocalFsStore;
use ramdata_store::{Storage, StoreMetricsCollector};
use tempfile::tempdir;

/// 5 barcodes x 3 features; row `b` holds `(f, 10 * b + f)` for the
/// features `f <= b % 3`.
fn row(b: u64) -> (Vec<u64>, Vec<f64>) {
    let features: Vec<u64> = (0..=b % 3).collect();
    let values = features.iter().map(|f| (10 * b + f) as f64).collect();
    (features, values)
}

fn write_small(storage: &Storage, path: &str) {
    let mut writer =
        SparseWriter::create(storage, path, Axis::Barcodes, 5, 3, DType::Int32, 2).expect("writer");
    for b in 0..5 {
        let (features, values) = row(b);
        writer.append(b, &features, &values).expect("append");
    }
    let attrs = writer.finish().expect("finish");
    assert_eq!(attrs.num_records, 1 + 2 + 3 + 1 + 2);
    assert!(attrs.completed);
}

fn metered(root: &std::path::Path) -> (Storage, Arc<StoreMetricsCollector>) {
    let metrics = Arc::new(StoreMetricsCollector::default());
    let store = LocalFsStore::new(root.to_path_buf()).with_instrumentation(metrics.clone());
    (
        Storage::direct(Arc::new(store), Arc::new(EngineConfig::default())),
        metrics,
    )
}

#[test]
fn filtered_entries_are_dropped() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    write_small(&storage, "layers/raw/sparse_for_querying_barcodes");
    let mut rtx = Ramtx::open(&storage, "layers/raw/sparse_for_querying_barcodes").expect("open");
    assert_eq!(rtx.mode(), RamtxMode::SparseForQueryingBarcodes);
    rtx.set_filter(Axis::Barcodes, Some(Filter::from_bools(&[true, false, true, true, false])))
        .expect("filter");

    let got = rtx.get(&[3, 0, 2]).expect("get");
    assert_eq!(got.entries, vec![0, 2, 3]);
    for (entry, secondary, values) in got.iter() {
        let (features, expected) = row(entry);
        assert_eq!(secondary, features.as_slice());
        assert_eq!(values, expected.as_slice());
    }

    let hidden = rtx.get(&[1, 4]).expect("get");
    assert!(hidden.is_empty());
    assert!(hidden.secondary.is_empty() && hidden.values.is_empty());
}

#[test]
fn secondary_filter_and_out_of_range_entries() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    write_small(&storage, "m");
    let mut rtx = Ramtx::open(&storage, "m").expect("open");
    rtx.set_filter(Axis::Features, Some(Filter::from_bools(&[false, true, true])))
        .expect("filter");
    let got = rtx.get(&[2, 2, 99, 0]).expect("get");
    assert_eq!(got.entries, vec![0, 2]);
    assert!(got.secondary[0].is_empty());
    assert_eq!(got.secondary[1], vec![1, 2]);
    assert_eq!(got.values[1], vec![21.0, 22.0]);

    let err = rtx
        .set_filter(Axis::Features, Some(Filter::all(4)))
        .expect_err("wrong length");
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn sparse_matrices_only_answer_their_sort_axis() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    write_small(&storage, "m");
    let rtx = Ramtx::open(&storage, "m").expect("open");
    let err = rtx.with_query_axis(Axis::Features).expect_err("sorted by barcodes");
    assert_eq!(err.code(), ErrorCode::Unsupported);

    let missing = Ramtx::open(&storage, "nothing").expect_err("absent");
    assert_eq!(missing.code(), ErrorCode::ResourceNotInitialized);
}

#[test]
fn appends_must_ascend() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut writer =
        SparseWriter::create(&storage, "m", Axis::Features, 4, 4, DType::Float32, 8).expect("writer");
    writer.append(2, &[0], &[1.0]).expect("append");
    assert_eq!(writer.append(1, &[0], &[1.0]).expect_err("descending").code(), ErrorCode::Validation);
    assert_eq!(
        writer.append(3, &[9], &[1.0]).expect_err("outside").code(),
        ErrorCode::CoordinateOutOfRange
    );
    // fractions surface when the buffered records are flushed
    let mut int_writer =
        SparseWriter::create(&storage, "i", Axis::Features, 4, 4, DType::Int16, 8).expect("writer");
    int_writer.append(0, &[1], &[0.5]).expect("buffered");
    assert_eq!(int_writer.finish().expect_err("fraction").code(), ErrorCode::TypeConflict);
}

#[test]
fn each_touched_chunk_is_fetched_once() {
    let root = tempdir().expect("tempdir");
    let (storage, metrics) = metered(root.path());
    // 40 entries, 4 records each, chunks of 8 index rows and 8 records
    let mut writer =
        SparseWriter::create(&storage, "m", Axis::Barcodes, 40, 10, DType::Float64, 8).expect("writer");
    for b in 0..40u64 {
        writer.append(b, &[0, 3, 6, 9], &[b as f64; 4]).expect("append");
    }
    writer.finish().expect("finish");
    let rtx = Ramtx::open(&storage, "m").expect("open");

    metrics.reset();
    // entries 0..8 live in index chunk 0 and records chunks 0..4
    let got = rtx.get(&(0..8).collect::<Vec<_>>()).expect("get");
    assert_eq!(got.num_records(), 32);
    assert_eq!(metrics.snapshot().download_count, 1 + 4);

    metrics.reset();
    // entries 1 and 2 share records chunk 0 (records 4..12 span chunks 0 and 1)
    let got = rtx.get(&[1, 2, 17]).expect("get");
    assert_eq!(got.entries, vec![1, 2, 17]);
    // index chunks 0 and 2, records chunks 0, 1 and 8
    assert_eq!(metrics.snapshot().download_count, 2 + 3);
}

#[test]
fn dense_matrices_answer_both_axes() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut writer = DenseWriter::create(&storage, "d", 3, 4, DType::Float32, (2, 2)).expect("writer");
    // barcode b, feature f holds b * 4 + f, except zeros on the diagonal
    let values: Vec<f64> = (0..12u64)
        .map(|i| if i / 4 == i % 4 { 0.0 } else { i as f64 })
        .collect();
    writer.write_block(Axis::Barcodes, &[0, 1, 2], &values).expect("write");
    let attrs = writer.finish().expect("finish");
    assert_eq!(attrs.num_records, 9);

    let rtx = Ramtx::open(&storage, "d").expect("open");
    let by_barcode = rtx.get(&[1]).expect("get");
    assert_eq!(by_barcode.secondary[0], vec![0, 2, 3]);
    assert_eq!(by_barcode.values[0], vec![4.0, 6.0, 7.0]);

    let mut by_feature = rtx.with_query_axis(Axis::Features).expect("dense");
    by_feature
        .set_filter(Axis::Barcodes, Some(Filter::from_bools(&[true, false, true])))
        .expect("filter");
    let got = by_feature.get(&[3, 0]).expect("get");
    assert_eq!(got.entries, vec![0, 3]);
    assert_eq!(got.secondary[0], vec![2]);
    assert_eq!(got.values[0], vec![8.0]);
    assert_eq!(got.secondary[1], vec![0, 2]);
    assert_eq!(got.values[1], vec![3.0, 11.0]);
}

#[test]
fn combined_matrices_translate_both_axes() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    // component 0: 2 barcodes x features [g0, g1]; component 1: 3 barcodes x [g1, g2]
    let mut w0 = SparseWriter::create(&storage, "c0", Axis::Barcodes, 2, 2, DType::Int32, 4).expect("w0");
    w0.append(0, &[0, 1], &[1.0, 2.0]).expect("append");
    w0.append(1, &[1], &[3.0]).expect("append");
    w0.finish().expect("finish");
    let mut w1 = SparseWriter::create(&storage, "c1", Axis::Barcodes, 3, 2, DType::Int32, 4).expect("w1");
    w1.append(0, &[0, 1], &[4.0, 5.0]).expect("append");
    w1.append(2, &[1], &[6.0]).expect("append");
    w1.finish().expect("finish");

    let barcodes = Arc::new(Mapping::stacked(&[2, 3]));
    let keys = vec![
        vec!["g0".to_string(), "g1".to_string()],
        vec!["g1".to_string(), "g2".to_string()],
    ];
    let (features, combined_keys) = Mapping::interleaved_from_keys(&keys).expect("mapping");
    assert_eq!(combined_keys, vec!["g0", "g1", "g2"]);
    let components = vec![
        Some(Ramtx::open(&storage, "c0").expect("open")),
        Some(Ramtx::open(&storage, "c1").expect("open")),
    ];
    let mut rtx = Ramtx::combined(components, barcodes, Arc::new(features), Axis::Barcodes)
        .expect("combined");
    assert_eq!((rtx.len(Axis::Barcodes), rtx.len(Axis::Features)), (5, 3));

    let got = rtx.get(&[0, 2, 4, 9]).expect("get");
    assert_eq!(got.entries, vec![0, 2, 4]);
    assert_eq!(got.secondary, vec![vec![0, 1], vec![1, 2], vec![2]]);
    assert_eq!(got.values, vec![vec![1.0, 2.0], vec![4.0, 5.0], vec![6.0]]);
    assert_eq!(rtx.get_sparse_weights(&[0, 3, 4]).expect("weights"), vec![2, 0, 1]);

    rtx.set_filter(Axis::Features, Some(Filter::from_bools(&[false, true, true])))
        .expect("filter");
    let got = rtx.get(&[0]).expect("get");
    assert_eq!(got.secondary, vec![vec![1]]);

    let mismatched = Ramtx::combined(
        vec![Some(Ramtx::open(&storage, "c0").expect("open")), None],
        Arc::new(Mapping::stacked(&[3, 3])),
        Arc::new(Mapping::stacked(&[2, 2])),
        Axis::Barcodes,
    );
    assert_eq!(mismatched.expect_err("shape").code(), ErrorCode::Validation);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn get_is_sorted_and_idempotent(
        lens in proptest::collection::vec(0usize..5, 12),
        query in proptest::collection::vec(0u64..16, 0..20),
        chunk in 1u64..6,
    ) {
        let root = tempdir().expect("tempdir");
        let storage = Storage::local(root.path()).expect("storage");
        let mut writer =
            SparseWriter::create(&storage, "m", Axis::Barcodes, 12, 6, DType::Float64, chunk).expect("writer");
        for (b, n) in lens.iter().enumerate() {
            let features: Vec<u64> = (0..*n as u64).collect();
            let values: Vec<f64> = features.iter().map(|f| (b as u64 * 100 + f) as f64).collect();
            writer.append(b as u64, &features, &values).expect("append");
        }
        writer.finish().expect("finish");
        let rtx = Ramtx::open(&storage, "m").expect("open");

        let first = rtx.get(&query).expect("get");
        prop_assert!(first.entries.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(first.entries.iter().all(|e| *e < 12 && query.contains(e)));
        for (entry, secondary, values) in first.iter() {
            prop_assert_eq!(secondary.len(), lens[entry as usize]);
            for (s, v) in secondary.iter().zip(values) {
                prop_assert_eq!(*v, (entry * 100 + s) as f64);
            }
        }
        prop_assert_eq!(rtx.get(&first.entries).expect("again"), first);
    }
}
