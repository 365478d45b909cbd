// SPDX-License-Identifier: Apache-2.0

use ramdata_core::{ErrorCode, Value};
use ramdata_frame::{FrameOptions, ZarrDataFrame};
use ramdata_model::{ArrayData, CoordinateTranslator, Filter, RowSelector};
use ramdata_store::{BackingStore, Storage};
use tempfile::tempdir;

fn table(storage: &Storage, path: &str, ids: Vec<i64>) -> ZarrDataFrame {
    let mut frame = ZarrDataFrame::create(storage, path, ids.len() as u64, FrameOptions::default()).expect("create");
    frame.set("id", RowSelector::All, ids).expect("ids");
    frame
}

fn labels(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some((*v).to_string())).collect()
}

#[test]
fn stacked_rows_map_to_their_component() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let first = table(&storage, "a/obs", (0..10).collect());
    let second = table(&storage, "b/obs", (100..115).collect());
    let mut combined =
        ZarrDataFrame::combined_stacked(&storage, "ab/obs", vec![first, second], FrameOptions::default())
            .expect("combined");

    assert_eq!(combined.n_rows_unfiltered(), 25);
    let mapping = combined.mapping().expect("mapping");
    assert_eq!(mapping.to_component(12), vec![(1, 2)]);
    let row = combined.get("id", RowSelector::Indices(vec![12]), None).expect("get").expect("column");
    assert_eq!(row.data, ArrayData::Int(vec![102]));
    let edges = combined.get("id", RowSelector::Slice(9, 11), None).expect("get").expect("column");
    assert_eq!(edges.data, ArrayData::Int(vec![9, 100]));
}

#[test]
fn component_filters_do_not_hide_combined_rows() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut first = table(&storage, "a/obs", vec![1, 2]);
    first.set_filter(Some(Filter::from_bools(&[false, false]))).expect("filter");
    let second = table(&storage, "b/obs", vec![3]);
    let mut combined =
        ZarrDataFrame::combined_stacked(&storage, "ab/obs", vec![first, second], FrameOptions::default())
            .expect("combined");
    let all = combined.get("id", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(all.data, ArrayData::Int(vec![1, 2, 3]));
}

#[test]
fn interleaved_tables_share_rows_by_key() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut first = ZarrDataFrame::create(&storage, "a/var", 3, FrameOptions::default()).expect("create");
    first.set("score", RowSelector::All, vec![0.1f64, 0.2, 0.3]).expect("score");
    let mut second = ZarrDataFrame::create(&storage, "b/var", 2, FrameOptions::default()).expect("create");
    second.set("score", RowSelector::All, vec![9.3f64, 0.4]).expect("score");
    let keys = vec![
        vec!["g1".to_string(), "g2".to_string(), "g3".to_string()],
        vec!["g3".to_string(), "g4".to_string()],
    ];
    let (mut combined, combined_keys) = ZarrDataFrame::combined_interleaved_from_keys(
        &storage,
        "ab/var",
        vec![first, second],
        &keys,
        FrameOptions::default(),
    )
    .expect("combined");
    assert_eq!(combined_keys, vec!["g1", "g2", "g3", "g4"]);
    assert!(combined.attrs().is_interleaved);

    // g3 is read from the first component holding it
    let scores = combined.get("score", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(scores.data, ArrayData::Float(vec![0.1, 0.2, 0.3, 0.4]));

    let components = vec![
        ZarrDataFrame::open(&storage, "a/var", FrameOptions::default()).expect("a"),
        ZarrDataFrame::open(&storage, "b/var", FrameOptions::default()).expect("b"),
    ];
    let reopened = ZarrDataFrame::open_combined(&storage, "ab/var", components, FrameOptions::default())
        .expect("reopen");
    let mapping = reopened.mapping().expect("mapping");
    assert_eq!(mapping.to_component(2), vec![(0, 2), (1, 0)]);
    assert_eq!(mapping.to_combined(1, 1), Some(3));
}

#[test]
fn combined_categories_are_the_ordered_union() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut first = ZarrDataFrame::create(&storage, "a/obs", 2, FrameOptions::default()).expect("create");
    first.set("label", RowSelector::All, labels(&["x", "y"])).expect("label");
    let mut second = ZarrDataFrame::create(&storage, "b/obs", 2, FrameOptions::default()).expect("create");
    second.set("label", RowSelector::All, labels(&["z", "y"])).expect("label");
    let mut combined = ZarrDataFrame::combined_stacked(
        &storage,
        "ab/obs",
        vec![first, second],
        FrameOptions::default().with_integers_as_categories(true),
    )
    .expect("combined");

    assert_eq!(
        combined.get_categories("label").expect("categories"),
        Some(vec!["x".to_string(), "y".to_string(), "z".to_string()])
    );
    let codes = combined.get("label", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(codes.data, ArrayData::Int(vec![0, 1, 2, 1]));
}

#[test]
fn masked_writes_stay_in_the_mask() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let source = table(&storage, "remote/obs", vec![1, 2, 3, 4, 5]);
    let mut mask = ZarrDataFrame::masked(&storage, "local/obs", source, FrameOptions::default()).expect("mask");

    let through = mask.get("id", RowSelector::Slice(1, 3), None).expect("get").expect("column");
    assert_eq!(through.data, ArrayData::Int(vec![2, 3]));
    assert!(!storage.exists("local/obs/id").expect("exists"));

    mask.set("id", RowSelector::Indices(vec![0]), Value::Int(99)).expect("set");
    let all = mask.get("id", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(all.data, ArrayData::Int(vec![99, 2, 3, 4, 5]));
    assert!(mask.get_column_metadata("id").expect("meta").expect("present").flag_materialized);

    let source = mask.source().expect("source");
    let mut source = ZarrDataFrame::open(&storage, source.path(), FrameOptions::default()).expect("open");
    let untouched = source.get("id", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(untouched.data, ArrayData::Int(vec![1, 2, 3, 4, 5]));
}

#[test]
fn lazy_load_copies_only_queried_rows() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut source = ZarrDataFrame::create(&storage, "remote/obs", 4, FrameOptions::default()).expect("create");
    source
        .set("label", RowSelector::All, labels(&["t", "b", "t", "nk"]))
        .expect("label");
    let mut mask = ZarrDataFrame::masked(
        &storage,
        "local/obs",
        source,
        FrameOptions::default().with_lazy_load(true),
    )
    .expect("mask");

    let some = mask.get("label", RowSelector::Indices(vec![3, 1]), None).expect("get").expect("column");
    assert_eq!(some.data, ArrayData::Str(labels(&["nk", "b"])));
    assert!(storage.exists("local/obs/label/.zarray").expect("sink"));
    assert!(storage.exists("local/obs/__availability__/label/.zarray").expect("availability"));
    let partial = mask.get_column_metadata("label").expect("meta").expect("present");
    assert!(!partial.flag_materialized);

    mask.lazy_load(&[0, 2], "label").expect("rest");
    assert!(!storage.exists("local/obs/__availability__/label").expect("availability gone"));
    let done = mask.get_column_metadata("label").expect("meta").expect("present");
    assert!(done.flag_materialized);
    let all = mask.get("label", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(all.data, ArrayData::Str(labels(&["t", "b", "t", "nk"])));
}

#[test]
fn combined_tables_lazy_load_from_components() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let first = table(&storage, "a/obs", vec![7, 8]);
    let second = table(&storage, "b/obs", vec![9]);
    let mut combined = ZarrDataFrame::combined_stacked(
        &storage,
        "ab/obs",
        vec![first, second],
        FrameOptions::default().with_lazy_load(true),
    )
    .expect("combined");
    let tail = combined.get("id", RowSelector::Indices(vec![2]), None).expect("get").expect("column");
    assert_eq!(tail.data, ArrayData::Int(vec![9]));
    assert!(storage.exists("ab/obs/id/.zarray").expect("sink"));
    let all = combined.get("id", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(all.data, ArrayData::Int(vec![7, 8, 9]));
}

#[test]
fn mismatched_components_are_rejected() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let first = table(&storage, "a/obs", vec![1, 2]);
    let keys = vec![vec!["only".to_string()]];
    let err = ZarrDataFrame::combined_interleaved_from_keys(
        &storage,
        "x/obs",
        vec![first],
        &keys,
        FrameOptions::default(),
    )
    .expect_err("length mismatch");
    assert_eq!(err.code(), ErrorCode::Validation);

    let err = ZarrDataFrame::open(&storage, "nowhere", FrameOptions::default()).expect_err("absent");
    assert_eq!(err.code(), ErrorCode::ResourceNotInitialized);
}
