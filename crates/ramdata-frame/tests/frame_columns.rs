// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use proptest::prelude::*;
use ramdata_core::{EngineConfig, ErrorCode, Value};
use ramdata_frame::{ColumnSpec, FrameOptions, ZarrDataFrame};
use ramdata_model::{ArrayData, ColumnValues, DType, Filter, RowSelector};
use ramdata_store::backends::local::LocalFsStore;
use ramdata_store::{BackingStore, DimSelection, Storage, StoreMetricsCollector};
use tempfile::tempdir;

fn strings(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(ToString::to_string)).collect()
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
fn categorical_strings_store_codes() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 4, FrameOptions::default()).expect("create");
    let labels = strings(&[Some("a"), Some("b"), None, Some("a")]);
    obs.set("cell_type", RowSelector::All, labels.clone()).expect("set");

    let attrs = obs.get_column_metadata("cell_type").expect("meta").expect("present");
    assert!(attrs.flag_categorical);
    assert_eq!(attrs.categories(), ["a", "b"]);
    let decoded = obs.get("cell_type", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(decoded.data, ArrayData::Str(labels));

    let mut codes_view = ZarrDataFrame::open(
        &storage,
        "obs",
        FrameOptions::default().with_integers_as_categories(true),
    )
    .expect("open");
    let codes = codes_view.get("cell_type", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(codes.data, ArrayData::Int(vec![0, 1, -1, 0]));
}

#[test]
fn growing_categories_widen_the_code_type() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 300, FrameOptions::default()).expect("create");
    obs.set("barcode", RowSelector::Slice(0, 2), strings(&[Some("x"), Some("y")]))
        .expect("first write");
    assert_eq!(
        obs.get_column_metadata("barcode").expect("meta").expect("present").dtype,
        DType::Int8
    );

    let many: Vec<Option<String>> = (0..300).map(|i| Some(format!("bc{i}"))).collect();
    obs.set("barcode", RowSelector::All, many.clone()).expect("wide write");
    let attrs = obs.get_column_metadata("barcode").expect("meta").expect("present");
    assert_eq!(attrs.dtype, DType::Int16);
    assert_eq!(attrs.categories().len(), 302);
    let back = obs.get("barcode", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(back.data, ArrayData::Str(many));
}

#[test]
fn filtered_reads_reindex_visible_rows() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 5, FrameOptions::default()).expect("create");
    obs.set("n", RowSelector::All, vec![10i64, 11, 12, 13, 14]).expect("set");

    obs.set_filter(Some(Filter::from_bools(&[true, false, true, true, false])))
        .expect("filter");
    assert_eq!(obs.n_rows(), 3);
    assert_eq!(obs.n_rows_unfiltered(), 5);
    assert_eq!(obs.get_integer_indices(None), vec![0, 2, 3]);
    let visible = obs.get("n", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(visible.data, ArrayData::Int(vec![10, 12, 13]));
    // explicit selectors address unfiltered rows
    let hidden = obs.get("n", RowSelector::Indices(vec![1]), None).expect("get").expect("column");
    assert_eq!(hidden.data, ArrayData::Int(vec![11]));

    let err = obs.set_filter(Some(Filter::all(4))).expect_err("wrong length");
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn type_conflicts_are_rejected() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 3, FrameOptions::default()).expect("create");
    obs.set("count", RowSelector::All, vec![1i64, 2, 3]).expect("ints");

    let err = obs.set("count", RowSelector::All, vec![0.5f64, 1.5, 2.5]).expect_err("floats");
    assert_eq!(err.code(), ErrorCode::TypeConflict);
    let err = obs
        .set("count", RowSelector::Slice(0, 1), Value::from("x"))
        .expect_err("string");
    assert_eq!(err.code(), ErrorCode::TypeConflict);

    obs.set("score", RowSelector::All, vec![0.5f64, 1.5, 2.5]).expect("floats");
    obs.set("score", RowSelector::Slice(1, 2), Value::Int(7)).expect("int promotes");
    let score = obs.get("score", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(score.data, ArrayData::Float(vec![0.5, 7.0, 2.5]));
}

#[test]
fn absent_columns_read_as_none_and_delete_quietly() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 2, FrameOptions::default()).expect("create");
    assert!(obs.get("missing", RowSelector::All, None).expect("get").is_none());
    obs.delete("missing").expect("delete absent");

    obs.set("flag", RowSelector::All, ArrayData::Bool(vec![true, false])).expect("set");
    assert_eq!(obs.columns(), vec!["flag".to_string()]);
    obs.delete("flag").expect("delete");
    assert!(!obs.contains("flag"));
    assert!(!storage.exists("obs/flag").expect("exists"));
}

#[test]
fn names_are_escaped_and_length_checked() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 2, FrameOptions::default()).expect("create");
    obs.set("qc/percent.mt", RowSelector::All, vec![1.0f64, 2.0]).expect("set");
    assert!(storage.exists("obs/qc%2Fpercent%2Emt/.zarray").expect("exists"));
    assert_eq!(obs.columns(), vec!["qc/percent.mt".to_string()]);

    let long = "g".repeat(300);
    let err = obs.set(&long, RowSelector::All, vec![1i64, 2]).expect_err("too long");
    assert_eq!(err.code(), ErrorCode::InvalidName);
}

#[test]
fn rename_moves_data_and_description() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 2, FrameOptions::default()).expect("create");
    obs.set("old", RowSelector::All, vec![4i64, 5]).expect("set");
    obs.set_description("old", Some("raw counts".to_string())).expect("describe");
    obs.rename("old", "new").expect("rename");

    assert!(!obs.contains("old"));
    assert_eq!(obs.attrs().columns.get("new"), Some(&Some("raw counts".to_string())));
    let values = obs.get("new", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(values.data, ArrayData::Int(vec![4, 5]));
    let err = obs.rename("old", "other").expect_err("gone");
    assert_eq!(err.code(), ErrorCode::ResourceNotInitialized);

    let reopened = ZarrDataFrame::open(&storage, "obs", FrameOptions::default()).expect("open");
    assert_eq!(reopened.columns(), vec!["new".to_string()]);
}

#[test]
fn secondary_dimensions_and_coordinates() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut obs = ZarrDataFrame::create(&storage, "obs", 3, FrameOptions::default()).expect("create");
    obs.initialize_column(
        "pca",
        &ColumnSpec::new(DType::Float32).with_secondary_shape(vec![2]),
    )
    .expect("init");
    let values = ColumnValues::with_shape(ArrayData::Float(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]), vec![3, 2])
        .expect("shape");
    obs.set("pca", RowSelector::All, values).expect("set");

    let second = obs
        .get("pca", RowSelector::Slice(1, 3), Some(DimSelection::Indices(vec![1])))
        .expect("get")
        .expect("column");
    assert_eq!(second.shape, vec![2, 1]);
    assert_eq!(second.data, ArrayData::Float(vec![3.0, 5.0]));

    let points = obs
        .get("pca", RowSelector::Coords(vec![(2, 0), (0, 1)]), None)
        .expect("get")
        .expect("column");
    assert_eq!(points.data, ArrayData::Float(vec![4.0, 1.0]));

    obs.set("pca", RowSelector::Coords(vec![(1, 1)]), Value::Float(-1.0)).expect("point write");
    let row = obs.get("pca", RowSelector::Indices(vec![1]), None).expect("get").expect("column");
    assert_eq!(row.data, ArrayData::Float(vec![2.0, -1.0]));

    let mut var = ZarrDataFrame::create(&storage, "var", 3, FrameOptions::default()).expect("create");
    var.initialize_column_from("pca_copy", &obs, "pca").expect("from template");
    let copy = var.get_column_metadata("pca_copy").expect("meta").expect("present");
    assert_eq!(copy.dtype, DType::Float32);
}

#[test]
fn loaded_columns_are_served_without_io() {
    let root = tempdir().expect("tempdir");
    let (storage, metrics) = metered(root.path());
    let mut obs = ZarrDataFrame::create(&storage, "obs", 6, FrameOptions::default()).expect("create");
    obs.set("n", RowSelector::All, vec![0i64, 1, 2, 3, 4, 5]).expect("set");
    obs.set_filter(Some(Filter::from_bools(&[true, true, false, true, false, true])))
        .expect("filter");
    obs.load(&["n"]).expect("load");
    assert_eq!(obs.loaded_columns(), vec!["n".to_string()]);

    metrics.reset();
    let cached = obs.get("n", RowSelector::Indices(vec![5, 0]), None).expect("get").expect("column");
    assert_eq!(cached.data, ArrayData::Int(vec![5, 0]));
    assert_eq!(metrics.snapshot().download_count, 0);

    // a partial write drops the cached copy
    obs.set("n", RowSelector::Indices(vec![0]), Value::Int(42)).expect("write");
    assert!(obs.loaded_columns().is_empty());
    let fresh = obs.get("n", RowSelector::All, None).expect("get").expect("column");
    assert_eq!(fresh.data, ArrayData::Int(vec![42, 1, 3, 5]));
}

#[test]
fn locked_writes_leave_no_markers() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let options = FrameOptions::default().with_lock(true);
    let mut obs = ZarrDataFrame::create(&storage, "obs", 2, options).expect("create");
    obs.set("n", RowSelector::All, vec![1i64, 2]).expect("set");
    obs.set_description("n", Some("counts".to_string())).expect("describe");
    assert!(!storage.exists("obs/n.lock").expect("column lock"));
    assert!(!storage.exists("obs.attrs.lock").expect("attrs lock"));
    assert_eq!(obs.attrs().columns.get("n"), Some(&Some("counts".to_string())));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn filter_round_trips(bits in prop::collection::vec(any::<bool>(), 1..64)) {
        let root = tempdir().expect("tempdir");
        let storage = Storage::local(root.path()).expect("storage");
        let n = bits.len() as u64;
        let mut obs = ZarrDataFrame::create(&storage, "obs", n, FrameOptions::default()).expect("create");
        let filter = Filter::from_bools(&bits);
        obs.set_filter(Some(filter.clone())).expect("filter");
        prop_assert_eq!(obs.get_filter(), Some(&filter));
        prop_assert_eq!(obs.n_rows(), bits.iter().filter(|b| **b).count() as u64);
    }

    #[test]
    fn categorical_values_round_trip(
        values in prop::collection::vec(prop::option::of("[a-d]{1,3}"), 1..40)
    ) {
        let root = tempdir().expect("tempdir");
        let storage = Storage::local(root.path()).expect("storage");
        let n = values.len() as u64;
        let mut obs = ZarrDataFrame::create(&storage, "obs", n, FrameOptions::default()).expect("create");
        obs.set("label", RowSelector::All, values.clone()).expect("set");
        let back = obs.get("label", RowSelector::All, None).expect("get").expect("column");
        prop_assert_eq!(back.data, ArrayData::Str(values.clone()));

        let categories = obs.get_categories("label").expect("categories").expect("categorical");
        let mut codes_view = ZarrDataFrame::open(
            &storage,
            "obs",
            FrameOptions::default().with_integers_as_categories(true),
        )
        .expect("open");
        let codes = codes_view.get("label", RowSelector::All, None).expect("get").expect("column");
        let rebuilt: Vec<Option<String>> = codes
            .data
            .as_i64()
            .expect("codes")
            .iter()
            .map(|&c| usize::try_from(c).ok().map(|i| categories[i].clone()))
            .collect();
        prop_assert_eq!(rebuilt, values);
    }
}
