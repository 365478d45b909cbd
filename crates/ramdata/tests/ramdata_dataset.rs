// SPDX-License-Identifier: Apache-2.0

use proptest::prelude::*;
use ramdata::{Combine, RamData};
use ramdata_core::ErrorCode;
use ramdata_model::{ArrayData, Axis, CoordinateTranslator, DType, Filter, RamtxMode, RowSelector};
use ramdata_store::Storage;
use tempfile::tempdir;

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// 4 barcodes x 3 features with a barcode-sorted `raw` layer.
fn small(storage: &Storage, path: &str) -> RamData {
    let mut data = RamData::create(storage, path, &ids("cell", 4), &ids("gene", 3)).expect("create");
    let mut writer = data.sparse_writer("raw", Axis::Barcodes, DType::Int32, 2).expect("writer");
    writer.append(0, &[0, 2], &[1.0, 2.0]).expect("append");
    writer.append(2, &[1], &[3.0]).expect("append");
    writer.append(3, &[0, 1, 2], &[4.0, 5.0, 6.0]).expect("append");
    writer.finish().expect("finish");
    data
}

#[test]
fn identifiers_round_trip_through_open() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    small(&storage, "ds");
    let mut data = RamData::open(&storage, "ds").expect("open");
    assert_eq!(data.shape(), (4, 3));
    assert_eq!(data.layers(), vec!["raw".to_string()]);
    assert_eq!(
        data.barcodes().get_str(&[3, 0, 9]).expect("ids"),
        vec![Some("cell3".to_string()), Some("cell0".to_string()), None]
    );
    assert_eq!(
        data.features_mut().get_int_indices(&["gene2", "nope", "gene0"]).expect("lookup"),
        vec![Some(2), None, Some(0)]
    );
    assert_eq!(
        RamData::create(&storage, "ds", &[], &[]).expect_err("exists").code(),
        ErrorCode::Validation
    );
    assert_eq!(
        RamData::open(&storage, "elsewhere").expect_err("absent").code(),
        ErrorCode::ResourceNotInitialized
    );
}

#[test]
fn axis_filters_reach_metadata_and_matrices() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let mut data = small(&storage, "ds");
    data.barcodes_mut()
        .meta_mut()
        .set("n_genes", RowSelector::All, vec![2i64, 0, 1, 3])
        .expect("meta");
    data.barcodes_mut()
        .set_filter(Some(Filter::from_bools(&[true, false, false, true])))
        .expect("filter");
    data.features_mut()
        .set_filter(Some(Filter::from_bools(&[true, true, false])))
        .expect("filter");
    assert_eq!(data.barcodes().n_visible(), 2);
    assert_eq!(data.barcodes().visible_indices(), vec![0, 3]);

    let n_genes = data
        .barcodes_mut()
        .meta_mut()
        .get("n_genes", RowSelector::All, None)
        .expect("get")
        .expect("column");
    assert_eq!(n_genes.data, ArrayData::Int(vec![2, 3]));

    let rtx = data.get_ramtx("raw", Axis::Barcodes, false).expect("ramtx");
    let got = rtx.get(&[0, 1, 2, 3]).expect("get");
    assert_eq!(got.entries, vec![0, 3]);
    assert_eq!(got.secondary, vec![vec![0], vec![0, 1]]);
    assert_eq!(got.values, vec![vec![1.0], vec![4.0, 5.0]]);

    let err = data
        .barcodes_mut()
        .set_filter(Some(Filter::all(5)))
        .expect_err("length");
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn layers_answer_only_the_axes_they_store() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let data = small(&storage, "ds");
    let layer = data.layer("raw").expect("layer");
    assert_eq!(layer.modes().expect("modes"), vec![RamtxMode::SparseForQueryingBarcodes]);
    let err = layer.get_ramtx(Axis::Features, true).expect_err("no feature matrix");
    assert_eq!(err.code(), ErrorCode::ResourceNotInitialized);
    assert_eq!(data.layer("normalized").expect_err("absent").code(), ErrorCode::ResourceNotInitialized);
}

#[test]
fn stacked_rows_map_to_their_component() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let first = RamData::create(&storage, "a", &ids("a", 10), &ids("gene", 2)).expect("a");
    let second = RamData::create(&storage, "b", &ids("b", 15), &ids("gene", 2)).expect("b");
    let combined =
        RamData::combined(&storage, "ab", vec![first, second], Combine::Stacked, Combine::ByIdentifier).expect("combined");
    assert_eq!(combined.shape(), (25, 2));
    let mapping = combined.barcodes().mapping().expect("mapping");
    assert_eq!(mapping.primary_component(12), Some((1, 2)));
    assert_eq!(combined.barcodes().get_str(&[12]).expect("ids"), vec![Some("b2".to_string())]);
    assert_eq!(combined.features().len(), 2);
}

#[test]
fn combined_layers_translate_and_survive_reopen() {
    let root = tempdir().expect("tempdir");
    let storage = Storage::local(root.path()).expect("storage");
    let genes = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut first = RamData::create(&storage, "a", &ids("a", 2), &genes(&["g0", "g1"])).expect("a");
    let mut w = first.sparse_writer("raw", Axis::Barcodes, DType::Int32, 4).expect("writer");
    w.append(0, &[0, 1], &[1.0, 2.0]).expect("append");
    w.append(1, &[1], &[3.0]).expect("append");
    w.finish().expect("finish");
    first.barcodes_mut().meta_mut().set("batch", RowSelector::All, vec![1i64, 1]).expect("meta");

    let mut second = RamData::create(&storage, "b", &ids("b", 3), &genes(&["g1", "g2"])).expect("b");
    let mut w = second.sparse_writer("raw", Axis::Barcodes, DType::Int32, 4).expect("writer");
    w.append(0, &[0, 1], &[4.0, 5.0]).expect("append");
    w.append(2, &[1], &[6.0]).expect("append");
    w.finish().expect("finish");
    second.barcodes_mut().meta_mut().set("batch", RowSelector::All, vec![2i64, 2, 2]).expect("meta");

    let mut combined =
        RamData::combined(&storage, "ab", vec![first, second], Combine::Stacked, Combine::ByIdentifier).expect("combined");
    assert_eq!(
        combined.features().get_str(&[0, 1, 2]).expect("ids"),
        vec![Some("g0".to_string()), Some("g1".to_string()), Some("g2".to_string())]
    );
    let batch = combined
        .barcodes_mut()
        .meta_mut()
        .get("batch", RowSelector::All, None)
        .expect("get")
        .expect("column");
    assert_eq!(batch.data, ArrayData::Int(vec![1, 1, 2, 2, 2]));

    let expect_raw = |data: &RamData| {
        let rtx = data.get_ramtx("raw", Axis::Barcodes, false).expect("ramtx");
        assert!(rtx.is_combined());
        let got = rtx.get(&[0, 2, 4]).expect("get");
        assert_eq!(got.secondary, vec![vec![0, 1], vec![1, 2], vec![2]]);
        assert_eq!(got.values, vec![vec![1.0, 2.0], vec![4.0, 5.0], vec![6.0]]);
    };
    expect_raw(&combined);

    combined
        .features_mut()
        .set_filter(Some(Filter::from_bools(&[true, false, true])))
        .expect("filter");
    let got = combined.get_ramtx("raw", Axis::Barcodes, false).expect("ramtx").get(&[2]).expect("get");
    assert_eq!(got.secondary, vec![vec![2]]);
    drop(combined);

    let reopened = RamData::open(&storage, "ab").expect("reopen");
    assert!(reopened.is_combined());
    assert_eq!(reopened.shape(), (5, 3));
    assert_eq!(reopened.layers(), vec!["raw".to_string()]);
    expect_raw(&reopened);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn identifier_lookup_inverts_get_str(n in 1usize..40, picks in proptest::collection::vec(0u64..60, 0..20)) {
        let root = tempdir().expect("tempdir");
        let storage = Storage::local(root.path()).expect("storage");
        let mut data = RamData::create(&storage, "ds", &ids("c", n), &ids("g", 1)).expect("create");
        let names = data.barcodes().get_str(&picks).expect("ids");
        let known: Vec<String> = names.iter().flatten().cloned().collect();
        let back = data.barcodes_mut().get_int_indices(&known).expect("lookup");
        let expected: Vec<Option<u64>> = picks.iter().copied().filter(|p| *p < n as u64).map(Some).collect();
        prop_assert_eq!(back, expected);
    }
}
