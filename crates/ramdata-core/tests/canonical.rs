// SPDX-License-Identifier: Apache-2.0

use ramdata_core::{canonical, sha256_hex};
use serde_json::json;

#[test]
fn stable_json_bytes_are_key_order_deterministic() {
    let a = json!({"int_num_rows": 2, "columns": {"b": null, "a": "x"}});
    let b = json!({"columns": {"a": "x", "b": null}, "int_num_rows": 2});
    let ba = canonical::stable_json_bytes(&a).expect("stable json a");
    let bb = canonical::stable_json_bytes(&b).expect("stable json b");
    assert_eq!(ba, bb);
}

#[test]
fn sha256_is_repeatable_for_same_bytes() {
    let bytes = b"ramdata-core-determinism";
    assert_eq!(sha256_hex(bytes), sha256_hex(bytes));
    assert_ne!(sha256_hex(bytes), sha256_hex(b"other"));
}

#[test]
fn attrs_version_changes_when_content_changes() {
    let before = json!({"columns": {"a": null}});
    let after = json!({"columns": {"a": null, "b": null}});
    let h1 = canonical::stable_json_hash_hex(&before).expect("hash before");
    let h2 = canonical::stable_json_hash_hex(&after).expect("hash after");
    assert_ne!(h1, h2);
}
