// SPDX-License-Identifier: Apache-2.0

use proptest::prelude::*;
use ramdata_model::{escape_name, unescape_name, MAX_NAME_COMPONENT_BYTES};

proptest! {
    #[test]
    fn escaping_is_reversible_and_path_safe(name in "\\PC{1,20}") {
        let escaped = escape_name(&name).expect("escape");
        prop_assert!(!escaped.contains('/'));
        prop_assert!(!escaped.contains('.'));
        prop_assert!(escaped.len() <= MAX_NAME_COMPONENT_BYTES);
        prop_assert_eq!(unescape_name(&escaped).expect("unescape"), name);
    }

    #[test]
    fn distinct_names_escape_distinctly(a in "[a-z./%_]{1,12}", b in "[a-z./%_]{1,12}") {
        prop_assume!(a != b);
        prop_assert_ne!(escape_name(&a).expect("a"), escape_name(&b).expect("b"));
    }
}
