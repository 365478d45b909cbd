// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::dtype::DType;

/// Smallest signed integer dtype able to hold codes for `n_categories`
/// values plus the reserved `-1` null code.
#[must_use]
pub fn categorical_code_dtype(n_categories: usize) -> DType {
    let value_bits = if n_categories <= 1 {
        1
    } else {
        usize::BITS - (n_categories - 1).leading_zeros()
    };
    let bits = value_bits + 1;
    if bits <= 8 {
        DType::Int8
    } else if bits <= 16 {
        DType::Int16
    } else if bits <= 32 {
        DType::Int32
    } else {
        DType::Int64
    }
}

/// Result of encoding strings against a category list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalEncoding {
    pub codes: Vec<i64>,
    /// Categories appended while encoding, in order of first appearance.
    pub added: Vec<String>,
}

/// Encodes `values` as codes into `categories`, appending unseen values.
/// Nulls encode as `-1`.
pub fn encode_codes(values: &[Option<String>], categories: &mut Vec<String>) -> CategoricalEncoding {
    let mut lookup: HashMap<String, i64> = categories
        .iter()
        .enumerate()
        .map(|(i, v)| (v.clone(), i as i64))
        .collect();
    let mut added = Vec::new();
    let codes = values
        .iter()
        .map(|v| match v {
            None => -1,
            Some(s) => match lookup.get(s) {
                Some(&code) => code,
                None => {
                    let code = categories.len() as i64;
                    categories.push(s.clone());
                    lookup.insert(s.clone(), code);
                    added.push(s.clone());
                    code
                }
            },
        })
        .collect();
    CategoricalEncoding { codes, added }
}

/// Decodes codes back to values; negative or unknown codes are null.
#[must_use]
pub fn decode_codes(codes: &[i64], categories: &[String]) -> Vec<Option<String>> {
    codes
        .iter()
        .map(|&c| {
            usize::try_from(c)
                .ok()
                .and_then(|i| categories.get(i))
                .cloned()
        })
        .collect()
}
