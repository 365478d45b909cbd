// SPDX-License-Identifier: Apache-2.0

//! Byte layout of chunk files. Numbers are little-endian at their
//! declared width, booleans one byte each, strings a JSON array with
//! `null` for missing values. A zstd frame wraps the whole buffer when
//! the array has a compressor.

use ramdata_core::Value;
use ramdata_model::{ArrayData, DType, DataKind};

use super::Compressor;
use crate::error::{StoreError, StoreErrorCode};

fn corrupt(msg: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Validation, msg)
}

/// Parses a zarr fill value into a scalar of `dtype`.
#[must_use]
pub fn parse_fill(dtype: DType, fill: &serde_json::Value) -> Value {
    match (dtype.kind(), fill) {
        (_, serde_json::Value::Null) => Value::Null,
        (DataKind::Float, serde_json::Value::String(s)) => match s.as_str() {
            "NaN" => Value::Float(f64::NAN),
            "Infinity" => Value::Float(f64::INFINITY),
            "-Infinity" => Value::Float(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_or(Value::Null, Value::Float),
        },
        (DataKind::Float, v) => v.as_f64().map_or(Value::Null, Value::Float),
        (DataKind::Int, v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .map_or(Value::Null, Value::Int),
        (DataKind::Bool, v) => Value::Bool(v.as_bool().unwrap_or(false)),
        (DataKind::Str, v) => v.as_str().map_or(Value::Null, Value::from),
    }
}

/// Converts `data` into the in-memory kind of `dtype`, checking that
/// integers fit the declared width.
pub fn coerce_for_dtype(dtype: DType, data: ArrayData) -> Result<ArrayData, StoreError> {
    let data = data.cast(dtype.kind())?;
    if let (Some((lo, hi)), ArrayData::Int(values)) = (dtype.int_bounds(), &data) {
        if let Some(bad) = values.iter().find(|v| **v < lo || **v > hi) {
            return Err(StoreError::new(
                StoreErrorCode::TypeConflict,
                format!("value {bad} does not fit dtype {dtype}"),
            ));
        }
    }
    Ok(data)
}

/// Raw, uncompressed encoding of `data` at `dtype`'s width.
pub fn encode_values(dtype: DType, data: &ArrayData) -> Result<Vec<u8>, StoreError> {
    let mismatch = || {
        StoreError::new(
            StoreErrorCode::TypeConflict,
            format!("cannot encode {} values as {dtype}", data.kind().as_str()),
        )
    };
    let out = match (dtype, data) {
        (DType::Bool, ArrayData::Bool(v)) => v.iter().map(|b| u8::from(*b)).collect(),
        (DType::Int8, ArrayData::Int(v)) => v.iter().map(|x| *x as i8 as u8).collect(),
        (DType::Int16, ArrayData::Int(v)) => v.iter().flat_map(|x| (*x as i16).to_le_bytes()).collect(),
        (DType::Int32, ArrayData::Int(v)) => v.iter().flat_map(|x| (*x as i32).to_le_bytes()).collect(),
        (DType::Int64, ArrayData::Int(v)) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        (DType::Float32, ArrayData::Float(v)) => v.iter().flat_map(|x| (*x as f32).to_le_bytes()).collect(),
        (DType::Float64, ArrayData::Float(v)) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        (DType::Str, ArrayData::Str(v)) => serde_json::to_vec(v)
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?,
        _ => return Err(mismatch()),
    };
    Ok(out)
}

/// Inverse of [`encode_values`].
pub fn decode_values(dtype: DType, bytes: &[u8]) -> Result<ArrayData, StoreError> {
    if let Some(size) = dtype.item_size() {
        if bytes.len() % size != 0 {
            return Err(corrupt(format!(
                "{} bytes is not a whole number of {dtype} values",
                bytes.len()
            )));
        }
    }
    let data = match dtype {
        DType::Bool => ArrayData::Bool(bytes.iter().map(|b| *b != 0).collect()),
        DType::Int8 => ArrayData::Int(bytes.iter().map(|b| i64::from(*b as i8)).collect()),
        DType::Int16 => ArrayData::Int(
            bytes
                .chunks_exact(2)
                .map(|c| i64::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
        ),
        DType::Int32 => ArrayData::Int(
            bytes
                .chunks_exact(4)
                .map(|c| i64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        ),
        DType::Int64 => ArrayData::Int(
            bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DType::Float32 => ArrayData::Float(
            bytes
                .chunks_exact(4)
                .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        ),
        DType::Float64 => ArrayData::Float(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DType::Str => ArrayData::Str(
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("string chunk: {e}")))?,
        ),
    };
    Ok(data)
}

pub fn encode_chunk(
    dtype: DType,
    data: &ArrayData,
    compressor: Option<&Compressor>,
) -> Result<Vec<u8>, StoreError> {
    let raw = encode_values(dtype, data)?;
    match compressor {
        None => Ok(raw),
        Some(c) => zstd::encode_all(raw.as_slice(), c.level)
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, format!("zstd encode: {e}"))),
    }
}

pub fn decode_chunk(
    dtype: DType,
    bytes: &[u8],
    expected_len: usize,
    compressor: Option<&Compressor>,
) -> Result<ArrayData, StoreError> {
    let data = match compressor {
        None => decode_values(dtype, bytes)?,
        Some(_) => {
            let raw = zstd::decode_all(bytes).map_err(|e| corrupt(format!("zstd decode: {e}")))?;
            decode_values(dtype, &raw)?
        }
    };
    if data.len() != expected_len {
        return Err(corrupt(format!(
            "chunk holds {} values, expected {expected_len}",
            data.len()
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::{coerce_for_dtype, decode_chunk, encode_chunk, parse_fill};
    use crate::array::Compressor;
    use ramdata_core::Value;
    use ramdata_model::{ArrayData, DType};

    #[test]
    fn narrow_integers_survive_compression() {
        let data = ArrayData::Int(vec![-1, 0, 127, -128]);
        let c = Compressor::zstd();
        let bytes = encode_chunk(DType::Int8, &data, Some(&c)).expect("encode");
        assert_eq!(decode_chunk(DType::Int8, &bytes, 4, Some(&c)).expect("decode"), data);
    }

    #[test]
    fn out_of_width_values_are_type_conflicts() {
        let err = coerce_for_dtype(DType::Int8, ArrayData::Int(vec![300])).expect_err("too wide");
        assert_eq!(err.code, crate::StoreErrorCode::TypeConflict);
        let widened = coerce_for_dtype(DType::Float32, ArrayData::Int(vec![3])).expect("promote");
        assert_eq!(widened, ArrayData::Float(vec![3.0]));
    }

    #[test]
    fn string_chunks_keep_nulls() {
        let data = ArrayData::Str(vec![Some("a".into()), None]);
        let bytes = encode_chunk(DType::Str, &data, None).expect("encode");
        assert_eq!(bytes, br#"["a",null]"#);
        assert_eq!(decode_chunk(DType::Str, &bytes, 2, None).expect("decode"), data);
    }

    #[test]
    fn nan_fill_parses() {
        match parse_fill(DType::Float64, &serde_json::json!("NaN")) {
            Value::Float(v) => assert!(v.is_nan()),
            other => panic!("unexpected fill {other:?}"),
        }
        assert_eq!(parse_fill(DType::Int32, &serde_json::json!(-1)), Value::Int(-1));
    }
}
