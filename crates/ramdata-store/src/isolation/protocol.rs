// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON frames exchanged with the store worker. The parent
//! first sends a [`Handshake`]; every later line is one [`Request`]
//! answered by exactly one [`Response`].

use ramdata_core::canonical::{decode_bytes, encode_bytes};
use ramdata_core::MachineError;
use ramdata_model::{ArrayData, DType, DataKind};

use crate::array::codec::{decode_values, encode_values};
use crate::array::selection::Selection;
use crate::array::ArrayMeta;
use crate::backends::StoreSpec;
use crate::error::{StoreError, StoreErrorCode};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Handshake {
    pub protocol_version: u32,
    pub spec: StoreSpec,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Exists { key: String },
    Mkdir { key: String },
    Get { key: String },
    GetRange { key: String, start: u64, end: u64 },
    Put { key: String, b64: String },
    CreateExclusive { key: String },
    Remove { key: String },
    Copy { src: String, dst: String },
    Rename { src: String, dst: String },
    List { key: String },
    ArrayCreate { path: String, meta: ArrayMeta },
    ArrayRead { path: String, meta: ArrayMeta, selection: Selection },
    ArrayReadCoords { path: String, meta: ArrayMeta, coords: Vec<Vec<u64>> },
    ArrayWrite { path: String, meta: ArrayMeta, selection: Selection, data: WirePayload },
    ArrayWriteCoords { path: String, meta: ArrayMeta, coords: Vec<Vec<u64>>, data: WirePayload },
    ArrayResize { path: String, meta: ArrayMeta, shape: Vec<u64> },
    Shutdown,
}

impl Request {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "exists",
            Self::Mkdir { .. } => "mkdir",
            Self::Get { .. } => "get",
            Self::GetRange { .. } => "get_range",
            Self::Put { .. } => "put",
            Self::CreateExclusive { .. } => "create_exclusive",
            Self::Remove { .. } => "remove",
            Self::Copy { .. } => "copy",
            Self::Rename { .. } => "rename",
            Self::List { .. } => "list",
            Self::ArrayCreate { .. } => "array_create",
            Self::ArrayRead { .. } => "array_read",
            Self::ArrayReadCoords { .. } => "array_read_coords",
            Self::ArrayWrite { .. } => "array_write",
            Self::ArrayWriteCoords { .. } => "array_write_coords",
            Self::ArrayResize { .. } => "array_resize",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Unit,
    Bool(bool),
    Bytes(String),
    Names(Vec<String>),
    Meta(ArrayMeta),
    Data(WirePayload),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { payload: Reply },
    Err { error: MachineError },
}

impl Response {
    #[must_use]
    pub fn from_result(result: Result<Reply, StoreError>) -> Self {
        match result {
            Ok(payload) => Self::Ok { payload },
            Err(e) => Self::Err {
                error: e.to_machine(),
            },
        }
    }

    pub fn into_result(self) -> Result<Reply, StoreError> {
        match self {
            Self::Ok { payload } => Ok(payload),
            Self::Err { error } => Err(StoreError::from_machine(&error)),
        }
    }
}

/// Typed values in binary form. JSON numbers cannot carry NaN, so values
/// travel as little-endian bytes of the widest dtype of their kind.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WirePayload {
    pub kind: DataKind,
    pub shape: Vec<usize>,
    pub b64: String,
}

impl WirePayload {
    pub fn encode(data: &ArrayData, shape: Vec<usize>) -> Result<Self, StoreError> {
        let bytes = encode_values(DType::for_kind(data.kind()), data)?;
        Ok(Self {
            kind: data.kind(),
            shape,
            b64: encode_bytes(&bytes),
        })
    }

    pub fn decode(&self) -> Result<ArrayData, StoreError> {
        let bytes = decode_bytes(&self.b64).map_err(|e| {
            StoreError::new(StoreErrorCode::Internal, format!("malformed payload: {e}"))
        })?;
        decode_values(DType::for_kind(self.kind), &bytes)
    }
}

pub fn encode_frame<T: serde::Serialize>(frame: &T) -> Result<String, StoreError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|e| StoreError::new(StoreErrorCode::Internal, format!("frame encode: {e}")))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_frame<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, StoreError> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| StoreError::new(StoreErrorCode::Internal, format!("frame decode: {e}")))
}
