// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use ramdata_core::ErrorCode;
use ramdata_model::ModelError;
use ramdata_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamtxError {
    pub code: ErrorCode,
    pub message: String,
}

impl RamtxError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unsupported, message)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl Display for RamtxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RamtxError {}

impl From<StoreError> for RamtxError {
    fn from(value: StoreError) -> Self {
        Self::new(value.code(), value.message)
    }
}

impl From<ModelError> for RamtxError {
    fn from(value: ModelError) -> Self {
        Self::new(value.code, value.message)
    }
}

#[cfg(test)]
mod tests {
    use super::RamtxError;
    use ramdata_core::ErrorCode;
    use ramdata_store::{StoreError, StoreErrorCode};

    #[test]
    fn missing_arrays_surface_as_not_initialized() {
        let err: RamtxError = StoreError::new(StoreErrorCode::NotInitialized, "no index").into();
        assert_eq!(err.code(), ErrorCode::ResourceNotInitialized);
        assert_eq!(err.to_string(), "resource_not_initialized: no index");
    }
}
