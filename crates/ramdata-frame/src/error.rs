// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use ramdata_core::ErrorCode;
use ramdata_model::ModelError;
use ramdata_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    pub code: ErrorCode,
    pub message: String,
}

impl FrameError {
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
    pub fn type_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeConflict, message)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for FrameError {}

impl From<StoreError> for FrameError {
    fn from(value: StoreError) -> Self {
        Self::new(value.code(), value.message)
    }
}

impl From<ModelError> for FrameError {
    fn from(value: ModelError) -> Self {
        Self::new(value.code, value.message)
    }
}

#[cfg(test)]
mod tests {
    use super::FrameError;
    use ramdata_core::ErrorCode;
    use ramdata_store::{StoreError, StoreErrorCode};

    #[test]
    fn transport_failures_surface_as_storage_unavailable() {
        let err: FrameError = StoreError::new(StoreErrorCode::Network, "reset").into();
        assert_eq!(err.code(), ErrorCode::StorageUnavailable);
        assert_eq!(err.to_string(), "storage_unavailable: reset");
    }
}
