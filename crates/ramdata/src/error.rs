// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use ramdata_core::ErrorCode;
use ramdata_frame::FrameError;
use ramdata_model::ModelError;
use ramdata_mtx::RamtxError;
use ramdata_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamDataError {
    pub code: ErrorCode,
    pub message: String,
}

impl RamDataError {
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
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotInitialized, message)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl Display for RamDataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RamDataError {}

impl From<StoreError> for RamDataError {
    fn from(value: StoreError) -> Self {
        Self::new(value.code(), value.message)
    }
}

impl From<ModelError> for RamDataError {
    fn from(value: ModelError) -> Self {
        Self::new(value.code, value.message)
    }
}

impl From<FrameError> for RamDataError {
    fn from(value: FrameError) -> Self {
        Self::new(value.code, value.message)
    }
}

impl From<RamtxError> for RamDataError {
    fn from(value: RamtxError) -> Self {
        Self::new(value.code, value.message)
    }
}

#[cfg(test)]
mod tests {
    use super::RamDataError;
    use ramdata_core::ErrorCode;
    use ramdata_mtx::RamtxError;

    #[test]
    fn matrix_errors_keep_their_code() {
        let err: RamDataError = RamtxError::unsupported("sorted by features").into();
        assert_eq!(err.code(), ErrorCode::Unsupported);
        assert_eq!(err.to_string(), "unsupported: sorted by features");
    }
}
