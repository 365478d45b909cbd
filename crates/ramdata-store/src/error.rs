// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use ramdata_core::{ErrorCode, MachineError};
use ramdata_model::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Conflict,
    InvalidName,
    TypeConflict,
    OutOfRange,
    LockUnavailable,
    NotInitialized,
    Network,
    Io,
    CachedOnly,
    Unsupported,
    Internal,
}

pub const STORE_ERROR_CODES: &[StoreErrorCode] = &[
    StoreErrorCode::NotFound,
    StoreErrorCode::Validation,
    StoreErrorCode::Conflict,
    StoreErrorCode::InvalidName,
    StoreErrorCode::TypeConflict,
    StoreErrorCode::OutOfRange,
    StoreErrorCode::LockUnavailable,
    StoreErrorCode::NotInitialized,
    StoreErrorCode::Network,
    StoreErrorCode::Io,
    StoreErrorCode::CachedOnly,
    StoreErrorCode::Unsupported,
    StoreErrorCode::Internal,
];

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Conflict => "conflict",
            Self::InvalidName => "invalid_name",
            Self::TypeConflict => "type_conflict",
            Self::OutOfRange => "coordinate_out_of_range",
            Self::LockUnavailable => "lock_unavailable",
            Self::NotInitialized => "resource_not_initialized",
            Self::Network => "network_error",
            Self::Io => "io_error",
            Self::CachedOnly => "cached_only_mode",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        STORE_ERROR_CODES.iter().copied().find(|c| c.as_str() == value)
    }

    #[must_use]
    pub const fn as_error_code(self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Validation | Self::Conflict => ErrorCode::Validation,
            Self::InvalidName => ErrorCode::InvalidName,
            Self::TypeConflict => ErrorCode::TypeConflict,
            Self::OutOfRange => ErrorCode::CoordinateOutOfRange,
            Self::LockUnavailable => ErrorCode::LockUnavailable,
            Self::NotInitialized => ErrorCode::ResourceNotInitialized,
            Self::Network | Self::Io | Self::CachedOnly => ErrorCode::StorageUnavailable,
            Self::Unsupported => ErrorCode::Unsupported,
            Self::Internal => ErrorCode::Internal,
        }
    }

    const fn from_error_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidName => Self::InvalidName,
            ErrorCode::TypeConflict => Self::TypeConflict,
            ErrorCode::LockUnavailable => Self::LockUnavailable,
            ErrorCode::StorageUnavailable => Self::Io,
            ErrorCode::CoordinateOutOfRange => Self::OutOfRange,
            ErrorCode::ResourceNotInitialized => Self::NotInitialized,
            ErrorCode::NotFound => Self::NotFound,
            ErrorCode::Unsupported => Self::Unsupported,
            ErrorCode::Internal => Self::Internal,
            _ => Self::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn io(err: &std::io::Error, key: &str) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            StoreErrorCode::NotFound
        } else {
            StoreErrorCode::Io
        };
        Self::new(code, format!("{key}: {err}"))
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code.as_error_code()
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == StoreErrorCode::NotFound
    }

    #[must_use]
    pub fn to_machine(&self) -> MachineError {
        MachineError::new(self.code.as_str(), &self.message)
    }

    /// Rebuilds an error received from a worker. Unknown codes become
    /// internal errors that keep the original code in the message.
    #[must_use]
    pub fn from_machine(err: &MachineError) -> Self {
        match StoreErrorCode::parse(&err.code) {
            Some(code) => Self::new(code, err.message.clone()),
            None => Self::new(
                StoreErrorCode::Internal,
                format!("{}: {}", err.code, err.message),
            ),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<ModelError> for StoreError {
    fn from(value: ModelError) -> Self {
        Self::new(StoreErrorCode::from_error_code(value.code), value.message)
    }
}
