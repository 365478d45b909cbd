// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

/// Shared error taxonomy. Every crate error maps onto one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    InvalidName,
    TypeConflict,
    LockUnavailable,
    StorageUnavailable,
    CoordinateOutOfRange,
    ResourceNotInitialized,
    NotFound,
    #[serde(rename = "validation_error")]
    Validation,
    Unsupported,
    #[serde(rename = "internal_error")]
    Internal,
}

pub const ERROR_CODES: &[ErrorCode] = &[
    ErrorCode::InvalidName,
    ErrorCode::TypeConflict,
    ErrorCode::LockUnavailable,
    ErrorCode::StorageUnavailable,
    ErrorCode::CoordinateOutOfRange,
    ErrorCode::ResourceNotInitialized,
    ErrorCode::NotFound,
    ErrorCode::Validation,
    ErrorCode::Unsupported,
    ErrorCode::Internal,
];

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::TypeConflict => "type_conflict",
            Self::LockUnavailable => "lock_unavailable",
            Self::StorageUnavailable => "storage_unavailable",
            Self::CoordinateOutOfRange => "coordinate_out_of_range",
            Self::ResourceNotInitialized => "resource_not_initialized",
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        ERROR_CODES.iter().copied().find(|code| code.as_str() == value)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire form of an error that crossed a process boundary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl MachineError {
    #[must_use]
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::parse(&self.code).unwrap_or(ErrorCode::Internal)
    }
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for MachineError {}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, MachineError, ERROR_CODES};

    #[test]
    fn every_code_parses_back_from_its_name() {
        for code in ERROR_CODES {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(*code));
        }
        assert_eq!(ErrorCode::parse("nope"), None);
    }

    #[test]
    fn unknown_machine_code_degrades_to_internal() {
        let err = MachineError::new("exotic", "boom").with_detail("key", "a/b");
        assert_eq!(err.error_code(), ErrorCode::Internal);
        assert_eq!(err.details.get("key").map(String::as_str), Some("a/b"));
    }
}
