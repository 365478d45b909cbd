// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

/// One dimension of the logical matrix. Barcodes are rows, features are
/// columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Barcodes,
    Features,
}

impl Axis {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Barcodes => "barcodes",
            Self::Features => "features",
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Barcodes => Self::Features,
            Self::Features => Self::Barcodes,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "barcodes" | "barcode" | "rows" => Some(Self::Barcodes),
            "features" | "feature" | "cols" => Some(Self::Features),
            _ => None,
        }
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
