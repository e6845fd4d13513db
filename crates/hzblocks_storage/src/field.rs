use crate::{DType, IdxError, Result};

use serde::{Deserialize, Serialize};

/// How the samples of a block are ordered once encoded.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Samples in increasing HZ address.
    HzOrder,
    /// Samples in row-major order of the block lattice (axis 0 fastest).
    RowMajor,
}

impl Default for Layout {
    fn default() -> Self {
        Self::HzOrder
    }
}

impl Layout {
    /// `""`, `"0"` and `"hzorder"` mean HZ order; `"1"` and `"rowmajor"` mean row-major.
    pub fn from_token(token: &str) -> Result<Self> {
        match token.trim() {
            "" | "0" | "hzorder" => Ok(Self::HzOrder),
            "1" | "rowmajor" => Ok(Self::RowMajor),
            other => Err(IdxError::invalid_layout(format!(
                "unknown field layout {:?}",
                other
            ))),
        }
    }

    /// The legacy `format(..)` value.
    pub fn code(&self) -> u8 {
        match self {
            Self::HzOrder => 0,
            Self::RowMajor => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::HzOrder),
            1 => Some(Self::RowMajor),
            _ => None,
        }
    }
}

/// One named, typed variable stored at every sample of a dataset.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
    #[serde(default)]
    pub default_compression: String,
    #[serde(default)]
    pub default_layout: Layout,
    #[serde(default)]
    pub default_value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    /// Position in the owning idx file, assigned when the file is validated.
    #[serde(skip)]
    pub index: usize,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            default_compression: String::new(),
            default_layout: Layout::HzOrder,
            default_value: 0.0,
            filter: String::new(),
            range: None,
            index: 0,
        }
    }

    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.default_compression = compression.into();
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.default_layout = layout;
        self
    }

    pub fn with_default_value(mut self, value: f64) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// A field needs a name without whitespace and a `+` (the legacy field separator).
    pub fn valid(&self) -> bool {
        !self.name.is_empty() && !self.name.contains(char::is_whitespace) && !self.name.contains('+')
    }
}
