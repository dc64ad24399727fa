//! Weight file formats

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported parameter file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightFormat {
    /// JSON parameter state (human-readable, larger file size)
    Json,

    /// SafeTensors (efficient binary, interoperable)
    SafeTensors,
}

impl WeightFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &str {
        match self {
            WeightFormat::Json => "json",
            WeightFormat::SafeTensors => "safetensors",
        }
    }

    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(WeightFormat::Json),
            "safetensors" => Some(WeightFormat::SafeTensors),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
    }
}
