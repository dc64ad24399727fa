//! Error types for segdepth

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ValidationError),

    #[error("Accelerator unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No checkpoint found at {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("Checkpoint {} is unreadable: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("Optimizer state mismatch: {0}")]
    OptimizerState(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// True for the resume failures that degrade to a fresh start.
    pub fn is_recoverable_checkpoint(&self) -> bool {
        matches!(
            self,
            Error::CheckpointNotFound(_) | Error::CheckpointCorrupt { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
