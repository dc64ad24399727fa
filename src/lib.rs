//! # segdepth: training orchestration for semantic depth completion
//!
//! segdepth trains multi-task networks that predict coarse depth, a depth
//! class map, refined depth and semantic segmentation from sparse range
//! input plus imagery, and keeps long runs safe to interrupt and resume.
//!
//! ## Architecture
//!
//! - **tensor**: Parameter storage with gradient cells
//! - **optim**: Optimizers (SGD, Adam), gradient clipping, LR schedules
//! - **loss**: Depth criteria, cross entropy, edge-aware smoothness, aggregation
//! - **metrics**: RMSE/MAE and inverse-depth variants on valid pixels
//! - **model**: Network contract, reference network, parameter merging
//! - **data**: Datasets and the seeded, prefetching loader
//! - **device**: Accelerator resolution
//! - **io**: Parameter files (JSON, SafeTensors)
//! - **config**: Declarative YAML configuration and CLI
//! - **train**: Epoch loop, running averages, checkpoints, run log

pub mod config;
pub mod data;
pub mod device;
pub mod io;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod tensor;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use error::{Error, Result};
pub use tensor::Tensor;
