//! Declarative YAML configuration
//!
//! # Example
//!
//! ```yaml
//! model:
//!   name: pixelnet
//!   hidden: 16
//!
//! optimizer:
//!   name: adam
//!   lr: 1e-3
//!
//! loss:
//!   criterion: mse
//!   weights: { coarse: 0.07, class: 0.07, depth: 0.1, segmentation: 5, edge: 5 }
//!
//! schedule:
//!   policy: plateau
//!   patience: 7
//!
//! training:
//!   epochs: 150
//!   save_path: ./saved
//! ```

mod cli;
mod schema;
mod train;
mod validate;

pub use cli::{
    apply_overrides, parse_args, Cli, Command, InfoArgs, OutputFormat, TrainArgs, ValidateArgs,
};
pub use schema::{
    DataSection, DeviceSpec, LossSpec, MetricsSpec, ModelSection, OptimSpec, PretrainedSpec,
    ScheduleSpec, TrainSpec, TrainingParams,
};
pub use train::{load_config, train_from_yaml};
pub use validate::{validate_config, PretrainedSource, TrainConfig, ValidationError};
