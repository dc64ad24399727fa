//! YAML schema definitions for declarative training configuration
//!
//! Every section has defaults, so an empty document is a valid
//! configuration. Tags (model, optimizer, criterion, policy, metrics) stay
//! strings here and are resolved into closed enums by
//! [`validate_config`](super::validate_config).

use crate::loss::LossWeights;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete training specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSpec {
    pub model: ModelSection,
    pub data: DataSection,
    pub optimizer: OptimSpec,
    pub loss: LossSpec,
    pub schedule: ScheduleSpec,
    pub metrics: MetricsSpec,
    pub device: DeviceSpec,
    pub pretrained: PretrainedSpec,
    pub training: TrainingParams,
}

/// Network selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Network tag, e.g. `pixelnet`
    pub name: String,
    pub hidden: usize,
    pub classes: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: "pixelnet".into(),
            hidden: 16,
            classes: 8,
        }
    }
}

/// Dataset sizes and batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub train_samples: usize,
    pub val_samples: usize,
    /// Samples of the validation subset used by evaluate-only runs
    pub val_subset_samples: usize,
    pub batch_size: usize,
    pub val_batch_size: usize,
    pub num_workers: usize,
    pub prefetch: usize,
    pub shuffle: bool,
    pub height: usize,
    pub width: usize,
    /// Farthest depth the scenes contain
    pub scene_depth: f32,
    pub lidar_stride: usize,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            train_samples: 64,
            val_samples: 16,
            val_subset_samples: 8,
            batch_size: 2,
            val_batch_size: 1,
            num_workers: 0,
            prefetch: 2,
            shuffle: true,
            height: 16,
            width: 24,
            scene_depth: 80.0,
            lidar_stride: 3,
        }
    }
}

/// Optimizer specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimSpec {
    /// Optimizer name: "adam" | "sgd"
    pub name: String,
    pub lr: f32,
    pub weight_decay: f32,
    /// Gradient norm clip; `0` disables clipping
    pub clip_grad_norm: f32,
}

impl Default for OptimSpec {
    fn default() -> Self {
        Self {
            name: "adam".into(),
            lr: 1e-3,
            weight_decay: 0.0,
            clip_grad_norm: 0.0,
        }
    }
}

/// Objective configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossSpec {
    /// Depth criterion: "mse" | "mae" | "huber"
    pub criterion: String,
    pub weights: LossWeights,
}

impl Default for LossSpec {
    fn default() -> Self {
        Self {
            criterion: "mse".into(),
            weights: LossWeights::default(),
        }
    }
}

/// Learning rate policy and its knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSpec {
    /// "lambda" | "step" | "plateau" | "none"
    pub policy: String,
    /// Step size for `step`, patience for `plateau`
    pub patience: usize,
    pub gamma: f32,
    pub niter: usize,
    pub niter_decay: usize,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            policy: "plateau".into(),
            patience: 7,
            gamma: 0.5,
            niter: 50,
            niter_decay: 400,
        }
    }
}

/// Evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSpec {
    /// Reported metrics; the first one selects the best checkpoint
    pub names: Vec<String>,
    pub max_depth: f32,
    pub disparity: bool,
    pub normalized: bool,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            names: vec!["rmse".into(), "mae".into()],
            max_depth: 255.0,
            disparity: false,
            normalized: false,
        }
    }
}

/// Placement request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSpec {
    /// Fail unless accelerators are present
    pub accelerator: bool,
    pub ids: Vec<usize>,
    /// Replicate the model across every selected accelerator
    pub replicate: bool,
}

/// Weights loaded into a fresh (not resumed) run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PretrainedSpec {
    /// Backbone-only weights, names relative to the backbone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backbone: Option<PathBuf>,
    /// Full checkpoint or parameter file of an earlier run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,
}

/// Loop control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub epochs: usize,
    /// Progress line every N iterations
    pub print_freq: usize,
    pub seed: u64,
    /// Parent of the per-run directory
    pub save_path: PathBuf,
    /// Restore the best checkpoint, validate once and stop
    pub evaluate: bool,
    /// Never resume from an existing marker
    pub test_mode: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 150,
            print_freq: 50,
            seed: 7,
            save_path: PathBuf::from("./saved"),
            evaluate: false,
            test_mode: false,
        }
    }
}
