//! Configuration validation
//!
//! [`validate_config`] is the only way to obtain a [`TrainConfig`]: every
//! tag is resolved into its enum and every numeric range is checked here,
//! so the rest of the crate never sees an unknown name.

use super::schema::TrainSpec;
use crate::data::{LoaderOptions, SyntheticConfig, SyntheticDepthDataset};
use crate::device::DeviceRequest;
use crate::loss::{DepthCriterion, LossTerm, LossWeights};
use crate::metrics::{DepthMetrics, MetricKind};
use crate::model::{ModelKind, ModelSpec};
use crate::optim::{LrPolicy, OptimizerKind, ScheduleParams};
use std::path::PathBuf;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown model: {0} (must be one of: pixelnet)")]
    UnknownModel(String),

    #[error("Unknown optimizer: {0} (must be one of: adam, sgd)")]
    UnknownOptimizer(String),

    #[error("Unknown loss criterion: {0} (must be one of: mse, mae, huber)")]
    UnknownCriterion(String),

    #[error("Unknown lr policy: {0} (must be one of: lambda, step, plateau, none)")]
    UnknownPolicy(String),

    #[error("Unknown metric: {0} (must be one of: rmse, mae, irmse, imae)")]
    UnknownMetric(String),

    #[error("At least one metric is required")]
    NoMetrics,

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid gradient clip value: {0} (must be >= 0.0, 0 disables clipping)")]
    InvalidGradClip(f32),

    #[error("Invalid print frequency: {0} (must be > 0)")]
    InvalidPrintFreq(usize),

    #[error("Invalid loss weight for {term}: {value} (must be finite and >= 0.0)")]
    InvalidLossWeight { term: &'static str, value: f32 },

    #[error("Invalid max depth: {0} (must be > 0.0)")]
    InvalidMaxDepth(f32),

    #[error("Invalid gamma: {0} (must be in (0, 1])")]
    InvalidGamma(f32),

    #[error("Invalid class count: {found} (the dataset needs at least {required})")]
    InvalidClasses { found: usize, required: usize },

    #[error("Empty {0} dataset")]
    EmptyDataset(&'static str),

    #[error("Invalid image size: {height}x{width}")]
    InvalidImageSize { height: usize, width: usize },

    #[error("Only one pretrained source may be given (backbone or checkpoint)")]
    ConflictingPretrained,
}

/// Where pretrained weights for a fresh run come from
#[derive(Debug, Clone, PartialEq)]
pub enum PretrainedSource {
    /// Backbone parameters, names relative to the backbone prefix
    Backbone(PathBuf),
    /// Checkpoint record or full parameter file
    Checkpoint(PathBuf),
}

/// Validated, immutable run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub model: ModelSpec,
    pub dataset: SyntheticConfig,
    pub train_samples: usize,
    pub val_samples: usize,
    pub val_subset_samples: usize,
    pub train_loader: LoaderOptions,
    pub val_loader: LoaderOptions,
    pub optimizer: OptimizerKind,
    pub lr: f32,
    pub weight_decay: f32,
    pub clip_grad_norm: f32,
    pub criterion: DepthCriterion,
    pub weights: LossWeights,
    pub policy: LrPolicy,
    pub schedule: ScheduleParams,
    /// Never empty; the first entry drives best-checkpoint selection
    pub metrics: Vec<MetricKind>,
    pub max_depth: f32,
    pub disparity: bool,
    pub normalized: bool,
    pub device: DeviceRequest,
    pub pretrained: Option<PretrainedSource>,
    pub epochs: usize,
    pub print_freq: usize,
    pub seed: u64,
    pub save_path: PathBuf,
    pub evaluate: bool,
    pub test_mode: bool,
}

impl TrainConfig {
    pub fn primary_metric(&self) -> MetricKind {
        self.metrics.first().copied().unwrap_or(MetricKind::Rmse)
    }

    /// Directory name that identifies this hyper-parameter combination
    pub fn run_id(&self) -> String {
        let w = &self.weights;
        format!(
            "{model}_{optim}_{crit}_lr{lr}_bs{bs}_w{c}-{k}-{d}-{s}-{e}_p{p}",
            model = self.model.kind,
            optim = self.optimizer,
            crit = self.criterion,
            lr = self.lr,
            bs = self.train_loader.batch_size,
            c = w.coarse,
            k = w.class,
            d = w.depth,
            s = w.segmentation,
            e = w.edge,
            p = self.schedule.decay_iters,
        )
    }

    /// `save_path/<run id>`
    pub fn run_dir(&self) -> PathBuf {
        self.save_path.join(self.run_id())
    }

    /// A metric evaluator with this run's transform chain
    pub fn depth_metrics(&self) -> DepthMetrics {
        DepthMetrics::new(self.max_depth)
            .with_disparity(self.disparity)
            .with_normalized(self.normalized)
    }
}

/// Validate a training specification and resolve it into a [`TrainConfig`]
pub fn validate_config(spec: &TrainSpec) -> Result<TrainConfig, ValidationError> {
    let kind: ModelKind = spec
        .model
        .name
        .parse()
        .map_err(ValidationError::UnknownModel)?;
    let optimizer: OptimizerKind = spec
        .optimizer
        .name
        .parse()
        .map_err(ValidationError::UnknownOptimizer)?;
    let criterion: DepthCriterion = spec
        .loss
        .criterion
        .parse()
        .map_err(ValidationError::UnknownCriterion)?;
    let policy: LrPolicy = spec
        .schedule
        .policy
        .parse()
        .map_err(ValidationError::UnknownPolicy)?;
    let metrics = spec
        .metrics
        .names
        .iter()
        .map(|n| n.parse::<MetricKind>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(ValidationError::UnknownMetric)?;
    if metrics.is_empty() {
        return Err(ValidationError::NoMetrics);
    }

    let data = &spec.data;
    for batch_size in [data.batch_size, data.val_batch_size] {
        if batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize(batch_size));
        }
    }
    for (name, n) in [
        ("train", data.train_samples),
        ("validation", data.val_samples),
        ("validation subset", data.val_subset_samples),
    ] {
        if n == 0 {
            return Err(ValidationError::EmptyDataset(name));
        }
    }
    if data.height == 0 || data.width == 0 {
        return Err(ValidationError::InvalidImageSize {
            height: data.height,
            width: data.width,
        });
    }
    if !(data.scene_depth > 0.0) {
        return Err(ValidationError::InvalidMaxDepth(data.scene_depth));
    }

    let required = SyntheticDepthDataset::num_classes();
    if spec.model.classes < required {
        return Err(ValidationError::InvalidClasses {
            found: spec.model.classes,
            required,
        });
    }

    if !(spec.optimizer.lr > 0.0) {
        return Err(ValidationError::InvalidLearningRate(spec.optimizer.lr));
    }
    if !(spec.optimizer.clip_grad_norm >= 0.0) {
        return Err(ValidationError::InvalidGradClip(spec.optimizer.clip_grad_norm));
    }

    let weights = spec.loss.weights;
    for term in LossTerm::ALL {
        let value = weights.get(term);
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::InvalidLossWeight {
                term: term.name(),
                value,
            });
        }
    }

    let gamma = spec.schedule.gamma;
    if !(gamma > 0.0 && gamma <= 1.0) {
        return Err(ValidationError::InvalidGamma(gamma));
    }
    if !(spec.metrics.max_depth > 0.0) {
        return Err(ValidationError::InvalidMaxDepth(spec.metrics.max_depth));
    }

    let training = &spec.training;
    if training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(training.epochs));
    }
    if training.print_freq == 0 {
        return Err(ValidationError::InvalidPrintFreq(training.print_freq));
    }

    let pretrained = match (&spec.pretrained.backbone, &spec.pretrained.checkpoint) {
        (Some(_), Some(_)) => return Err(ValidationError::ConflictingPretrained),
        (Some(p), None) => Some(PretrainedSource::Backbone(p.clone())),
        (None, Some(p)) => Some(PretrainedSource::Checkpoint(p.clone())),
        (None, None) => None,
    };

    let train_loader = LoaderOptions {
        batch_size: data.batch_size,
        shuffle: data.shuffle,
        seed: training.seed,
        num_workers: data.num_workers,
        prefetch: data.prefetch.max(1),
    };
    let val_loader = LoaderOptions {
        batch_size: data.val_batch_size,
        shuffle: false,
        ..train_loader.clone()
    };

    Ok(TrainConfig {
        model: ModelSpec {
            kind,
            in_channels: SyntheticDepthDataset::input_channels(),
            hidden: spec.model.hidden.max(1),
            classes: spec.model.classes,
            seed: training.seed,
        },
        dataset: SyntheticConfig {
            height: data.height,
            width: data.width,
            max_depth: data.scene_depth,
            lidar_stride: data.lidar_stride.max(1),
        },
        train_samples: data.train_samples,
        val_samples: data.val_samples,
        val_subset_samples: data.val_subset_samples,
        train_loader,
        val_loader,
        optimizer,
        lr: spec.optimizer.lr,
        weight_decay: spec.optimizer.weight_decay,
        clip_grad_norm: spec.optimizer.clip_grad_norm,
        criterion,
        weights,
        policy,
        schedule: ScheduleParams {
            niter: spec.schedule.niter,
            niter_decay: spec.schedule.niter_decay,
            decay_iters: spec.schedule.patience,
            gamma,
        },
        metrics,
        max_depth: spec.metrics.max_depth,
        disparity: spec.metrics.disparity,
        normalized: spec.metrics.normalized,
        device: DeviceRequest {
            accelerator: spec.device.accelerator,
            ids: spec.device.ids.clone(),
            replicate: spec.device.replicate,
        },
        pretrained,
        epochs: training.epochs,
        print_freq: training.print_freq,
        seed: training.seed,
        save_path: training.save_path.clone(),
        evaluate: training.evaluate,
        test_mode: training.test_mode,
    })
}
