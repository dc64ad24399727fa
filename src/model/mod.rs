//! Network contract and the bundled reference network
//!
//! The trainer only sees [`DepthCompletionModel`]: a forward pass from the
//! batched input to five output maps, a backward pass from the gradients of
//! those maps, and a named parameter table.

mod merge;
mod pixel_net;

pub use merge::{merge_parameters, MergeReport, SkipReason, MULTI_DEVICE_PREFIX};
pub use pixel_net::PixelNet;

use crate::io::ParamState;
use crate::{Result, Tensor};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Everything a forward pass produces, each `[N, C, H, W]`
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub coarse_depth: Array4<f32>,
    pub depth_class: Array4<f32>,
    /// Refined depth; channel 0 is scored
    pub depth: Array4<f32>,
    /// Per-class logits
    pub segmentation: Array4<f32>,
    /// Extra network-specific output, unused by the objectives
    pub auxiliary: Option<Array4<f32>>,
}

/// Gradients of the combined loss with respect to each scored output
#[derive(Debug, Clone)]
pub struct OutputGrads {
    pub coarse_depth: Array4<f32>,
    pub depth_class: Array4<f32>,
    pub depth: Array4<f32>,
    pub segmentation: Array4<f32>,
}

/// A trainable depth completion network
pub trait DepthCompletionModel {
    fn kind(&self) -> ModelKind;

    /// Run the network on a `[N, C, H, W]` batch
    fn forward(&mut self, input: ArrayView4<'_, f32>, epoch: usize) -> Result<ModelOutput>;

    /// Accumulate parameter gradients for the last forward pass
    fn backward(&mut self, grads: &OutputGrads) -> Result<()>;

    fn parameters(&self) -> &[Tensor];

    /// Parameters in a stable order; optimizers key their buffers on it
    fn parameters_mut(&mut self) -> &mut [Tensor];

    /// Fully qualified names, parallel to [`DepthCompletionModel::parameters`]
    fn parameter_names(&self) -> &[String];

    /// Name prefix shared by every backbone parameter
    fn backbone_prefix(&self) -> &str {
        "backbone."
    }

    fn set_training(&mut self, training: bool);

    fn state(&self) -> ParamState {
        ParamState::from_named(
            self.kind().to_string(),
            self.parameter_names()
                .iter()
                .map(String::as_str)
                .zip(self.parameters()),
        )
    }

    /// Copy every compatible entry of `source`, names taken relative to `prefix`
    fn load_state(&mut self, source: &ParamState, prefix: &str) -> MergeReport {
        let names = self.parameter_names().to_vec();
        merge_parameters(&names, self.parameters_mut(), source, prefix)
    }
}

/// Closed set of networks selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    PixelNet,
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "pixelnet" => Ok(ModelKind::PixelNet),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::PixelNet => f.write_str("pixelnet"),
        }
    }
}

/// Shape of the network to build
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    pub in_channels: usize,
    pub hidden: usize,
    pub classes: usize,
    pub seed: u64,
}

pub fn build_model(spec: &ModelSpec) -> Box<dyn DepthCompletionModel> {
    match spec.kind {
        ModelKind::PixelNet => Box::new(PixelNet::new(
            spec.in_channels,
            spec.hidden,
            spec.classes,
            spec.seed,
        )),
    }
}
