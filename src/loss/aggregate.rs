//! Weighted combination of the five training objectives

use super::{CrossEntropy2d, DenseLoss, DepthCriterion, SmoothEdgeLoss};
use crate::data::Batch;
use crate::model::{ModelOutput, OutputGrads};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Which pass the loss is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    /// Forward only; the edge term is left out
    Validate,
}

/// One named component of the combined loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossTerm {
    Coarse,
    Class,
    Depth,
    Segmentation,
    Edge,
}

impl LossTerm {
    pub const ALL: [LossTerm; 5] = [
        LossTerm::Coarse,
        LossTerm::Class,
        LossTerm::Depth,
        LossTerm::Segmentation,
        LossTerm::Edge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LossTerm::Coarse => "coarse",
            LossTerm::Class => "class",
            LossTerm::Depth => "depth",
            LossTerm::Segmentation => "segmentation",
            LossTerm::Edge => "edge",
        }
    }

    pub fn in_phase(&self, phase: Phase) -> bool {
        !(phase == Phase::Validate && *self == LossTerm::Edge)
    }
}

/// Static weights of the combined loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub coarse: f32,
    pub class: f32,
    pub depth: f32,
    pub segmentation: f32,
    pub edge: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            coarse: 0.07,
            class: 0.07,
            depth: 0.1,
            segmentation: 5.0,
            edge: 5.0,
        }
    }
}

impl LossWeights {
    pub fn get(&self, term: LossTerm) -> f32 {
        match term {
            LossTerm::Coarse => self.coarse,
            LossTerm::Class => self.class,
            LossTerm::Depth => self.depth,
            LossTerm::Segmentation => self.segmentation,
            LossTerm::Edge => self.edge,
        }
    }

    /// Weighted sum of the terms that take part in `phase`
    pub fn combine(&self, parts: &LossBreakdown, phase: Phase) -> f32 {
        LossTerm::ALL
            .iter()
            .filter(|t| t.in_phase(phase))
            .map(|&t| self.get(t) * parts.get(t))
            .sum()
    }
}

/// Combined loss of one batch and its components
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    pub total: f32,
    pub coarse: f32,
    pub class: f32,
    pub depth: f32,
    pub segmentation: f32,
    pub edge: f32,
}

impl LossBreakdown {
    pub fn get(&self, term: LossTerm) -> f32 {
        match term {
            LossTerm::Coarse => self.coarse,
            LossTerm::Class => self.class,
            LossTerm::Depth => self.depth,
            LossTerm::Segmentation => self.segmentation,
            LossTerm::Edge => self.edge,
        }
    }
}

/// Computes every term for a batch and combines them
#[derive(Debug, Clone)]
pub struct LossAggregator {
    weights: LossWeights,
    criterion: DepthCriterion,
    segmentation: CrossEntropy2d,
    edge: SmoothEdgeLoss,
}

impl LossAggregator {
    pub fn new(weights: LossWeights, criterion: DepthCriterion) -> Self {
        Self {
            weights,
            criterion,
            segmentation: CrossEntropy2d,
            edge: SmoothEdgeLoss::default(),
        }
    }

    pub fn weights(&self) -> &LossWeights {
        &self.weights
    }

    pub fn criterion(&self) -> DepthCriterion {
        self.criterion
    }

    /// Fill in `total` from the component values
    pub fn combine(&self, mut parts: LossBreakdown, phase: Phase) -> LossBreakdown {
        parts.total = self.weights.combine(&parts, phase);
        parts
    }

    /// Loss of one batch; in [`Phase::Train`] also the gradient of the
    /// combined loss with respect to every model output
    pub fn compute(
        &self,
        output: &ModelOutput,
        batch: &Batch,
        phase: Phase,
    ) -> Result<(LossBreakdown, Option<OutputGrads>)> {
        let target = batch.depth.view();
        let (coarse, g_coarse) = self.criterion.forward(output.coarse_depth.view(), target)?;
        let (class, g_class) = self.criterion.forward(output.depth_class.view(), target)?;
        let (depth, mut g_depth) = self.criterion.forward(output.depth.view(), target)?;
        let (segmentation, g_seg) = self
            .segmentation
            .forward(output.segmentation.view(), batch.segmentation.view())?;

        let mut parts = LossBreakdown {
            total: 0.0,
            coarse,
            class,
            depth,
            segmentation,
            edge: 0.0,
        };

        if phase == Phase::Validate {
            return Ok((self.combine(parts, phase), None));
        }

        let image = SmoothEdgeLoss::image_from_input(batch.input.view())?;
        let (edge, g_edge) = self.edge.forward_with_grad(
            output.depth.view(),
            image.view(),
            batch.segmentation.view(),
        )?;
        parts.edge = edge.total();

        let w = &self.weights;
        g_depth.mapv_inplace(|g| g * w.depth);
        g_depth.scaled_add(w.edge, &g_edge);
        let grads = OutputGrads {
            coarse_depth: g_coarse * w.coarse,
            depth_class: g_class * w.class,
            depth: g_depth,
            segmentation: g_seg * w.segmentation,
        };

        Ok((self.combine(parts, phase), Some(grads)))
    }
}
