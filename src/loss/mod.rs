//! Training objectives
//!
//! Dense criteria share the [`DenseLoss`] contract: a scalar value plus the
//! gradient with respect to the prediction, computed in one pass.

mod aggregate;
mod depth;
mod edge;
mod segmentation;

pub use aggregate::{LossAggregator, LossBreakdown, LossTerm, LossWeights, Phase};
pub use depth::DepthCriterion;
pub use edge::{EdgeTerms, SmoothEdgeLoss, IMAGE_CHANNEL_OFFSET};
pub use segmentation::CrossEntropy2d;

use crate::Result;
use ndarray::{Array4, ArrayView4};

/// Loss over `[N, C, H, W]` maps
pub trait DenseLoss {
    fn name(&self) -> &str;

    /// Loss value and its gradient with respect to `pred`
    fn forward(
        &self,
        pred: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
    ) -> Result<(f32, Array4<f32>)>;
}
