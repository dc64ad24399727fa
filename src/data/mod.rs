//! Dataset abstractions and batching
//!
//! A [`DepthDataset`] yields aligned `(input, sparse depth, segmentation)`
//! samples; the [`DataLoader`] stacks them into batches with a leading `N`
//! axis, shuffling deterministically per epoch.
//!
//! # Example
//!
//! ```rust
//! use segdepth::data::{DepthDataset, SyntheticConfig, SyntheticDepthDataset};
//!
//! let ds = SyntheticDepthDataset::new(8, SyntheticConfig::default());
//! let sample = ds.get(0).unwrap();
//! assert_eq!(sample.input.shape(), &[5, 16, 24]);
//! assert_eq!(sample.depth.shape(), &[1, 16, 24]);
//! ```

mod loader;
mod synthetic;

pub use loader::{BatchIter, DataLoader, LoaderOptions};
pub use synthetic::{SyntheticConfig, SyntheticDepthDataset};

use crate::{Error, Result};
use ndarray::{stack, Array3, Array4, ArrayView3, Axis};

/// One aligned training example, each map `[C, H, W]`
#[derive(Debug, Clone)]
pub struct Sample {
    /// Network input: sparse depth, validity mask, then image channels
    pub input: Array3<f32>,
    /// Sparse depth ground truth; `0` marks a missing measurement
    pub depth: Array3<f32>,
    /// Semantic class id per pixel
    pub segmentation: Array3<f32>,
}

/// Stacked samples, each map `[N, C, H, W]`
#[derive(Debug, Clone)]
pub struct Batch {
    pub input: Array4<f32>,
    pub depth: Array4<f32>,
    pub segmentation: Array4<f32>,
}

impl Batch {
    /// Stack samples along a new leading axis
    pub fn collate(samples: &[Sample]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Dataset("cannot collate an empty batch".into()));
        }
        Ok(Self {
            input: stack_maps(samples.iter().map(|s| s.input.view()))?,
            depth: stack_maps(samples.iter().map(|s| s.depth.view()))?,
            segmentation: stack_maps(samples.iter().map(|s| s.segmentation.view()))?,
        })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.input.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn stack_maps<'a>(views: impl Iterator<Item = ArrayView3<'a, f32>>) -> Result<Array4<f32>> {
    let views: Vec<_> = views.collect();
    stack(Axis(0), &views).map_err(|e| Error::Dataset(format!("ragged batch: {e}")))
}

/// Common interface for depth completion datasets
///
/// Implementations must be `Send + Sync` so loader workers can share them.
pub trait DepthDataset: Send + Sync {
    fn len(&self) -> usize;

    /// Load the sample at position `idx`
    fn get(&self, idx: usize) -> Result<Sample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name for logging
    fn name(&self) -> &str;
}
