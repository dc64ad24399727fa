//! Masked regression criteria for depth maps

use super::DenseLoss;
use crate::{Error, Result};
use ndarray::{Array4, ArrayView4};
use std::fmt;
use std::str::FromStr;

/// Pointwise criterion applied to channel 0 of a depth prediction
///
/// Only pixels whose ground truth is strictly positive contribute; sparse
/// range data leaves every other pixel at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthCriterion {
    Mse,
    Mae,
    Huber { delta: f32 },
}

impl DepthCriterion {
    pub const DEFAULT_HUBER_DELTA: f32 = 10.0;

    fn point(&self, err: f32) -> (f32, f32) {
        match *self {
            DepthCriterion::Mse => (err * err, 2.0 * err),
            DepthCriterion::Mae => (err.abs(), sign(err)),
            DepthCriterion::Huber { delta } => {
                if err.abs() <= delta {
                    (0.5 * err * err, err)
                } else {
                    (delta * (err.abs() - 0.5 * delta), delta * sign(err))
                }
            }
        }
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl DenseLoss for DepthCriterion {
    fn name(&self) -> &str {
        match self {
            DepthCriterion::Mse => "mse",
            DepthCriterion::Mae => "mae",
            DepthCriterion::Huber { .. } => "huber",
        }
    }

    fn forward(
        &self,
        pred: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
    ) -> Result<(f32, Array4<f32>)> {
        let (n, c, h, w) = pred.dim();
        let (tn, tc, th, tw) = target.dim();
        if c == 0 || tc == 0 || (n, h, w) != (tn, th, tw) {
            return Err(Error::shape_mismatch(&[n, 1, h, w], &[tn, tc, th, tw]));
        }

        let mut grad = Array4::zeros(pred.raw_dim());
        let mut total = 0.0f64;
        let mut valid = 0usize;
        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let gt = target[[b, 0, y, x]];
                    if gt > 0.0 {
                        let (value, d) = self.point(pred[[b, 0, y, x]] - gt);
                        total += value as f64;
                        grad[[b, 0, y, x]] = d;
                        valid += 1;
                    }
                }
            }
        }

        if valid == 0 {
            return Ok((0.0, grad));
        }
        grad.mapv_inplace(|g| g / valid as f32);
        Ok(((total / valid as f64) as f32, grad))
    }
}

impl FromStr for DepthCriterion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mse" | "l2" => Ok(DepthCriterion::Mse),
            "mae" | "l1" => Ok(DepthCriterion::Mae),
            "huber" => Ok(DepthCriterion::Huber {
                delta: Self::DEFAULT_HUBER_DELTA,
            }),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for DepthCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
