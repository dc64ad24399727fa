//! Depth evaluation metrics
//!
//! Metrics are computed on valid pixels only (`gt > 0`). The valid pixel
//! count of the last batch is exposed so callers can weight running
//! averages by it.

use crate::{Error, Result};
use ndarray::ArrayView4;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of metrics selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Root mean squared depth error
    Rmse,
    /// Mean absolute depth error
    Mae,
    /// RMSE of inverse depth
    Irmse,
    /// MAE of inverse depth
    Imae,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Rmse,
        MetricKind::Mae,
        MetricKind::Irmse,
        MetricKind::Imae,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Rmse => "rmse",
            MetricKind::Mae => "mae",
            MetricKind::Irmse => "irmse",
            MetricKind::Imae => "imae",
        }
    }

    /// Upper-case label used in progress lines
    pub fn label(&self) -> String {
        self.name().to_ascii_uppercase()
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        MetricKind::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or(lower)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowest predicted depth used when inverting predictions
const INVERSE_FLOOR: f32 = 1e-3;

/// Per-batch depth metric snapshot
///
/// # Example
///
/// ```
/// use segdepth::metrics::{DepthMetrics, MetricKind};
/// use ndarray::Array4;
///
/// let mut metrics = DepthMetrics::new(80.0);
/// let gt = Array4::from_shape_vec((1, 1, 1, 3), vec![2.0, 0.0, 4.0]).unwrap();
/// let pred = Array4::from_shape_vec((1, 1, 1, 3), vec![3.0, 9.0, 4.0]).unwrap();
///
/// metrics.calculate(pred.view(), gt.view()).unwrap();
/// assert_eq!(metrics.num(), 2);
/// assert_eq!(metrics.get_metric(MetricKind::Mae), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct DepthMetrics {
    max_depth: f32,
    disparity: bool,
    normalized: bool,
    rmse: f32,
    mae: f32,
    irmse: f32,
    imae: f32,
    num: usize,
}

impl DepthMetrics {
    pub fn new(max_depth: f32) -> Self {
        Self {
            max_depth,
            disparity: false,
            normalized: false,
            rmse: 0.0,
            mae: 0.0,
            irmse: 0.0,
            imae: 0.0,
            num: 0,
        }
    }

    /// Predictions and ground truth are disparities, compared in inverse space
    pub fn with_disparity(mut self, disparity: bool) -> Self {
        self.disparity = disparity;
        self
    }

    /// Values are normalized to `[0, 1]` and are rescaled by `max_depth`
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Score channel 0 of `pred` against channel 0 of `gt`
    pub fn calculate(&mut self, pred: ArrayView4<'_, f32>, gt: ArrayView4<'_, f32>) -> Result<()> {
        let (n, c, h, w) = pred.dim();
        let (gn, gc, gh, gw) = gt.dim();
        if c == 0 || gc == 0 || (n, h, w) != (gn, gh, gw) {
            return Err(Error::shape_mismatch(&[gn, 1, gh, gw], &[n, c, h, w]));
        }

        let mut sq = 0.0f64;
        let mut abs = 0.0f64;
        let mut inv_sq = 0.0f64;
        let mut inv_abs = 0.0f64;
        let mut num = 0usize;

        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let raw_gt = gt[[b, 0, y, x]];
                    if raw_gt <= 0.0 {
                        continue;
                    }
                    let (p, t) = self.transform(pred[[b, 0, y, x]], raw_gt);
                    let err = (p - t) as f64;
                    sq += err * err;
                    abs += err.abs();

                    let inv = (1.0 / p.max(INVERSE_FLOOR) - 1.0 / t) as f64;
                    inv_sq += inv * inv;
                    inv_abs += inv.abs();
                    num += 1;
                }
            }
        }

        self.num = num;
        if num == 0 {
            self.rmse = 0.0;
            self.mae = 0.0;
            self.irmse = 0.0;
            self.imae = 0.0;
            return Ok(());
        }
        let count = num as f64;
        self.rmse = (sq / count).sqrt() as f32;
        self.mae = (abs / count) as f32;
        self.irmse = (inv_sq / count).sqrt() as f32;
        self.imae = (inv_abs / count) as f32;
        Ok(())
    }

    fn transform(&self, mut pred: f32, mut gt: f32) -> (f32, f32) {
        if self.disparity {
            pred = 1.0 / pred.max(1.0 / self.max_depth);
            gt = 1.0 / gt;
        }
        if self.normalized {
            pred *= self.max_depth;
            gt *= self.max_depth;
        }
        (pred.clamp(0.0, self.max_depth), gt)
    }

    /// Value of `kind` from the last [`DepthMetrics::calculate`] call
    pub fn get_metric(&self, kind: MetricKind) -> f32 {
        match kind {
            MetricKind::Rmse => self.rmse,
            MetricKind::Mae => self.mae,
            MetricKind::Irmse => self.irmse,
            MetricKind::Imae => self.imae,
        }
    }

    /// Valid pixels in the last batch
    pub fn num(&self) -> usize {
        self.num
    }
}
