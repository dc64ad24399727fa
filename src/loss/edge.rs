//! Edge-aware depth smoothness regularizer
//!
//! Depth should be flat where the image is flat, and should keep its
//! discontinuities where the foreground segmentation has a boundary.

use crate::{Error, Result};
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis};

/// Offset of the first image channel in the network input
pub const IMAGE_CHANNEL_OFFSET: usize = 2;

/// The four directional components of the regularizer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeTerms {
    pub smooth_x: f32,
    pub smooth_y: f32,
    pub edge_x: f32,
    pub edge_y: f32,
}

impl EdgeTerms {
    pub fn total(&self) -> f32 {
        self.smooth_x + self.smooth_y + self.edge_x + self.edge_y
    }
}

/// Smoothness / edge loss on a depth map
///
/// With `g` the absolute depth gradient and `I`, `S` the min-max normalized
/// image and foreground-segmentation gradients along the same axis:
///
/// ```text
/// smooth = mean(max(0, g - alpha) * (1 - I))
/// edge   = mean(max(0, beta - g) * S)
/// ```
///
/// summed over both axes.
#[derive(Debug, Clone)]
pub struct SmoothEdgeLoss {
    pub alpha: f32,
    pub beta: f32,
    /// Class ids kept in the foreground mask; every other class becomes 0
    pub foreground: Vec<f32>,
}

impl Default for SmoothEdgeLoss {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.5,
            foreground: vec![5.0, 7.0],
        }
    }
}

impl SmoothEdgeLoss {
    /// Image channels of the network input rescaled to `[0, 255]`
    pub fn image_from_input(input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        if input.dim().1 <= IMAGE_CHANNEL_OFFSET {
            return Err(Error::InvalidInput(format!(
                "input has {} channels, image expected from channel {IMAGE_CHANNEL_OFFSET}",
                input.dim().1
            )));
        }
        Ok(input
            .slice(s![.., IMAGE_CHANNEL_OFFSET.., .., ..])
            .mapv(|v| v * 255.0))
    }

    pub fn forward(
        &self,
        depth: ArrayView4<'_, f32>,
        image: ArrayView4<'_, f32>,
        segmentation: ArrayView4<'_, f32>,
    ) -> Result<EdgeTerms> {
        self.forward_with_grad(depth, image, segmentation)
            .map(|(terms, _)| terms)
    }

    /// Loss terms and the gradient of their sum with respect to `depth`
    ///
    /// Only channel 0 of `depth` is regularized.
    pub fn forward_with_grad(
        &self,
        depth: ArrayView4<'_, f32>,
        image: ArrayView4<'_, f32>,
        segmentation: ArrayView4<'_, f32>,
    ) -> Result<(EdgeTerms, Array4<f32>)> {
        let (n, c, h, w) = depth.dim();
        for other in [image.dim(), segmentation.dim()] {
            let (on, oc, oh, ow) = other;
            if oc == 0 || (on, oh, ow) != (n, h, w) {
                return Err(Error::shape_mismatch(&[n, 1, h, w], &[on, oc, oh, ow]));
            }
        }
        if c == 0 || h == 0 || w == 0 {
            return Err(Error::InvalidInput(format!(
                "depth map {:?} has an empty axis",
                depth.shape()
            )));
        }

        let foreground = segmentation.mapv(|v| {
            if self.foreground.contains(&v) {
                v
            } else {
                0.0
            }
        });
        let d = depth.index_axis(Axis(1), 0);

        let mut grad = Array4::zeros(depth.raw_dim());
        let mut terms = EdgeTerms::default();

        for axis in [Axis(2), Axis(1)] {
            let diff = signed_diff(d, axis);
            let img = normalized(channel_mean_abs_diff(image, axis));
            let seg = normalized(channel_mean_abs_diff(foreground.view(), axis));

            let m = diff.len();
            if m == 0 {
                continue;
            }
            let mut smooth = 0.0f64;
            let mut edge = 0.0f64;
            for ((b, y, x), &dv) in diff.indexed_iter() {
                let g = dv.abs();
                let i = img[[b, y, x]];
                let sg = seg[[b, y, x]];
                smooth += ((g - self.alpha).max(0.0) * (1.0 - i)) as f64;
                edge += ((self.beta - g).max(0.0) * sg) as f64;

                let mut dg = 0.0;
                if g > self.alpha {
                    dg += 1.0 - i;
                }
                if g < self.beta {
                    dg -= sg;
                }
                let gd = dg * signum(dv) / m as f32;
                grad[[b, 0, y, x]] += gd;
                if axis == Axis(2) {
                    grad[[b, 0, y, x + 1]] -= gd;
                } else {
                    grad[[b, 0, y + 1, x]] -= gd;
                }
            }

            let smooth = (smooth / m as f64) as f32;
            let edge = (edge / m as f64) as f32;
            if axis == Axis(2) {
                terms.smooth_x = smooth;
                terms.edge_x = edge;
            } else {
                terms.smooth_y = smooth;
                terms.edge_y = edge;
            }
        }

        Ok((terms, grad))
    }
}

fn signum(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `t[i] - t[i + 1]` along `axis` of a `[N, H, W]` map
fn signed_diff(t: ArrayView3<'_, f32>, axis: Axis) -> Array3<f32> {
    let len = t.len_of(axis);
    let head = t.slice_axis(axis, (0..len.saturating_sub(1)).into());
    let tail = t.slice_axis(axis, (1.min(len)..len).into());
    &head - &tail
}

/// Mean over channels of the absolute difference along a spatial axis
///
/// `axis` indexes the `[N, H, W]` result, so the 4-D axis is one further.
fn channel_mean_abs_diff(t: ArrayView4<'_, f32>, axis: Axis) -> Array3<f32> {
    let axis4 = Axis(axis.index() + 1);
    let len = t.len_of(axis4);
    let head = t.slice_axis(axis4, (0..len.saturating_sub(1)).into());
    let tail = t.slice_axis(axis4, (1.min(len)..len).into());
    let channels = t.len_of(Axis(1)) as f32;
    (&head - &tail).mapv(f32::abs).sum_axis(Axis(1)) / channels
}

/// Min-max normalize to [0, 1] over the whole batch; a flat map becomes zeros
fn normalized(mut t: Array3<f32>) -> Array3<f32> {
    let (min, max) = t
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if max > min {
        let range = max - min;
        t.mapv_inplace(|v| (v - min) / range);
    } else {
        t.fill(0.0);
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(h: usize, w: usize, step: f32) -> Array4<f32> {
        Array4::from_shape_fn((1, 1, h, w), |(_, _, _, x)| x as f32 * step)
    }

    fn checker_image(h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| ((x + y + c) % 2) as f32 * 40.0)
    }

    #[test]
    fn test_constant_depth_has_no_smoothness_penalty() {
        let depth = Array4::from_elem((2, 1, 4, 5), 7.0);
        let image = checker_image(4, 5);
        let image = ndarray::concatenate![Axis(0), image, image];
        let seg = Array4::from_shape_fn((2, 1, 4, 5), |(_, _, _, x)| if x < 2 { 5.0 } else { 1.0 });

        let terms = SmoothEdgeLoss::default()
            .forward(depth.view(), image.view(), seg.view())
            .unwrap();
        assert_eq!(terms.smooth_x, 0.0);
        assert_eq!(terms.smooth_y, 0.0);
    }

    #[test]
    fn test_constant_depth_without_foreground_boundary_is_zero() {
        let depth = Array4::from_elem((1, 1, 3, 3), 2.0);
        let image = checker_image(3, 3);
        // classes 1 and 2 are background, so the masked map is flat
        let seg = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, _)| (y % 2 + 1) as f32);

        let terms = SmoothEdgeLoss::default()
            .forward(depth.view(), image.view(), seg.view())
            .unwrap();
        assert_eq!(terms.total(), 0.0);
    }

    #[test]
    fn test_foreground_boundary_penalizes_flat_depth() {
        let depth = Array4::from_elem((1, 1, 2, 4), 1.0);
        let image = Array4::zeros((1, 3, 2, 4));
        let seg = Array4::from_shape_fn((1, 1, 2, 4), |(_, _, _, x)| if x >= 2 { 7.0 } else { 0.0 });

        let terms = SmoothEdgeLoss::default()
            .forward(depth.view(), image.view(), seg.view())
            .unwrap();
        // one boundary column out of three, normalized to 1, times beta
        assert_abs_diff_eq!(terms.edge_x, 0.5 / 3.0, epsilon = 1e-6);
        assert_eq!(terms.edge_y, 0.0);
    }

    #[test]
    fn test_steep_depth_in_flat_image_is_penalized() {
        let depth = ramp(2, 3, 2.0);
        let image = Array4::zeros((1, 3, 2, 3));
        let seg = Array4::zeros((1, 1, 2, 3));

        let terms = SmoothEdgeLoss::default()
            .forward(depth.view(), image.view(), seg.view())
            .unwrap();
        // every horizontal step is 2.0, image gradient normalizes to 0
        assert_abs_diff_eq!(terms.smooth_x, 1.5, epsilon = 1e-6);
        assert_eq!(terms.smooth_y, 0.0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let depth = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, x)| {
            (x as f32 * 1.3 - y as f32 * 0.7 + (x * y) as f32 * 0.4).sin() * 2.0
        });
        let image = checker_image(3, 3);
        let seg = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, x)| if x + y > 2 { 5.0 } else { 0.0 });
        let loss = SmoothEdgeLoss::default();

        let (base, grad) = loss
            .forward_with_grad(depth.view(), image.view(), seg.view())
            .unwrap();
        let eps = 1e-3;
        for (y, x) in [(0, 0), (1, 1), (2, 1)] {
            let mut bumped = depth.clone();
            bumped[[0, 0, y, x]] += eps;
            let moved = loss.forward(bumped.view(), image.view(), seg.view()).unwrap();
            let numeric = (moved.total() - base.total()) / eps;
            assert_abs_diff_eq!(numeric, grad[[0, 0, y, x]], epsilon = 2e-2);
        }
    }

    #[test]
    fn test_single_column_contributes_nothing_horizontally() {
        let depth = ramp(3, 1, 0.0);
        let image = Array4::zeros((1, 3, 3, 1));
        let seg = Array4::zeros((1, 1, 3, 1));
        let terms = SmoothEdgeLoss::default()
            .forward(depth.view(), image.view(), seg.view())
            .unwrap();
        assert_eq!(terms.smooth_x, 0.0);
        assert_eq!(terms.edge_x, 0.0);
    }

    #[test]
    fn test_image_from_input_scales_rgb_channels() {
        let input = Array4::from_shape_fn((1, 5, 1, 1), |(_, c, _, _)| c as f32 * 0.1);
        let image = SmoothEdgeLoss::image_from_input(input.view()).unwrap();
        assert_eq!(image.dim(), (1, 3, 1, 1));
        assert_abs_diff_eq!(image[[0, 0, 0, 0]], 51.0, epsilon = 1e-4);
        assert!(SmoothEdgeLoss::image_from_input(input.slice(s![.., ..2, .., ..])).is_err());
    }

    #[test]
    fn test_min_max_flat_map_is_zero() {
        let t = normalized(Array3::from_elem((1, 2, 2), 3.0));
        assert!(t.iter().all(|&v| v == 0.0));
    }
}
