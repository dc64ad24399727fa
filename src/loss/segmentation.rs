//! Per-pixel cross entropy for segmentation logits

use super::DenseLoss;
use crate::{Error, Result};
use ndarray::{Array4, ArrayView4};

/// Cross entropy over the class axis of `[N, K, H, W]` logits
///
/// L = mean over pixels of -log_softmax(logits)[label]
///
/// The label map is channel 0 of a `[N, _, H, W]` target holding class ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy2d;

impl DenseLoss for CrossEntropy2d {
    fn name(&self) -> &str {
        "cross_entropy_2d"
    }

    fn forward(
        &self,
        logits: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
    ) -> Result<(f32, Array4<f32>)> {
        let (n, k, h, w) = logits.dim();
        let (tn, tc, th, tw) = target.dim();
        if tc == 0 || (n, h, w) != (tn, th, tw) {
            return Err(Error::shape_mismatch(&[n, 1, h, w], &[tn, tc, th, tw]));
        }

        let pixels = n * h * w;
        let mut grad = Array4::zeros(logits.raw_dim());
        if pixels == 0 {
            return Ok((0.0, grad));
        }

        let mut total = 0.0f64;
        let mut probs = vec![0.0f32; k];
        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let raw = target[[b, 0, y, x]];
                    if !(raw >= 0.0 && (raw as usize) < k) {
                        return Err(Error::InvalidInput(format!(
                            "segmentation label {raw} outside [0, {k})"
                        )));
                    }
                    let label = raw as usize;

                    // Numerically stable log-softmax
                    let max = (0..k)
                        .map(|c| logits[[b, c, y, x]])
                        .fold(f32::NEG_INFINITY, f32::max);
                    let mut sum = 0.0f32;
                    for (c, p) in probs.iter_mut().enumerate() {
                        *p = (logits[[b, c, y, x]] - max).exp();
                        sum += *p;
                    }
                    let log_sum = sum.ln() + max;
                    total += (log_sum - logits[[b, label, y, x]]) as f64;

                    for (c, p) in probs.iter().enumerate() {
                        let onehot = if c == label { 1.0 } else { 0.0 };
                        grad[[b, c, y, x]] = (p / sum - onehot) / pixels as f32;
                    }
                }
            }
        }

        Ok(((total / pixels as f64) as f32, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_uniform_logits_give_log_k() {
        let logits = Array4::<f32>::zeros((1, 4, 2, 2));
        let labels = Array4::<f32>::from_elem((1, 1, 2, 2), 3.0);
        let (loss, _) = CrossEntropy2d.forward(logits.view(), labels.view()).unwrap();
        assert_abs_diff_eq!(loss, 4.0f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_confident_correct_prediction_is_near_zero() {
        let mut logits = Array4::<f32>::zeros((1, 2, 1, 1));
        logits[[0, 1, 0, 0]] = 20.0;
        let labels = Array4::<f32>::from_elem((1, 1, 1, 1), 1.0);
        let (loss, grad) = CrossEntropy2d.forward(logits.view(), labels.view()).unwrap();
        assert!(loss < 1e-6);
        assert!(grad[[0, 1, 0, 0]] <= 0.0);
    }

    #[test]
    fn test_gradient_sums_to_zero_per_pixel() {
        let logits =
            Array4::from_shape_vec((1, 3, 1, 2), vec![0.1, -1.0, 2.0, 0.3, 0.5, 0.0]).unwrap();
        let labels = Array4::from_shape_vec((1, 1, 1, 2), vec![0.0, 2.0]).unwrap();
        let (_, grad) = CrossEntropy2d.forward(logits.view(), labels.view()).unwrap();
        for x in 0..2 {
            let s: f32 = (0..3).map(|c| grad[[0, c, 0, x]]).sum();
            assert_abs_diff_eq!(s, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let logits =
            Array4::from_shape_vec((1, 3, 1, 1), vec![0.2, -0.4, 1.1]).unwrap();
        let labels = Array4::from_elem((1, 1, 1, 1), 1.0);
        let (base, grad) = CrossEntropy2d.forward(logits.view(), labels.view()).unwrap();

        let eps = 1e-3;
        let mut bumped = logits.clone();
        bumped[[0, 2, 0, 0]] += eps;
        let (moved, _) = CrossEntropy2d.forward(bumped.view(), labels.view()).unwrap();
        assert_abs_diff_eq!((moved - base) / eps, grad[[0, 2, 0, 0]], epsilon = 1e-2);
    }

    #[test]
    fn test_out_of_range_label_is_rejected() {
        let logits = Array4::<f32>::zeros((1, 3, 1, 1));
        let labels = Array4::<f32>::from_elem((1, 1, 1, 1), 3.0);
        assert!(matches!(
            CrossEntropy2d.forward(logits.view(), labels.view()),
            Err(Error::InvalidInput(_))
        ));
    }
}
