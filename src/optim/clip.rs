//! Gradient norm clipping

use crate::Tensor;

/// Scale all gradients so their global L2 norm is at most `max_norm`
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(params: &mut [Tensor], max_norm: f32) -> f32 {
    let total_sq: f32 = params
        .iter()
        .filter_map(|p| p.grad())
        .map(|g| g.iter().map(|v| v * v).sum::<f32>())
        .sum();
    let total_norm = total_sq.sqrt();

    let coef = max_norm / (total_norm + 1e-6);
    if coef < 1.0 {
        for p in params.iter() {
            p.scale_grad(coef);
        }
    }
    total_norm
}
