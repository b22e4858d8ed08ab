//! Loss functions and image metrics

use burn::prelude::*;
use burn::tensor::Tensor;

/// L2 (Mean Squared Error) loss
pub fn mse_loss<B: Backend, const D: usize>(
    predicted: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (predicted - target).powf_scalar(2.0).mean()
}

/// PSNR for signals with peak-to-peak range `range`
///
/// Predictions live in `[-1, 1]`, so callers pass `2.0`.
pub fn psnr_from_mse(mse: f32, range: f32) -> f32 {
    if mse < 1e-10 {
        return 100.0;
    }
    10.0 * (range * range / mse).log10()
}

/// PSNR metric (not differentiable, for logging)
pub fn psnr<B: Backend, const D: usize>(
    predicted: Tensor<B, D>,
    target: Tensor<B, D>,
    range: f32,
) -> f32 {
    let mse = mse_loss(predicted, target).into_scalar().elem::<f32>();
    psnr_from_mse(mse, range)
}
