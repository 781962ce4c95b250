//! # Masked Loss
//!
//! Negative log-likelihood averaged over unmasked positions, together with
//! argmax predictions and the masked count of correct predictions.

use candle_core::{D, DType, Tensor};
use candle_nn::ops::log_softmax;

use crate::error::{Result, ShirushiError};

/// Loss and accuracy statistics for one scored batch.
#[derive(Debug, Clone)]
pub struct LossResult {
    /// Mean negative log-likelihood per unmasked position, rank-0 `F32`.
    /// Differentiable with respect to the scores.
    pub loss: Tensor,
    /// Number of unmasked positions whose argmax matches the target,
    /// rank-0 `F32`.
    pub correct: Tensor,
    /// Argmax label per position, `[batch, length]` `U32`. Ties resolve to
    /// the lowest label id.
    pub predictions: Tensor,
}

impl LossResult {
    /// Loss as a plain scalar.
    pub fn loss_scalar(&self) -> Result<f32> {
        Ok(self.loss.to_scalar::<f32>()?)
    }

    /// Correct-prediction count as a plain scalar.
    pub fn correct_scalar(&self) -> Result<f32> {
        Ok(self.correct.to_scalar::<f32>()?)
    }
}

/// Score a batch: `scores` is `[batch, length, num_labels]`, `target` and
/// `mask` are `[batch, length]`.
///
/// Log-probabilities are multiplied by the mask before the target labels
/// are gathered, so a padded position contributes exactly zero to the sum
/// regardless of which (in-range) label id sits at it. The summed loss is
/// divided by the number of unmasked positions, not by `batch * length`.
///
/// Fails with [`ShirushiError::DegenerateBatch`] when the mask is entirely
/// zero, rather than returning a 0/0 artifact.
pub fn masked_nll(scores: &Tensor, target: &Tensor, mask: &Tensor) -> Result<LossResult> {
    let (batch, length, num_labels) =
        scores.dims3().map_err(|_| ShirushiError::ShapeMismatch {
            what: "scores",
            expected: "[batch, length, num_labels]".to_string(),
            actual: format!("{:?}", scores.shape()),
        })?;
    for (what, tensor) in [("target", target), ("loss mask", mask)] {
        let dims = tensor.dims2().map_err(|_| ShirushiError::ShapeMismatch {
            what,
            expected: "[batch, length]".to_string(),
            actual: format!("{:?}", tensor.shape()),
        })?;
        if dims != (batch, length) {
            return Err(ShirushiError::ShapeMismatch {
                what,
                expected: format!("[{batch}, {length}]"),
                actual: format!("{:?}", tensor.shape()),
            });
        }
    }

    let target = target.to_dtype(DType::U32)?;
    let mask = mask.to_dtype(DType::F32)?;

    let predictions = scores.argmax(D::Minus1)?;

    // Zero out padded rows before the gather.
    let log_probs = log_softmax(scores, D::Minus1)?;
    let masked = log_probs.broadcast_mul(&mask.unsqueeze(D::Minus1)?)?;

    // Pick the target-label log-probability at every position.
    let flat = masked.reshape((batch * length, num_labels))?;
    let index = target.reshape((batch * length, 1))?;
    let picked = flat.gather(&index, 1)?;

    let denominator = mask.sum_all()?;
    if denominator.to_scalar::<f32>()? == 0.0 {
        return Err(ShirushiError::DegenerateBatch);
    }
    let loss = (picked.sum_all()?.neg()? / &denominator)?;

    let correct = predictions
        .eq(&target)?
        .to_dtype(DType::F32)?
        .mul(&mask)?
        .sum_all()?;

    Ok(LossResult {
        loss,
        correct,
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn reference_nll(row: &[f32], label: usize) -> f64 {
        let max = row
            .iter()
            .fold(f64::NEG_INFINITY, |m, &v| m.max(f64::from(v)));
        let sum: f64 = row.iter().map(|&v| (f64::from(v) - max).exp()).sum();
        max + sum.ln() - f64::from(row[label])
    }

    #[test]
    fn uniform_scores_cost_log_num_labels() {
        let device = Device::Cpu;
        let scores = Tensor::zeros((2, 3, 4), DType::F32, &device).unwrap();
        let target = Tensor::zeros((2, 3), DType::U32, &device).unwrap();
        let mask = Tensor::ones((2, 3), DType::F32, &device).unwrap();

        let result = masked_nll(&scores, &target, &mask).unwrap();
        assert!((result.loss_scalar().unwrap() - 4f32.ln()).abs() < 1e-5);
        // Ties break toward label 0, which happens to be the target.
        assert_eq!(result.correct_scalar().unwrap(), 6.0);
        assert_eq!(result.predictions.dims(), &[2, 3]);
    }

    #[test]
    fn single_position_matches_closed_form() {
        let device = Device::Cpu;
        // Two labels with scores [0, ln 3]: picking label 1 costs ln(4/3).
        let scores = Tensor::new(&[[[0f32, 3f32.ln()]]], &device).unwrap();
        let target = Tensor::new(&[[1u32]], &device).unwrap();
        let mask = Tensor::ones((1, 1), DType::F32, &device).unwrap();

        let result = masked_nll(&scores, &target, &mask).unwrap();
        assert!((result.loss_scalar().unwrap() - (4f32 / 3.).ln()).abs() < 1e-5);
    }

    #[test]
    fn averages_over_unmasked_positions_only() {
        let device = Device::Cpu;
        let rows = [
            [5f32, 0., 0., 0.], // b0 t0, predicts 0
            [0., 0., 4., 0.],   // b0 t1, predicts 2
            [0., 9., 0., 0.],   // b0 t2, padded
            [0., 0., 3., 0.],   // b1 t0, predicts 2
            [7., 0., 0., 0.],   // b1 t1, padded
            [0., 0., 0., 2.],   // b1 t2, padded
        ];
        let scores = Tensor::new(
            &[[rows[0], rows[1], rows[2]], [rows[3], rows[4], rows[5]]],
            &device,
        )
        .unwrap();
        let target = Tensor::new(&[[0u32, 1, 3], [2, 0, 0]], &device).unwrap();
        let mask = Tensor::new(&[[1f32, 1., 0.], [1., 0., 0.]], &device).unwrap();

        let result = masked_nll(&scores, &target, &mask).unwrap();

        // Three unmasked positions divide the sum, not six.
        let expected =
            (reference_nll(&rows[0], 0) + reference_nll(&rows[1], 1) + reference_nll(&rows[3], 2))
                / 3.0;
        assert!((f64::from(result.loss_scalar().unwrap()) - expected).abs() < 1e-4);

        // b0 t0 and b1 t0 are right; the padded hits do not count.
        assert_eq!(result.correct_scalar().unwrap(), 2.0);
        assert_eq!(
            result.predictions.to_vec2::<u32>().unwrap(),
            vec![vec![0, 2, 1], vec![2, 0, 3]]
        );
    }

    #[test]
    fn padded_targets_are_irrelevant() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1., (2, 3, 4), &device).unwrap();
        let mask = Tensor::new(&[[1f32, 1., 0.], [1., 0., 0.]], &device).unwrap();
        let target = Tensor::new(&[[0u32, 1, 0], [2, 0, 0]], &device).unwrap();
        let relabeled = Tensor::new(&[[0u32, 1, 3], [2, 3, 1]], &device).unwrap();

        let a = masked_nll(&scores, &target, &mask).unwrap();
        let b = masked_nll(&scores, &relabeled, &mask).unwrap();
        assert_eq!(a.loss_scalar().unwrap(), b.loss_scalar().unwrap());
        assert_eq!(a.correct_scalar().unwrap(), b.correct_scalar().unwrap());
    }

    #[test]
    fn full_mask_equals_plain_mean() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1., (2, 2, 3), &device).unwrap();
        let target = Tensor::new(&[[0u32, 2], [1, 1]], &device).unwrap();
        let mask = Tensor::ones((2, 2), DType::F32, &device).unwrap();

        let result = masked_nll(&scores, &target, &mask).unwrap();

        let rows = scores.reshape((4, 3)).unwrap().to_vec2::<f32>().unwrap();
        let labels = [0usize, 2, 1, 1];
        let expected: f64 = rows
            .iter()
            .zip(labels)
            .map(|(row, label)| reference_nll(row, label))
            .sum::<f64>()
            / 4.0;
        assert!((f64::from(result.loss_scalar().unwrap()) - expected).abs() < 1e-4);
    }

    #[test]
    fn all_zero_mask_is_degenerate() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1., (1, 2, 3), &device).unwrap();
        let target = Tensor::zeros((1, 2), DType::U32, &device).unwrap();
        let mask = Tensor::zeros((1, 2), DType::F32, &device).unwrap();

        let err = masked_nll(&scores, &target, &mask).unwrap_err();
        assert!(matches!(err, ShirushiError::DegenerateBatch));
    }

    #[test]
    fn rejects_disagreeing_shapes() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1., (2, 3, 4), &device).unwrap();
        let target = Tensor::zeros((2, 3), DType::U32, &device).unwrap();
        let short_mask = Tensor::ones((2, 2), DType::F32, &device).unwrap();

        let err = masked_nll(&scores, &target, &short_mask).unwrap_err();
        assert!(matches!(
            err,
            ShirushiError::ShapeMismatch {
                what: "loss mask",
                ..
            }
        ));

        let flat_scores = Tensor::randn(0f32, 1., (2, 3), &device).unwrap();
        let err = masked_nll(&flat_scores, &target, &target).unwrap_err();
        assert!(matches!(
            err,
            ShirushiError::ShapeMismatch { what: "scores", .. }
        ));
    }
}
