use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::dataset::{WlfwBatch, NUM_ATTRIBUTES};

/// Weighted multi-term landmark loss.
///
/// Per sample, the squared landmark error is scaled by a pose term
/// `sum(1 - cos(angle_pred - angle_gt))` and by an attribute rarity weight.
/// The pose term keeps gradients flowing into the auxiliary head; the
/// attribute weight up-weights samples carrying rare attributes so the
/// regressor does not overfit the easy frontal faces.
#[derive(Debug, Clone, Default)]
pub struct PfldLoss;

#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Training objective; backward runs on this.
    pub weighted: Tensor<B, 1>,
    /// Unweighted mean summed squared landmark error, for logging.
    pub reference: Tensor<B, 1>,
}

/// Per-sample attribute weights, computed on host since no gradient flows
/// through them. `attributes` is row-major `[batch, 6]`; the first column
/// is skipped. A column's ratio is the inverse of its batch mean when any
/// sample carries the attribute, else the batch size.
pub fn attribute_weights(attributes: &[f32], batch: usize) -> Vec<f32> {
    let mut ratios = [0.0f32; NUM_ATTRIBUTES];
    for col in 1..NUM_ATTRIBUTES {
        let mut sum = 0.0f32;
        for row in 0..batch {
            sum += attributes[row * NUM_ATTRIBUTES + col];
        }
        let mean = sum / batch as f32;
        ratios[col] = if mean > 0.0 { 1.0 / mean } else { batch as f32 };
    }

    let mut weights = Vec::with_capacity(batch);
    for row in 0..batch {
        let mut w = 0.0f32;
        for col in 1..NUM_ATTRIBUTES {
            w += attributes[row * NUM_ATTRIBUTES + col] * ratios[col];
        }
        weights.push(w);
    }
    weights
}

impl PfldLoss {
    pub fn forward<B: Backend>(
        &self,
        batch: &WlfwBatch<B>,
        landmark_pred: Tensor<B, 2>,
        angle_pred: Tensor<B, 2>,
    ) -> LossOutput<B> {
        let device = landmark_pred.device();
        let batch_size = landmark_pred.dims()[0];

        let landmark_diff = batch.landmarks.clone() - landmark_pred;
        let l2 = landmark_diff.powf_scalar(2.0).sum_dim(1);

        let angle_diff = angle_pred - batch.euler_angles.clone();
        let weight_angle = (angle_diff.ones_like() - angle_diff.cos()).sum_dim(1);

        let attributes = batch
            .attributes
            .clone()
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();
        let weight_attribute = Tensor::<B, 2>::from_data(
            TensorData::new(attribute_weights(&attributes, batch_size), [batch_size, 1]),
            &device,
        );

        let weighted = (weight_angle * weight_attribute * l2.clone()).mean();
        let reference = l2.mean();
        LossOutput {
            weighted,
            reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{WlfwBatcher, WlfwItem};
    use burn::data::dataloader::batcher::Batcher;
    use burn::tensor::Tensor;

    type B = burn::backend::NdArray<f32>;

    fn item(landmarks: Vec<f32>, attributes: Vec<f32>, euler_angles: Vec<f32>) -> WlfwItem {
        WlfwItem {
            pixels: vec![0.0; 3 * 112 * 112],
            landmarks,
            attributes,
            euler_angles,
        }
    }

    fn scalar(t: &Tensor<B, 1>) -> f32 {
        t.clone()
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default()
            .first()
            .copied()
            .unwrap_or(f32::NAN)
    }

    #[test]
    fn attribute_weights_invert_column_means() {
        // Two samples; column 1 always set, column 2 set once, rest empty.
        let attrs = [
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 1.0, 0.0, 0.0, 0.0,
        ];
        let weights = attribute_weights(&attrs, 2);
        // col1 mean 1.0 -> ratio 1; col2 mean 0.5 -> ratio 2; empty cols contribute nothing.
        assert_eq!(weights, vec![1.0, 3.0]);
    }

    #[test]
    fn empty_column_fallback_never_reaches_the_weights() {
        // Column 2 is empty, so its ratio takes the fallback value. Every
        // sample's entry in that column is zero, which nulls the ratio out of
        // the weight no matter what the fallback is.
        let attrs = [
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let weights = attribute_weights(&attrs, 2);
        assert_eq!(weights, vec![1.0, 1.0]);
    }

    #[test]
    fn exact_pose_prediction_zeroes_the_weighted_term() {
        let device = Default::default();
        let batcher = WlfwBatcher::<B>::new(device);
        let angles = vec![0.5, -0.25, 1.0];
        let batch = batcher.batch(vec![item(
            vec![0.25; 196],
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            angles.clone(),
        )]);

        let landmark_pred = Tensor::<B, 2>::zeros([1, 196], &Default::default());
        let angle_pred = batch.euler_angles.clone();
        let out = PfldLoss.forward(&batch, landmark_pred, angle_pred);

        // cos(0) == 1 collapses the pose weight, so the weighted loss is zero
        // even though the landmark error is not.
        assert!(scalar(&out.weighted).abs() < 1e-6);
        let expected_l2 = 196.0 * 0.25 * 0.25;
        assert!((scalar(&out.reference) - expected_l2).abs() < 1e-3);
    }

    #[test]
    fn reference_loss_is_mean_summed_squared_error() {
        let device = Default::default();
        let batcher = WlfwBatcher::<B>::new(device);
        let batch = batcher.batch(vec![
            item(vec![1.0; 196], vec![0.0; 6], vec![0.0; 3]),
            item(vec![0.0; 196], vec![0.0; 6], vec![0.0; 3]),
        ]);

        let landmark_pred = Tensor::<B, 2>::zeros([2, 196], &Default::default());
        let angle_pred = Tensor::<B, 2>::zeros([2, 3], &Default::default());
        let out = PfldLoss.forward(&batch, landmark_pred, angle_pred);

        // Sample 0 contributes 196, sample 1 contributes 0.
        assert!((scalar(&out.reference) - 98.0).abs() < 1e-3);
    }
}
