//! Sequence-to-one regressor: LSTM stack, last hidden state, dense head
//! and a single linear output.

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

use crate::layers::linear::{LinearGradients, LinearLayer};
use crate::layers::lstm_cell::LSTMCellGradients;
use crate::models::lstm_network::{LSTMNetwork, LSTMSequenceCache};
use crate::optimizers::Optimizer;
use crate::utils::{relu, relu_derivative};

/// Cached activations of one batch for backpropagation
pub struct RegressorCache {
    lstm: LSTMSequenceCache,
    last_hidden: Array2<f64>,
    dense_pre: Array2<f64>,
    dense_out: Array2<f64>,
}

/// Gradients for every trainable parameter of the regressor
#[derive(Clone, Debug)]
pub struct RegressorGradients {
    pub lstm: Vec<LSTMCellGradients>,
    pub dense: LinearGradients,
    pub head: LinearGradients,
}

impl RegressorGradients {
    pub fn matrices_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut matrices: Vec<&mut Array2<f64>> = Vec::new();
        for layer in self.lstm.iter_mut() {
            matrices.extend(layer.matrices_mut());
        }
        matrices.push(&mut self.dense.weight);
        matrices.push(&mut self.dense.bias);
        matrices.push(&mut self.head.weight);
        matrices.push(&mut self.head.bias);
        matrices
    }
}

/// Single-step temperature model: LSTM stack over a univariate window,
/// then a ReLU dense layer and a one-unit linear output.
///
/// Windows are fed as batches of shape `(batch, lookback)`; each timestep
/// becomes a `(1, batch)` column block for the LSTM.
#[derive(Clone, Debug)]
pub struct SequenceRegressor {
    pub lstm: LSTMNetwork,
    pub dense: LinearLayer,
    pub head: LinearLayer,
}

impl SequenceRegressor {
    pub fn new(hidden_size: usize, num_layers: usize, dense_size: usize) -> Self {
        Self::with_rng(hidden_size, num_layers, dense_size, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(hidden_size: usize, num_layers: usize, dense_size: usize, rng: &mut R) -> Self {
        let lstm = LSTMNetwork::with_rng(1, hidden_size, num_layers, rng);
        let dense = LinearLayer::with_rng(hidden_size, dense_size, rng);
        let head = LinearLayer::with_rng(dense_size, 1, rng);
        Self { lstm, dense, head }
    }

    pub fn from_parts(lstm: LSTMNetwork, dense: LinearLayer, head: LinearLayer) -> Self {
        Self { lstm, dense, head }
    }

    pub fn num_parameters(&self) -> usize {
        self.lstm.num_parameters() + self.dense.num_parameters() + self.head.num_parameters()
    }

    fn to_sequence(windows: ArrayView2<f64>) -> Vec<Array2<f64>> {
        windows
            .columns()
            .into_iter()
            .map(|step| step.to_owned().insert_axis(ndarray::Axis(0)))
            .collect()
    }

    /// Predicts the next scaled value for every window in the batch
    pub fn predict_batch(&self, windows: ArrayView2<f64>) -> Array1<f64> {
        let sequence = Self::to_sequence(windows);
        let last_hidden = self.lstm.forward_sequence(&sequence);
        let hidden = self.dense.forward(&last_hidden).mapv(relu);
        self.head.forward(&hidden).row(0).to_owned()
    }

    /// Forward pass keeping the activations needed by [`Self::backward`].
    /// Returns predictions of shape `(1, batch)`.
    pub fn forward_with_cache(&self, windows: ArrayView2<f64>) -> (Array2<f64>, RegressorCache) {
        let sequence = Self::to_sequence(windows);
        let (last_hidden, lstm_cache) = self.lstm.forward_sequence_with_cache(&sequence);
        let dense_pre = self.dense.forward(&last_hidden);
        let dense_out = dense_pre.mapv(relu);
        let output = self.head.forward(&dense_out);

        let cache = RegressorCache {
            lstm: lstm_cache,
            last_hidden,
            dense_pre,
            dense_out,
        };
        (output, cache)
    }

    /// Backpropagates `d_output` (loss gradient w.r.t. the `(1, batch)`
    /// predictions) through the head, the dense layer and the LSTM in time.
    pub fn backward(&self, d_output: &Array2<f64>, cache: &RegressorCache) -> RegressorGradients {
        let (head_grads, d_dense_out) = self.head.backward(&cache.dense_out, d_output);
        let d_dense_pre = d_dense_out * &cache.dense_pre.mapv(relu_derivative);
        let (dense_grads, d_hidden) = self.dense.backward(&cache.last_hidden, &d_dense_pre);
        let lstm_grads = self.lstm.backward_sequence(&d_hidden, &cache.lstm);

        RegressorGradients {
            lstm: lstm_grads,
            dense: dense_grads,
            head: head_grads,
        }
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &RegressorGradients, optimizer: &mut O) {
        self.lstm.update_parameters(&gradients.lstm, optimizer);
        self.dense.update_parameters(&gradients.dense, optimizer, "dense");
        self.head.update_parameters(&gradients.head, optimizer, "head");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_predict_batch_shape() {
        let model = SequenceRegressor::with_rng(8, 1, 4, &mut StdRng::seed_from_u64(42));
        let windows = arr2(&[[0.1, 0.2, 0.3], [0.5, 0.4, 0.3]]);

        let preds = model.predict_batch(windows.view());
        assert_eq!(preds.len(), 2);
    }

    #[test]
    fn test_cached_forward_matches_prediction() {
        let model = SequenceRegressor::with_rng(6, 2, 3, &mut StdRng::seed_from_u64(1));
        let windows = arr2(&[[0.9, 0.1, 0.4, 0.2]]);

        let (output, _) = model.forward_with_cache(windows.view());
        let preds = model.predict_batch(windows.view());
        assert!((output[[0, 0]] - preds[0]).abs() < 1e-12);
    }

    #[test]
    fn test_head_gradient_matches_finite_difference() {
        let mut model = SequenceRegressor::with_rng(4, 1, 3, &mut StdRng::seed_from_u64(5));
        let windows = arr2(&[[0.2, 0.6, 0.4], [0.8, 0.3, 0.1]]);

        let (_, cache) = model.forward_with_cache(windows.view());
        let grads = model.backward(&Array2::ones((1, 2)), &cache);

        let eps = 1e-6;
        let original = model.dense.weight[[1, 2]];
        model.dense.weight[[1, 2]] = original + eps;
        let plus = model.predict_batch(windows.view()).sum();
        model.dense.weight[[1, 2]] = original - eps;
        let minus = model.predict_batch(windows.view()).sum();
        model.dense.weight[[1, 2]] = original;

        let numeric = (plus - minus) / (2.0 * eps);
        assert!((grads.dense.weight[[1, 2]] - numeric).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_matrix_count() {
        let model = SequenceRegressor::with_rng(4, 2, 3, &mut StdRng::seed_from_u64(5));
        let windows = arr2(&[[0.2, 0.6]]);
        let (_, cache) = model.forward_with_cache(windows.view());
        let mut grads = model.backward(&Array2::ones((1, 1)), &cache);
        assert_eq!(grads.matrices_mut().len(), 2 * 4 + 4);
    }
}
