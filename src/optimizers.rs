//! Parameter update rules, keyed by parameter name so each matrix keeps
//! its own optimizer state.

use std::collections::HashMap;

use ndarray::Array2;

/// Optimizer trait for parameter updates during training
pub trait Optimizer {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>);
    fn reset(&mut self);
    fn learning_rate(&self) -> f64;
    fn set_learning_rate(&mut self, learning_rate: f64);
}

/// Per-parameter Adam moments
struct AdamState {
    t: i32,
    m: Array2<f64>,
    v: Array2<f64>,
}

/// Adam optimizer with adaptive learning rates
///
/// Implements: m_t = β₁m_{t-1} + (1-β₁)g_t
///             v_t = β₂v_{t-1} + (1-β₂)g_t²
///             θ_t = θ_{t-1} - η * m̂_t / (√v̂_t + ε)
/// where m̂_t and v̂_t are bias-corrected estimates
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    state: HashMap<String, AdamState>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Adam::with_params(learning_rate, 0.9, 0.999, 1e-7)
    }

    pub fn with_params(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            state: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>) {
        let state = self.state.entry(param_id.to_string()).or_insert_with(|| AdamState {
            t: 0,
            m: Array2::zeros(param.raw_dim()),
            v: Array2::zeros(param.raw_dim()),
        });
        state.t += 1;

        // Update biased moment estimates
        state.m = self.beta1 * &state.m + (1.0 - self.beta1) * gradient;
        state.v = self.beta2 * &state.v + (1.0 - self.beta2) * &gradient.mapv(|g| g * g);

        // Bias correction
        let m_correction = 1.0 - self.beta1.powi(state.t);
        let v_correction = 1.0 - self.beta2.powi(state.t);

        let lr = self.learning_rate;
        let eps = self.epsilon;
        ndarray::Zip::from(param)
            .and(&state.m)
            .and(&state.v)
            .for_each(|p, &m, &v| {
                let m_hat = m / m_correction;
                let v_hat = v / v_correction;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }

    fn reset(&mut self) {
        self.state.clear();
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut optimizer = Adam::new(0.001);
        let mut param = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let gradient = arr2(&[[0.1, -0.2], [0.3, 0.4]]);

        let original_param = param.clone();
        optimizer.update("test_param", &mut param, &gradient);

        // First bias-corrected step is ~lr * sign(g)
        let delta = &original_param - &param;
        assert!((delta[[0, 0]] - 0.001).abs() < 1e-6);
        assert!((delta[[0, 1]] + 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_adam_step_counts_are_per_parameter() {
        let mut optimizer = Adam::new(0.01);
        let mut a = arr2(&[[0.0]]);
        let mut b = arr2(&[[0.0]]);
        let g = arr2(&[[1.0]]);

        optimizer.update("a", &mut a, &g);
        optimizer.update("b", &mut b, &g);
        assert!((a[[0, 0]] - b[[0, 0]]).abs() < 1e-12);
    }

    #[test]
    fn test_set_learning_rate() {
        let mut optimizer = Adam::new(0.001);
        optimizer.set_learning_rate(0.0005);
        assert_eq!(optimizer.learning_rate(), 0.0005);
        optimizer.reset();
        assert_eq!(optimizer.learning_rate(), 0.0005);
    }
}
