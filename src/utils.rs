//! Activation functions shared by the layers.

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Rectified linear unit: max(0, x)
pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Derivative of ReLU with respect to its pre-activation input
pub fn relu_derivative(x: f64) -> f64 {
    if x > 0.0 { 1.0 } else { 0.0 }
}
