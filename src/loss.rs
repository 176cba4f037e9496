//! Loss functions.
//!
//! A loss is a pair of functions:
//!
//! - a vector-level value `L(pred, target)` used for reporting
//! - a scalar derivative `dL/d(pred[i])` evaluated element-wise, used to seed backprop
//!
//! Typical use:
//!
//! - run `network.forward(...)`
//! - compute the loss value for bookkeeping
//! - run `network.backward(target)`, which seeds the output delta from [`Loss::derivative`]

/// Added to predictions before taking a logarithm in cross-entropy.
pub const CROSS_ENTROPY_EPS: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
/// Supported loss functions.
pub enum Loss {
    /// Mean squared error.
    Mse,
    /// Cross-entropy over probabilities (not logits).
    ///
    /// Predictions are expected in `[0, 1]`, e.g. from a sigmoid output layer.
    CrossEntropy,
}

impl Loss {
    /// Compute a loss value.
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f32], target: &[f32]) -> f32 {
        match self {
            Loss::Mse => mse(pred, target),
            Loss::CrossEntropy => cross_entropy(pred, target),
        }
    }

    /// Element-wise gradient `dL/d(pred)` for a single output unit.
    #[inline]
    pub fn derivative(self, pred: f32, target: f32) -> f32 {
        match self {
            Loss::Mse => mse_derivative(pred, target),
            Loss::CrossEntropy => cross_entropy_derivative(pred, target),
        }
    }
}

/// Mean squared error.
///
/// Returns `mean((pred - target)^2)`.
#[inline]
pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let mut sum_sq = 0.0_f32;
    for (&p, &t) in pred.iter().zip(target) {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq / pred.len() as f32
}

/// Scalar MSE gradient: `2 * (pred - target)`.
///
/// The per-element gradient is not divided by the output width, matching the
/// per-unit seeding the network uses.
#[inline]
pub fn mse_derivative(pred: f32, target: f32) -> f32 {
    2.0 * (pred - target)
}

/// Cross-entropy: `-sum(target * ln(pred + eps))`.
#[inline]
pub fn cross_entropy(pred: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    let mut sum = 0.0_f32;
    for (&p, &t) in pred.iter().zip(target) {
        sum += t * (p + CROSS_ENTROPY_EPS).ln();
    }
    -sum
}

/// Scalar cross-entropy gradient: `-target / (pred + eps)`.
#[inline]
pub fn cross_entropy_derivative(pred: f32, target: f32) -> f32 {
    -target / (pred + CROSS_ENTROPY_EPS)
}
