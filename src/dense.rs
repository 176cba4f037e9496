//! Fully-connected layer.

use rand::Rng;

use crate::error::check_len;
use crate::{Activation, Error, Result};

/// Which cached value a dense layer feeds into the activation derivative during
/// backprop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum GradientSource {
    /// `act'(z)` with `z = W x + b`. This is the correct gradient.
    #[default]
    PreActivation,
    /// `act'(y)` with `y = act(z)`.
    ///
    /// Kept to reproduce models trained with the legacy rule. Only ReLU-like and
    /// identity activations give the same result as `PreActivation`.
    PostActivation,
}

#[derive(Debug, Clone)]
pub struct DenseLayer {
    in_dim: usize,
    out_dim: usize,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f32>,
    biases: Vec<f32>,
    activation: Activation,
    gradient_source: GradientSource,

    input_cache: Vec<f32>,
    pre_activation: Vec<f32>,
    output: Vec<f32>,
    delta: Vec<f32>,
    input_delta: Vec<f32>,

    // Summed parameter gradients for batch-mean updates.
    acc_weights: Vec<f32>,
    acc_biases: Vec<f32>,
}

impl DenseLayer {
    /// Creates a layer with zeroed parameters. Call [`DenseLayer::init`] (or add it to a
    /// network) to draw initial weights.
    pub fn new(in_dim: usize, out_dim: usize, activation: Activation) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "dense layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let weights_len = in_dim
            .checked_mul(out_dim)
            .ok_or_else(|| Error::InvalidConfig("dense layer weight shape overflow".to_owned()))?;

        Ok(Self {
            in_dim,
            out_dim,
            weights: vec![0.0; weights_len],
            biases: vec![0.0; out_dim],
            activation,
            gradient_source: GradientSource::default(),
            input_cache: vec![0.0; in_dim],
            pre_activation: vec![0.0; out_dim],
            output: vec![0.0; out_dim],
            delta: vec![0.0; out_dim],
            input_delta: vec![0.0; in_dim],
            acc_weights: vec![0.0; weights_len],
            acc_biases: vec![0.0; out_dim],
        })
    }

    /// Builds a layer from explicit parameters.
    ///
    /// `weights` is row-major with shape `(out_dim, in_dim)`.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Result<Self> {
        let mut layer = Self::new(in_dim, out_dim, activation)?;
        if weights.len() != layer.weights.len() {
            return Err(Error::InvalidData(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != out_dim {
            return Err(Error::InvalidData(format!(
                "biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().chain(&biases).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "dense parameters must contain only finite values".to_owned(),
            ));
        }
        layer.weights = weights;
        layer.biases = biases;
        Ok(layer)
    }

    pub fn with_gradient_source(mut self, source: GradientSource) -> Self {
        self.gradient_source = source;
        self
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn gradient_source(&self) -> GradientSource {
        self.gradient_source
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    #[inline]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    #[inline]
    pub fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    #[inline]
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    /// He-style initialization: weights uniform in `[-1, 1]` scaled by
    /// `sqrt(2 / in_dim)`, biases zero.
    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let scale = (2.0 / self.in_dim as f32).sqrt();
        for w in &mut self.weights {
            *w = rng.gen_range(-1.0_f32..=1.0) * scale;
        }
        self.biases.fill(0.0);
    }

    /// Forward pass for a single sample.
    ///
    /// Computes `z = W * input + b` and `output = activation(z)`, caching `input` and `z`
    /// for the backward and update steps.
    pub fn forward(&mut self, input: &[f32]) -> Result<&[f32]> {
        check_len(self.in_dim, input.len())?;
        self.input_cache.copy_from_slice(input);

        for o in 0..self.out_dim {
            let mut sum = self.biases[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                sum = self.weights[row + i].mul_add(input[i], sum);
            }
            self.pre_activation[o] = sum;
            self.output[o] = self.activation.forward(sum);
        }

        Ok(&self.output)
    }

    /// Backward pass for a single sample.
    ///
    /// Computes `delta[o] = d_output[o] * act'(s[o])`, where `s` is chosen by the layer's
    /// [`GradientSource`], and returns the gradient w.r.t. the layer input (`W^T delta`).
    ///
    /// Must be called after `forward` and before `update`.
    pub fn backward(&mut self, d_output: &[f32]) -> Result<&[f32]> {
        check_len(self.out_dim, d_output.len())?;

        self.input_delta.fill(0.0);
        for o in 0..self.out_dim {
            let at = match self.gradient_source {
                GradientSource::PreActivation => self.pre_activation[o],
                GradientSource::PostActivation => self.output[o],
            };
            let d_z = d_output[o] * self.activation.derivative(at);
            self.delta[o] = d_z;

            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                self.input_delta[i] = self.weights[row + i].mul_add(d_z, self.input_delta[i]);
            }
        }

        Ok(&self.input_delta)
    }

    /// SGD step from the last backward pass: `w -= lr * delta * input`, `b -= lr * delta`.
    pub fn update(&mut self, lr: f32) {
        for o in 0..self.out_dim {
            let step = lr * self.delta[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                self.weights[row + i] -= step * self.input_cache[i];
            }
            self.biases[o] -= step;
        }
    }

    /// Adds the gradients of the last backward pass to the batch accumulators.
    pub(crate) fn accumulate(&mut self) {
        for o in 0..self.out_dim {
            let d = self.delta[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                self.acc_weights[row + i] = d.mul_add(self.input_cache[i], self.acc_weights[row + i]);
            }
            self.acc_biases[o] += d;
        }
    }

    /// Applies the mean of the accumulated gradients over `count` samples and clears
    /// the accumulators.
    pub(crate) fn apply_accumulated(&mut self, lr: f32, count: usize) {
        let scale = lr / count as f32;
        for (w, g) in self.weights.iter_mut().zip(&mut self.acc_weights) {
            *w -= scale * *g;
            *g = 0.0;
        }
        for (b, g) in self.biases.iter_mut().zip(&mut self.acc_biases) {
            *b -= scale * *g;
            *g = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn identity_dense_computes_weighted_sum() {
        let mut layer =
            DenseLayer::from_parts(2, 1, Activation::Identity, vec![1.0, 1.0], vec![0.0]).unwrap();
        let out = layer.forward(&[2.0, 3.0]).unwrap();
        assert_eq!(out, &[5.0]);
    }

    #[test]
    fn rejects_zero_dims() {
        assert!(matches!(
            DenseLayer::new(0, 3, Activation::ReLU),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            DenseLayer::new(3, 0, Activation::ReLU),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn forward_rejects_wrong_input_len() {
        let mut layer = DenseLayer::new(3, 2, Activation::Tanh).unwrap();
        let err = layer.forward(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn init_is_scaled_uniform_with_zero_biases() {
        let mut layer = DenseLayer::new(8, 16, Activation::ReLU).unwrap();
        layer.biases_mut().fill(3.0);
        let mut rng = StdRng::seed_from_u64(7);
        layer.init(&mut rng);

        let bound = (2.0_f32 / 8.0).sqrt();
        assert!(layer.weights().iter().all(|w| w.abs() <= bound + 1e-6));
        assert!(layer.weights().iter().any(|&w| w != 0.0));
        assert!(layer.biases().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn update_applies_outer_product_of_delta_and_input() {
        let mut layer =
            DenseLayer::from_parts(2, 1, Activation::Identity, vec![1.0, 1.0], vec![0.0]).unwrap();
        layer.forward(&[2.0, 3.0]).unwrap();
        layer.backward(&[0.5]).unwrap();
        layer.update(0.1);

        assert_abs_diff_eq!(layer.weights()[0], 1.0 - 0.1 * 0.5 * 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.weights()[1], 1.0 - 0.1 * 0.5 * 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.biases()[0], -0.05, epsilon = 1e-6);
    }

    #[test]
    fn backward_returns_input_gradient() {
        let mut layer = DenseLayer::from_parts(
            2,
            2,
            Activation::Identity,
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.0, 0.0],
        )
        .unwrap();
        layer.forward(&[1.0, 1.0]).unwrap();
        let d_in = layer.backward(&[1.0, 10.0]).unwrap().to_vec();
        // W^T [1, 10] = [1 + 30, 2 + 40]
        assert_eq!(d_in, vec![31.0, 42.0]);
        assert_eq!(layer.delta(), &[1.0, 10.0]);
    }

    #[test]
    fn gradient_source_changes_sigmoid_delta() {
        let build = |source| {
            DenseLayer::from_parts(1, 1, Activation::Sigmoid, vec![2.0], vec![0.0])
                .unwrap()
                .with_gradient_source(source)
        };
        let mut pre = build(GradientSource::PreActivation);
        let mut post = build(GradientSource::PostActivation);

        pre.forward(&[1.0]).unwrap();
        post.forward(&[1.0]).unwrap();
        pre.backward(&[1.0]).unwrap();
        post.backward(&[1.0]).unwrap();

        let y = Activation::Sigmoid.forward(2.0);
        assert_abs_diff_eq!(pre.delta()[0], y * (1.0 - y), epsilon = 1e-6);
        assert_abs_diff_eq!(
            post.delta()[0],
            Activation::Sigmoid.derivative(y),
            epsilon = 1e-6
        );
        assert!((pre.delta()[0] - post.delta()[0]).abs() > 1e-3);
    }

    #[test]
    fn pre_activation_gradient_matches_numeric_gradient() {
        let weights = vec![0.4, -0.3, 0.8, 0.1, -0.5, 0.2];
        let biases = vec![0.05, -0.1];
        let input = [0.3_f32, -0.7, 0.9];
        let target = [0.2_f32, -0.4];

        let loss_at = |w: &[f32], x: &[f32]| {
            let mut l =
                DenseLayer::from_parts(3, 2, Activation::Tanh, w.to_vec(), biases.clone()).unwrap();
            let y = l.forward(x).unwrap();
            crate::loss::mse(y, &target)
        };

        let mut layer =
            DenseLayer::from_parts(3, 2, Activation::Tanh, weights.clone(), biases.clone()).unwrap();
        let y = layer.forward(&input).unwrap().to_vec();
        // d/dy of mean((y - t)^2) over 2 outputs.
        let d_out: Vec<f32> = y
            .iter()
            .zip(&target)
            .map(|(p, t)| crate::loss::mse_derivative(*p, *t) / 2.0)
            .collect();
        let d_in = layer.backward(&d_out).unwrap().to_vec();

        let eps = 1e-3_f32;
        for i in 0..input.len() {
            let mut plus = input;
            let mut minus = input;
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (loss_at(&weights, &plus) - loss_at(&weights, &minus)) / (2.0 * eps);
            assert_abs_diff_eq!(d_in[i], numeric, epsilon = 1e-3);
        }

        for p in 0..weights.len() {
            let mut plus = weights.clone();
            let mut minus = weights.clone();
            plus[p] += eps;
            minus[p] -= eps;
            let numeric = (loss_at(&plus, &input) - loss_at(&minus, &input)) / (2.0 * eps);
            let (o, i) = (p / 3, p % 3);
            let analytic = layer.delta()[o] * input[i];
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-3);
        }
    }

    #[test]
    fn accumulated_update_over_one_sample_equals_direct_update() {
        let make = || {
            DenseLayer::from_parts(2, 2, Activation::ReLU, vec![0.5, -0.2, 0.3, 0.9], vec![0.1, 0.0])
                .unwrap()
        };
        let mut direct = make();
        let mut batched = make();
        for layer in [&mut direct, &mut batched] {
            layer.forward(&[1.0, 2.0]).unwrap();
            layer.backward(&[0.3, -0.6]).unwrap();
        }
        direct.update(0.05);
        batched.accumulate();
        batched.apply_accumulated(0.05, 1);

        for (a, b) in direct.weights().iter().zip(batched.weights()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
        for (a, b) in direct.biases().iter().zip(batched.biases()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}
