//! Batch normalization over a single sample.
//!
//! In training mode the statistics are one scalar mean and variance computed across the
//! features of the current input vector (not across a mini-batch). Those scalars feed
//! per-feature running averages that inference mode uses instead.
//!
//! The backward pass only scales by `gamma`; no gradient flows through the mean and
//! variance computation.

use crate::error::check_len;
use crate::{Error, Mode, Result};

pub const DEFAULT_EPSILON: f32 = 1e-5;
pub const DEFAULT_MOMENTUM: f32 = 0.99;

#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    epsilon: f32,
    momentum: f32,
    gamma: Vec<f32>,
    beta: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
    mode: Mode,

    normalized_cache: Vec<f32>,
    output: Vec<f32>,
    delta: Vec<f32>,

    acc_gamma: Vec<f32>,
    acc_beta: Vec<f32>,
}

/// Numeric state of a [`BatchNormLayer`], as stored in a model file.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormState {
    pub epsilon: f32,
    pub momentum: f32,
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
    pub running_mean: Vec<f32>,
    pub running_var: Vec<f32>,
}

impl BatchNormLayer {
    /// Creates a layer over `features` inputs with the default epsilon and momentum.
    pub fn new(features: usize) -> Result<Self> {
        Self::with_params(features, DEFAULT_EPSILON, DEFAULT_MOMENTUM)
    }

    pub fn with_params(features: usize, epsilon: f32, momentum: f32) -> Result<Self> {
        if features == 0 {
            return Err(Error::InvalidConfig(
                "batch norm feature count must be > 0".to_owned(),
            ));
        }
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "batch norm epsilon must be finite and > 0, got {epsilon}"
            )));
        }
        if !(momentum.is_finite() && (0.0..=1.0).contains(&momentum)) {
            return Err(Error::InvalidConfig(format!(
                "batch norm momentum must be finite and in [0,1], got {momentum}"
            )));
        }

        Ok(Self {
            epsilon,
            momentum,
            gamma: vec![1.0; features],
            beta: vec![0.0; features],
            running_mean: vec![0.0; features],
            running_var: vec![1.0; features],
            mode: Mode::Training,
            normalized_cache: vec![0.0; features],
            output: vec![0.0; features],
            delta: vec![0.0; features],
            acc_gamma: vec![0.0; features],
            acc_beta: vec![0.0; features],
        })
    }

    /// Rebuilds a layer from stored state, validating lengths and values.
    pub fn from_state(state: BatchNormState) -> Result<Self> {
        let features = state.gamma.len();
        let mut layer = Self::with_params(features, state.epsilon, state.momentum)?;

        for (name, v) in [
            ("beta", &state.beta),
            ("running_mean", &state.running_mean),
            ("running_var", &state.running_var),
        ] {
            if v.len() != features {
                return Err(Error::InvalidData(format!(
                    "batch norm {name} length {} does not match gamma length {features}",
                    v.len()
                )));
            }
        }
        if state
            .gamma
            .iter()
            .chain(&state.beta)
            .chain(&state.running_mean)
            .chain(&state.running_var)
            .any(|v| !v.is_finite())
        {
            return Err(Error::InvalidData(
                "batch norm state must contain only finite values".to_owned(),
            ));
        }
        if state.running_var.iter().any(|&v| v < 0.0) {
            return Err(Error::InvalidData(
                "batch norm running_var must be >= 0".to_owned(),
            ));
        }

        layer.gamma = state.gamma;
        layer.beta = state.beta;
        layer.running_mean = state.running_mean;
        layer.running_var = state.running_var;
        Ok(layer)
    }

    pub fn state(&self) -> BatchNormState {
        BatchNormState {
            epsilon: self.epsilon,
            momentum: self.momentum,
            gamma: self.gamma.clone(),
            beta: self.beta.clone(),
            running_mean: self.running_mean.clone(),
            running_var: self.running_var.clone(),
        }
    }

    #[inline]
    pub fn features(&self) -> usize {
        self.gamma.len()
    }

    #[inline]
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    #[inline]
    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    #[inline]
    pub fn gamma(&self) -> &[f32] {
        &self.gamma
    }

    #[inline]
    pub fn gamma_mut(&mut self) -> &mut [f32] {
        &mut self.gamma
    }

    #[inline]
    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    #[inline]
    pub fn beta_mut(&mut self) -> &mut [f32] {
        &mut self.beta
    }

    #[inline]
    pub fn running_mean(&self) -> &[f32] {
        &self.running_mean
    }

    #[inline]
    pub fn running_var(&self) -> &[f32] {
        &self.running_var
    }

    #[inline]
    pub fn normalized(&self) -> &[f32] {
        &self.normalized_cache
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    #[inline]
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Resets `gamma`/`beta` to the identity transform and the running statistics to
    /// zero mean, unit variance.
    pub fn init(&mut self) {
        self.gamma.fill(1.0);
        self.beta.fill(0.0);
        self.running_mean.fill(0.0);
        self.running_var.fill(1.0);
    }

    pub fn forward(&mut self, input: &[f32]) -> Result<&[f32]> {
        check_len(self.features(), input.len())?;

        match self.mode {
            Mode::Training => {
                let n = input.len() as f32;
                let mean = input.iter().sum::<f32>() / n;
                let var = input
                    .iter()
                    .map(|&x| {
                        let d = x - mean;
                        d * d
                    })
                    .sum::<f32>()
                    / n;

                let keep = self.momentum;
                let blend = 1.0 - self.momentum;
                for (rm, rv) in self.running_mean.iter_mut().zip(&mut self.running_var) {
                    *rm = keep * *rm + blend * mean;
                    *rv = keep * *rv + blend * var;
                }

                let inv_std = 1.0 / (var + self.epsilon).sqrt();
                for i in 0..input.len() {
                    self.normalized_cache[i] = (input[i] - mean) * inv_std;
                }
            }
            Mode::Inference => {
                for i in 0..input.len() {
                    self.normalized_cache[i] = (input[i] - self.running_mean[i])
                        / (self.running_var[i] + self.epsilon).sqrt();
                }
            }
        }

        for i in 0..input.len() {
            self.output[i] = self.gamma[i].mul_add(self.normalized_cache[i], self.beta[i]);
        }
        Ok(&self.output)
    }

    /// `delta = d_output * gamma`; the same values are returned as the input gradient.
    pub fn backward(&mut self, d_output: &[f32]) -> Result<&[f32]> {
        check_len(self.features(), d_output.len())?;
        for i in 0..d_output.len() {
            self.delta[i] = d_output[i] * self.gamma[i];
        }
        Ok(&self.delta)
    }

    pub fn update(&mut self, lr: f32) {
        for i in 0..self.gamma.len() {
            self.gamma[i] -= lr * self.delta[i] * self.normalized_cache[i];
            self.beta[i] -= lr * self.delta[i];
        }
    }

    pub(crate) fn accumulate(&mut self) {
        for i in 0..self.gamma.len() {
            self.acc_gamma[i] = self.delta[i].mul_add(self.normalized_cache[i], self.acc_gamma[i]);
            self.acc_beta[i] += self.delta[i];
        }
    }

    pub(crate) fn apply_accumulated(&mut self, lr: f32, count: usize) {
        let scale = lr / count as f32;
        for i in 0..self.gamma.len() {
            self.gamma[i] -= scale * self.acc_gamma[i];
            self.beta[i] -= scale * self.acc_beta[i];
        }
        self.acc_gamma.fill(0.0);
        self.acc_beta.fill(0.0);
    }
}
