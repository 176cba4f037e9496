//! The layer variants a [`crate::Network`] is assembled from.
//!
//! `Layer` is a closed set of variants dispatched by `match`. Capabilities that only
//! some variants have (parameter initialization, a training/inference switch) are
//! exposed as queries instead of being discovered by probing concrete types.

use rand::Rng;

use crate::{BatchNormLayer, DenseLayer, DropoutLayer, ResidualBlock, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Whether stochastic/statistics-tracking layers behave as in training or inference.
pub enum Mode {
    #[default]
    Training,
    Inference,
}

impl Mode {
    #[inline]
    pub fn from_training(training: bool) -> Self {
        if training {
            Mode::Training
        } else {
            Mode::Inference
        }
    }
}

#[derive(Debug, Clone)]
pub enum Layer {
    Dense(DenseLayer),
    BatchNorm(BatchNormLayer),
    Dropout(DropoutLayer),
    Residual(ResidualBlock),
}

impl Layer {
    /// Short type tag, also used in model files.
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "dense",
            Layer::BatchNorm(_) => "batch_norm",
            Layer::Dropout(_) => "dropout",
            Layer::Residual(_) => "residual",
        }
    }

    /// Input width this layer requires, or `None` if it accepts any width.
    pub fn input_dim(&self) -> Option<usize> {
        match self {
            Layer::Dense(l) => Some(l.in_dim()),
            Layer::BatchNorm(l) => Some(l.features()),
            Layer::Dropout(_) => None,
            Layer::Residual(l) => l.input_dim(),
        }
    }

    /// Output width for an input of width `input_dim`.
    pub fn output_dim(&self, input_dim: Option<usize>) -> Option<usize> {
        match self {
            Layer::Dense(l) => Some(l.out_dim()),
            Layer::BatchNorm(l) => Some(l.features()),
            Layer::Dropout(_) => input_dim,
            Layer::Residual(l) => l.input_dim().or(input_dim),
        }
    }

    pub fn has_parameters(&self) -> bool {
        match self {
            Layer::Dense(_) | Layer::BatchNorm(_) => true,
            Layer::Dropout(_) => false,
            Layer::Residual(l) => l.has_parameters(),
        }
    }

    /// True for dropout, batch norm, and residual blocks containing either.
    pub fn supports_mode_switch(&self) -> bool {
        match self {
            Layer::BatchNorm(_) | Layer::Dropout(_) => true,
            Layer::Dense(_) => false,
            Layer::Residual(l) => l.supports_mode_switch(),
        }
    }

    /// Sets the mode on layers that have one; a no-op for the others.
    pub fn set_mode(&mut self, mode: Mode) {
        match self {
            Layer::BatchNorm(l) => l.set_mode(mode),
            Layer::Dropout(l) => l.set_mode(mode),
            Layer::Residual(l) => l.set_mode(mode),
            Layer::Dense(_) => {}
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            Layer::BatchNorm(l) => Some(l.mode()),
            Layer::Dropout(l) => Some(l.mode()),
            Layer::Residual(l) => l.mode(),
            Layer::Dense(_) => None,
        }
    }

    /// Initializes parameters. Only dense layers draw from `rng`.
    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self {
            Layer::Dense(l) => l.init(rng),
            Layer::BatchNorm(l) => l.init(),
            Layer::Residual(l) => l.init(rng),
            Layer::Dropout(_) => {}
        }
    }

    /// Result of the last forward pass.
    pub fn output(&self) -> &[f32] {
        match self {
            Layer::Dense(l) => l.output(),
            Layer::BatchNorm(l) => l.output(),
            Layer::Dropout(l) => l.output(),
            Layer::Residual(l) => l.output(),
        }
    }

    /// Result of the last backward pass, sized to the layer output.
    pub fn delta(&self) -> &[f32] {
        match self {
            Layer::Dense(l) => l.delta(),
            Layer::BatchNorm(l) => l.delta(),
            Layer::Dropout(l) => l.delta(),
            Layer::Residual(l) => l.delta(),
        }
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, input: &[f32], rng: &mut R) -> Result<&[f32]> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::BatchNorm(l) => l.forward(input),
            Layer::Dropout(l) => Ok(l.forward(input, rng)),
            Layer::Residual(l) => l.forward(input, rng),
        }
    }

    /// Transforms the gradient w.r.t. this layer's output into the gradient w.r.t. its
    /// input.
    pub fn backward(&mut self, d_output: &[f32]) -> Result<&[f32]> {
        match self {
            Layer::Dense(l) => l.backward(d_output),
            Layer::BatchNorm(l) => l.backward(d_output),
            Layer::Dropout(l) => l.backward(d_output),
            Layer::Residual(l) => l.backward(d_output),
        }
    }

    pub fn update(&mut self, lr: f32) {
        match self {
            Layer::Dense(l) => l.update(lr),
            Layer::BatchNorm(l) => l.update(lr),
            Layer::Residual(l) => l.update(lr),
            Layer::Dropout(_) => {}
        }
    }

    pub(crate) fn accumulate(&mut self) {
        match self {
            Layer::Dense(l) => l.accumulate(),
            Layer::BatchNorm(l) => l.accumulate(),
            Layer::Residual(l) => l.accumulate(),
            Layer::Dropout(_) => {}
        }
    }

    pub(crate) fn apply_accumulated(&mut self, lr: f32, count: usize) {
        match self {
            Layer::Dense(l) => l.apply_accumulated(lr, count),
            Layer::BatchNorm(l) => l.apply_accumulated(lr, count),
            Layer::Residual(l) => l.apply_accumulated(lr, count),
            Layer::Dropout(_) => {}
        }
    }
}

impl From<DenseLayer> for Layer {
    fn from(layer: DenseLayer) -> Self {
        Layer::Dense(layer)
    }
}

impl From<BatchNormLayer> for Layer {
    fn from(layer: BatchNormLayer) -> Self {
        Layer::BatchNorm(layer)
    }
}

impl From<DropoutLayer> for Layer {
    fn from(layer: DropoutLayer) -> Self {
        Layer::Dropout(layer)
    }
}

impl From<ResidualBlock> for Layer {
    fn from(layer: ResidualBlock) -> Self {
        Layer::Residual(layer)
    }
}
