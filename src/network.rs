use std::collections::BTreeMap;

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::check_len;
use crate::{Error, Layer, Loss, Mode, Result};

/// Training metadata stored alongside the model.
///
/// The engine itself only writes `learning_rate`: the rate the most recent training run
/// ended with (after any adaptive decay). `momentum`, `dropout_rate` and `features` are
/// caller-owned metadata. They are saved and loaded as given and are not derived from,
/// or applied to, the layers: a [`crate::BatchNormLayer`] keeps its own momentum and
/// each [`crate::DropoutLayer`] its own rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hyperparameters {
    pub learning_rate: f32,
    pub momentum: f32,
    pub dropout_rate: f32,
    /// Named on/off switches, e.g. `"use_residual_connections"`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: BTreeMap<String, bool>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            momentum: 0.9,
            dropout_rate: 0.2,
            features: BTreeMap::new(),
        }
    }
}

/// An ordered stack of layers trained with a single loss.
///
/// The network owns the only random number generator involved in training. Weight
/// initialization, dropout masks and shuffling all draw from it, so a network built
/// with [`Network::with_seed`] replays exactly.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    loss: Loss,
    seed: u64,
    rng: StdRng,
    training: bool,
    hyperparameters: Hyperparameters,

    // Backprop buffers, reused across calls.
    grad: Vec<f32>,
    grad_next: Vec<f32>,
}

impl Network {
    /// Creates an empty network with a seed drawn from the OS.
    ///
    /// The seed is recorded (see [`Network::seed`]) and saved with the model.
    pub fn new(loss: Loss) -> Self {
        Self::with_seed(loss, rand::random())
    }

    pub fn with_seed(loss: Loss, seed: u64) -> Self {
        Self {
            layers: Vec::new(),
            loss,
            seed,
            rng: StdRng::seed_from_u64(seed),
            training: true,
            hyperparameters: Hyperparameters::default(),
            grad: Vec::new(),
            grad_next: Vec::new(),
        }
    }

    /// Initializes `layer` from the network RNG and appends it.
    ///
    /// Fails with `ShapeMismatch` if the layer's input width does not match the
    /// current output width. The layer takes on the network's current mode.
    pub fn add_layer(&mut self, layer: impl Into<Layer>) -> Result<()> {
        let mut layer = layer.into();
        self.check_chain(&layer)?;
        layer.init(&mut self.rng);
        self.push(layer);
        Ok(())
    }

    /// Appends `layer` keeping its current parameters.
    pub fn add_initialized_layer(&mut self, layer: impl Into<Layer>) -> Result<()> {
        let layer = layer.into();
        self.check_chain(&layer)?;
        self.push(layer);
        Ok(())
    }

    fn check_chain(&self, layer: &Layer) -> Result<()> {
        if let (Some(prev_out), Some(next_in)) = (self.output_dim(), layer.input_dim()) {
            check_len(prev_out, next_in)?;
        }
        Ok(())
    }

    fn push(&mut self, mut layer: Layer) {
        layer.set_mode(Mode::from_training(self.training));
        debug!(
            "network: layer {} is {} ({:?} -> {:?})",
            self.layers.len(),
            layer.kind(),
            layer.input_dim(),
            layer.output_dim(self.output_dim()),
        );
        self.layers.push(layer);
    }

    /// Input width of the first layer that fixes one.
    ///
    /// `None` for an empty network or one made only of dropout layers.
    pub fn input_dim(&self) -> Option<usize> {
        self.layers.iter().find_map(Layer::input_dim)
    }

    pub fn output_dim(&self) -> Option<usize> {
        self.layers
            .iter()
            .fold(None, |dim, layer| layer.output_dim(dim))
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    #[inline]
    pub fn layer_mut(&mut self, idx: usize) -> Option<&mut Layer> {
        self.layers.get_mut(idx)
    }

    #[inline]
    pub fn loss(&self) -> Loss {
        self.loss
    }

    /// Seed the network RNG was created from.
    ///
    /// This is the construction seed; it does not advance as training draws from the
    /// RNG, so a saved and reloaded network restarts the same random sequence.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn is_training(&self) -> bool {
        self.training
    }

    #[inline]
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    #[inline]
    pub fn hyperparameters_mut(&mut self) -> &mut Hyperparameters {
        &mut self.hyperparameters
    }

    #[inline]
    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Switches every layer that has a mode (dropout, batch norm) between training and
    /// inference behavior.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        let mode = Mode::from_training(training);
        for layer in self.layers.iter_mut().filter(|l| l.supports_mode_switch()) {
            layer.set_mode(mode);
        }
    }

    fn empty_error() -> Error {
        Error::InvalidConfig("network has no layers".to_owned())
    }

    /// Forward pass for a single sample.
    ///
    /// Each layer caches what its backward/update steps need. Returns the output of the
    /// last layer.
    pub fn forward(&mut self, input: &[f32]) -> Result<&[f32]> {
        if self.layers.is_empty() {
            return Err(Self::empty_error());
        }

        let Self { layers, rng, .. } = self;
        for idx in 0..layers.len() {
            // Borrow the previous output immutably and the current layer mutably.
            let (left, right) = layers.split_at_mut(idx);
            let layer_input = if idx == 0 {
                input
            } else {
                left[idx - 1].output()
            };
            right[0].forward(layer_input, &mut *rng)?;
        }

        self.layers
            .last()
            .map(Layer::output)
            .ok_or_else(Self::empty_error)
    }

    /// Forward pass returning an owned output.
    pub fn predict(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.forward(input).map(<[f32]>::to_vec)
    }

    /// Backward pass for the sample of the most recent `forward` call.
    ///
    /// The output delta is seeded element-wise from the loss derivative and then passed
    /// through the layers in reverse order.
    pub fn backward(&mut self, target: &[f32]) -> Result<()> {
        let last = self.layers.last().ok_or_else(Self::empty_error)?;
        let output = last.output();
        check_len(output.len(), target.len())?;

        let loss = self.loss;
        self.grad.clear();
        self.grad.extend(
            output
                .iter()
                .zip(target)
                .map(|(&pred, &t)| loss.derivative(pred, t)),
        );

        for layer in self.layers.iter_mut().rev() {
            let d_input = layer.backward(&self.grad)?;
            self.grad_next.clear();
            self.grad_next.extend_from_slice(d_input);
            std::mem::swap(&mut self.grad, &mut self.grad_next);
        }

        Ok(())
    }

    /// Gradient w.r.t. the network input from the most recent `backward` call.
    #[inline]
    pub fn input_gradient(&self) -> &[f32] {
        &self.grad
    }

    /// Applies an SGD step to every layer, in forward order.
    pub fn update(&mut self, lr: f32) {
        for layer in &mut self.layers {
            layer.update(lr);
        }
    }

    pub(crate) fn accumulate(&mut self) {
        for layer in &mut self.layers {
            layer.accumulate();
        }
    }

    pub(crate) fn apply_accumulated(&mut self, lr: f32, count: usize) {
        for layer in &mut self.layers {
            layer.apply_accumulated(lr, count);
        }
    }
}
