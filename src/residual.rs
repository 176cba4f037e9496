//! Residual block: a sub-stack of layers wrapped by an identity skip connection.
//!
//! Forward computes `body(input) + input`; backward returns the body's input gradient
//! plus the upstream gradient. The body must map its input width back onto itself.

use rand::Rng;

use crate::error::check_len;
use crate::{Error, Layer, Mode, Result};

#[derive(Debug, Clone)]
pub struct ResidualBlock {
    layers: Vec<Layer>,
    output: Vec<f32>,
    delta: Vec<f32>,

    grad: Vec<f32>,
    grad_next: Vec<f32>,
}

impl ResidualBlock {
    /// Wraps `layers` as the body of a residual block.
    ///
    /// Fails with `InvalidConfig` for an empty body or one whose output width differs
    /// from its input width, and with `ShapeMismatch` if the body does not chain.
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "residual block must have at least one layer".to_owned(),
            ));
        }

        let input_dim = layers.iter().find_map(Layer::input_dim);
        let mut dim = input_dim;
        for layer in &layers {
            if let (Some(prev_out), Some(next_in)) = (dim, layer.input_dim()) {
                check_len(prev_out, next_in)?;
            }
            dim = layer.output_dim(dim);
        }
        if let (Some(input_dim), Some(output_dim)) = (input_dim, dim) {
            if input_dim != output_dim {
                return Err(Error::InvalidConfig(format!(
                    "residual body maps {input_dim} features to {output_dim}; the skip \
                     connection needs equal widths"
                )));
            }
        }

        Ok(Self {
            layers,
            output: Vec::new(),
            delta: Vec::new(),
            grad: Vec::new(),
            grad_next: Vec::new(),
        })
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Width the block requires, or `None` if its body accepts any width.
    pub fn input_dim(&self) -> Option<usize> {
        self.layers.iter().find_map(Layer::input_dim)
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Gradient w.r.t. the block input from the last backward pass.
    #[inline]
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    pub fn has_parameters(&self) -> bool {
        self.layers.iter().any(Layer::has_parameters)
    }

    pub fn supports_mode_switch(&self) -> bool {
        self.layers.iter().any(Layer::supports_mode_switch)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        for layer in &mut self.layers {
            layer.set_mode(mode);
        }
    }

    /// Mode of the first body layer that has one.
    pub fn mode(&self) -> Option<Mode> {
        self.layers.iter().find_map(Layer::mode)
    }

    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for layer in &mut self.layers {
            layer.init(rng);
        }
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, input: &[f32], rng: &mut R) -> Result<&[f32]> {
        let Self { layers, output, .. } = self;
        for idx in 0..layers.len() {
            let (left, right) = layers.split_at_mut(idx);
            let layer_input = if idx == 0 {
                input
            } else {
                left[idx - 1].output()
            };
            right[0].forward(layer_input, &mut *rng)?;
        }

        let body = layers.last().map(Layer::output).unwrap_or_default();
        check_len(input.len(), body.len())?;
        output.clear();
        output.extend(body.iter().zip(input).map(|(&y, &x)| y + x));

        Ok(&self.output)
    }

    pub fn backward(&mut self, d_output: &[f32]) -> Result<&[f32]> {
        self.grad.clear();
        self.grad.extend_from_slice(d_output);

        for layer in self.layers.iter_mut().rev() {
            let d_input = layer.backward(&self.grad)?;
            self.grad_next.clear();
            self.grad_next.extend_from_slice(d_input);
            std::mem::swap(&mut self.grad, &mut self.grad_next);
        }

        check_len(d_output.len(), self.grad.len())?;
        self.delta.clear();
        self.delta
            .extend(self.grad.iter().zip(d_output).map(|(&g, &d)| g + d));

        Ok(&self.delta)
    }

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
