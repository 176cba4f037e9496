//! Inverted dropout.
//!
//! During training each element is kept with probability `1 - rate` and survivors are
//! scaled by `1 / (1 - rate)`, so the expected output equals the input. In inference
//! mode the layer is the identity.
//!
//! The layer owns no randomness: the mask is drawn from the RNG passed to `forward`.

use rand::Rng;

use crate::{Error, Mode, Result};

#[derive(Debug, Clone)]
pub struct DropoutLayer {
    rate: f32,
    mode: Mode,
    mask: Vec<bool>,
    output: Vec<f32>,
    delta: Vec<f32>,
}

impl DropoutLayer {
    /// `rate` is the probability of dropping an element and must be in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        Ok(Self {
            rate,
            mode: Mode::Training,
            mask: Vec::new(),
            output: Vec::new(),
            delta: Vec::new(),
        })
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Mask drawn by the last training-mode forward pass (`true` = kept).
    #[inline]
    pub fn mask(&self) -> &[bool] {
        &self.mask
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
    fn scale(&self) -> f32 {
        1.0 / (1.0 - self.rate)
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, input: &[f32], rng: &mut R) -> &[f32] {
        self.output.clear();
        self.output.extend_from_slice(input);

        if self.mode == Mode::Training {
            let keep_prob = f64::from(1.0 - self.rate);
            let scale = self.scale();
            self.mask.resize(input.len(), false);
            for (keep, y) in self.mask.iter_mut().zip(&mut self.output) {
                *keep = rng.gen_bool(keep_prob);
                *y = if *keep { *y * scale } else { 0.0 };
            }
        }

        &self.output
    }

    /// Scales the incoming gradient with the mask of the matching forward pass.
    ///
    /// In training mode `d_output` must have the length of the last forward input.
    pub fn backward(&mut self, d_output: &[f32]) -> Result<&[f32]> {
        self.delta.clear();
        self.delta.extend_from_slice(d_output);

        if self.mode == Mode::Training {
            crate::error::check_len(self.mask.len(), d_output.len())?;
            let scale = self.scale();
            for (d, &keep) in self.delta.iter_mut().zip(&self.mask) {
                *d = if keep { *d * scale } else { 0.0 };
            }
        }

        Ok(&self.delta)
    }
}
