//! Network builder.
//!
//! `NetworkBuilder` assembles a layer stack from an input width. Each added layer takes
//! its input width from the previous one, so the chain is correct by construction:
//!
//! ```rust
//! use ffnet::{Activation, Loss, NetworkBuilder};
//!
//! # fn main() -> ffnet::Result<()> {
//! let net = NetworkBuilder::new(4)?
//!     .loss(Loss::CrossEntropy)
//!     .dense(64, Activation::ReLU)?
//!     .batch_norm()?
//!     .dropout(0.3)?
//!     .dense(2, Activation::Sigmoid)?
//!     .build_with_seed(0)?;
//! assert_eq!(net.output_dim(), Some(2));
//! # Ok(())
//! # }
//! ```

use crate::{
    Activation, BatchNormLayer, DenseLayer, DropoutLayer, Error, GradientSource, Layer, Loss,
    Network, ResidualBlock, Result,
};

#[derive(Debug, Clone)]
/// Builder for a [`Network`].
pub struct NetworkBuilder {
    input_dim: usize,
    current_dim: usize,
    loss: Loss,
    layers: Vec<Layer>,
}

impl NetworkBuilder {
    /// Start building a network that accepts inputs of length `input_dim`.
    ///
    /// The loss defaults to [`Loss::Mse`].
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            current_dim: input_dim,
            loss: Loss::Mse,
            layers: Vec::new(),
        })
    }

    /// Convenience constructor for a dense-only stack.
    ///
    /// `sizes` includes input and output dimensions, so its length must be at least 2.
    /// `activations` must have length `sizes.len() - 1`.
    pub fn from_sizes(sizes: &[usize], activations: &[Activation]) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "sizes must include input and output dims".to_owned(),
            ));
        }
        if activations.len() != sizes.len() - 1 {
            return Err(Error::InvalidConfig(format!(
                "activations length {} does not match sizes.len() - 1 ({})",
                activations.len(),
                sizes.len() - 1
            )));
        }

        let mut b = Self::new(sizes[0])?;
        for (&out_dim, &act) in sizes[1..].iter().zip(activations) {
            b = b.dense(out_dim, act)?;
        }
        Ok(b)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Add a dense layer with `out_dim` outputs.
    pub fn dense(self, out_dim: usize, activation: Activation) -> Result<Self> {
        self.dense_with(out_dim, activation, GradientSource::default())
    }

    pub fn dense_with(
        mut self,
        out_dim: usize,
        activation: Activation,
        gradient_source: GradientSource,
    ) -> Result<Self> {
        let layer = DenseLayer::new(self.current_dim, out_dim, activation)?
            .with_gradient_source(gradient_source);
        self.current_dim = out_dim;
        self.layers.push(layer.into());
        Ok(self)
    }

    /// Add batch normalization over the current width with default epsilon/momentum.
    pub fn batch_norm(mut self) -> Result<Self> {
        self.layers
            .push(BatchNormLayer::new(self.current_dim)?.into());
        Ok(self)
    }

    pub fn batch_norm_with(mut self, epsilon: f32, momentum: f32) -> Result<Self> {
        self.layers
            .push(BatchNormLayer::with_params(self.current_dim, epsilon, momentum)?.into());
        Ok(self)
    }

    pub fn dropout(mut self, rate: f32) -> Result<Self> {
        self.layers.push(DropoutLayer::new(rate)?.into());
        Ok(self)
    }

    /// Add a residual block whose body is assembled by `body`, starting from the
    /// current width.
    ///
    /// The body must end at the width it started from:
    ///
    /// ```rust
    /// use ffnet::{Activation, NetworkBuilder};
    ///
    /// # fn main() -> ffnet::Result<()> {
    /// let net = NetworkBuilder::new(4)?
    ///     .dense(8, Activation::ReLU)?
    ///     .residual(|b| b.dense(16, Activation::ReLU)?.dense(8, Activation::Identity))?
    ///     .dense(1, Activation::Sigmoid)?
    ///     .build_with_seed(0)?;
    /// assert_eq!(net.layers()[1].kind(), "residual");
    /// # Ok(())
    /// # }
    /// ```
    pub fn residual<F>(mut self, body: F) -> Result<Self>
    where
        F: FnOnce(NetworkBuilder) -> Result<NetworkBuilder>,
    {
        let inner = body(NetworkBuilder::new(self.current_dim)?)?;
        self.layers.push(ResidualBlock::new(inner.layers)?.into());
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        let network = Network::with_seed(self.loss, seed);
        self.build_into(network)
    }

    /// Build with a seed drawn from the OS.
    pub fn build(self) -> Result<Network> {
        let network = Network::new(self.loss);
        self.build_into(network)
    }

    fn build_into(self, mut network: Network) -> Result<Network> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(
                "network must have at least one layer".to_owned(),
            ));
        }
        for layer in self.layers {
            network.add_layer(layer)?;
        }
        Ok(network)
    }
}
