//! A small feed-forward network engine.
//!
//! `ffnet` trains and runs stacks of dense, batch-normalization, dropout and residual
//! layers on single `f32` feature vectors. Callers hand it fixed-length numeric features
//! and get back score/probability vectors.
//!
//! # Design goals
//!
//! - Reproducible runs: the [`Network`] owns the only RNG. Weight initialization,
//!   dropout masks and per-epoch shuffling all draw from it, so one seed replays a whole
//!   training run.
//! - Clear contracts: shapes are checked at assembly time ([`Network::add_layer`]) and on
//!   every forward/backward call, and reported as [`Error::ShapeMismatch`].
//! - A closed set of layer kinds ([`Layer`]) dispatched by `match`, with explicit
//!   capability queries such as [`Layer::supports_mode_switch`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - Dense weights are row-major with shape `(out_dim, in_dim)`.
//! - [`Dataset`] stores samples contiguously in row-major layout.
//!
//! # Gradient conventions
//!
//! - The loss derivative seeds backprop per output unit, e.g. `2 * (pred - target)` for
//!   MSE.
//! - Dense layers evaluate the activation derivative at the pre-activation value by
//!   default; see [`GradientSource`].
//! - Batch normalization backpropagates through `gamma` only.
//! - [`BatchMode::PerSample`] (the default) updates after every sample;
//!   [`BatchMode::Mean`] applies the averaged gradient once per mini-batch.
//!
//! # Quick start
//!
//! ```rust
//! use ffnet::{Activation, BatchNormLayer, DenseLayer, DropoutLayer, Loss, Network};
//!
//! # fn main() -> ffnet::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
//!
//! let mut net = Network::with_seed(Loss::Mse, 0);
//! net.add_layer(DenseLayer::new(2, 8, Activation::ReLU)?)?;
//! net.add_layer(BatchNormLayer::new(8)?)?;
//! net.add_layer(DropoutLayer::new(0.1)?)?;
//! net.add_layer(DenseLayer::new(8, 1, Activation::Sigmoid)?)?;
//!
//! let report = net.train(&xs, &ys, 50, 0.05, 2)?;
//! assert_eq!(report.epoch_losses.len(), 50);
//!
//! net.set_training(false);
//! let y = net.predict(&[1.0, 0.0])?;
//! assert_eq!(y.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod batch_norm;
pub mod builder;
pub mod data;
pub mod dense;
pub mod dropout;
pub mod error;
pub mod layer;
pub mod loss;
pub mod network;
pub mod residual;
pub mod train;

#[cfg(feature = "serde")]
pub mod serde_model;

pub use activation::Activation;
pub use batch_norm::{BatchNormLayer, BatchNormState};
pub use builder::NetworkBuilder;
pub use data::Dataset;
pub use dense::{DenseLayer, GradientSource};
pub use dropout::DropoutLayer;
pub use error::{Error, Result};
pub use layer::{Layer, Mode};
pub use loss::Loss;
pub use network::{Hyperparameters, Network};
pub use residual::ResidualBlock;
pub use train::{BatchMode, FitReport, TrainConfig};
