//! Model serialization/deserialization (feature: `serde`).
//!
//! This module defines a versioned, stable on-disk JSON format for `Network`.
//!
//! Design notes:
//! - We do NOT directly serialize internal layer structs, to keep the file format
//!   stable even if internal representation changes.
//! - Each layer entry carries a `type` tag; loading rebuilds the layer of that type
//!   first and then restores its numeric state.
//! - All deserialization validates dimensions, parameter lengths, the layer chain and
//!   that all parameters are finite. A load either fully succeeds or returns an error.
//! - JSON cannot encode NaN or infinity, so serialization refuses models with
//!   non-finite parameters instead of writing a file that would not load.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    Activation, BatchNormLayer, BatchNormState, DenseLayer, DropoutLayer, Error,
    GradientSource, Hyperparameters, Layer, Loss, Network, ResidualBlock, Result,
};

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerializedNetwork {
    pub format_version: u32,
    pub seed: u64,
    pub loss: Loss,
    pub training: bool,
    pub hyperparameters: Hyperparameters,
    pub layers: Vec<SerializedLayer>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerializedLayer {
    Dense {
        in_dim: usize,
        out_dim: usize,
        activation: SerializedActivation,
        #[serde(default)]
        gradient_source: GradientSource,
        /// Row-major (out_dim, in_dim).
        weights: Vec<f32>,
        biases: Vec<f32>,
    },
    BatchNorm {
        features: usize,
        epsilon: f32,
        momentum: f32,
        gamma: Vec<f32>,
        beta: Vec<f32>,
        running_mean: Vec<f32>,
        running_var: Vec<f32>,
    },
    Dropout {
        rate: f32,
    },
    Residual {
        layers: Vec<SerializedLayer>,
    },
}

impl SerializedLayer {
    fn is_finite(&self) -> bool {
        match self {
            SerializedLayer::Dense {
                weights, biases, ..
            } => weights.iter().chain(biases).all(|v| v.is_finite()),
            SerializedLayer::BatchNorm {
                epsilon,
                momentum,
                gamma,
                beta,
                running_mean,
                running_var,
                ..
            } => {
                epsilon.is_finite()
                    && momentum.is_finite()
                    && gamma
                        .iter()
                        .chain(beta)
                        .chain(running_mean)
                        .chain(running_var)
                        .all(|v| v.is_finite())
            }
            SerializedLayer::Dropout { rate } => rate.is_finite(),
            SerializedLayer::Residual { layers } => layers.iter().all(SerializedLayer::is_finite),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SerializedActivation {
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu,
    Identity,
    Swish,
    Mish,
    Gelu,
}

impl From<Activation> for SerializedActivation {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Sigmoid => SerializedActivation::Sigmoid,
            Activation::Tanh => SerializedActivation::Tanh,
            Activation::ReLU => SerializedActivation::Relu,
            Activation::LeakyReLU => SerializedActivation::LeakyRelu,
            Activation::Identity => SerializedActivation::Identity,
            Activation::Swish => SerializedActivation::Swish,
            Activation::Mish => SerializedActivation::Mish,
            Activation::GELU => SerializedActivation::Gelu,
        }
    }
}

impl From<SerializedActivation> for Activation {
    fn from(value: SerializedActivation) -> Self {
        match value {
            SerializedActivation::Sigmoid => Activation::Sigmoid,
            SerializedActivation::Tanh => Activation::Tanh,
            SerializedActivation::Relu => Activation::ReLU,
            SerializedActivation::LeakyRelu => Activation::LeakyReLU,
            SerializedActivation::Identity => Activation::Identity,
            SerializedActivation::Swish => Activation::Swish,
            SerializedActivation::Mish => Activation::Mish,
            SerializedActivation::Gelu => Activation::GELU,
        }
    }
}

impl SerializedNetwork {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::Format(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::Format(
                "serialized model must have at least one layer".to_owned(),
            ));
        }
        Ok(())
    }

    /// Fails with `InvalidData` if any parameter or hyperparameter is NaN or infinite.
    pub fn check_finite(&self) -> Result<()> {
        if let Some(idx) = self.layers.iter().position(|l| !l.is_finite()) {
            return Err(Error::InvalidData(format!(
                "layer {idx} has non-finite parameters; refusing to serialize"
            )));
        }
        let h = &self.hyperparameters;
        if ![h.learning_rate, h.momentum, h.dropout_rate]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(Error::InvalidData(
                "hyperparameters must be finite to serialize".to_owned(),
            ));
        }
        Ok(())
    }
}

impl From<&Layer> for SerializedLayer {
    fn from(layer: &Layer) -> Self {
        match layer {
            Layer::Dense(l) => SerializedLayer::Dense {
                in_dim: l.in_dim(),
                out_dim: l.out_dim(),
                activation: l.activation().into(),
                gradient_source: l.gradient_source(),
                weights: l.weights().to_vec(),
                biases: l.biases().to_vec(),
            },
            Layer::BatchNorm(l) => {
                let state = l.state();
                SerializedLayer::BatchNorm {
                    features: l.features(),
                    epsilon: state.epsilon,
                    momentum: state.momentum,
                    gamma: state.gamma,
                    beta: state.beta,
                    running_mean: state.running_mean,
                    running_var: state.running_var,
                }
            }
            Layer::Dropout(l) => SerializedLayer::Dropout { rate: l.rate() },
            Layer::Residual(l) => SerializedLayer::Residual {
                layers: l.layers().iter().map(SerializedLayer::from).collect(),
            },
        }
    }
}

/// Layer factory: builds the layer named by the tag, then restores its state.
impl TryFrom<SerializedLayer> for Layer {
    type Error = Error;

    fn try_from(value: SerializedLayer) -> std::result::Result<Self, Self::Error> {
        let layer = match value {
            SerializedLayer::Dense {
                in_dim,
                out_dim,
                activation,
                gradient_source,
                weights,
                biases,
            } => DenseLayer::from_parts(in_dim, out_dim, activation.into(), weights, biases)?
                .with_gradient_source(gradient_source)
                .into(),
            SerializedLayer::BatchNorm {
                features,
                epsilon,
                momentum,
                gamma,
                beta,
                running_mean,
                running_var,
            } => {
                if gamma.len() != features {
                    return Err(Error::InvalidData(format!(
                        "batch norm gamma length {} does not match features {features}",
                        gamma.len()
                    )));
                }
                BatchNormLayer::from_state(BatchNormState {
                    epsilon,
                    momentum,
                    gamma,
                    beta,
                    running_mean,
                    running_var,
                })?
                .into()
            }
            SerializedLayer::Dropout { rate } => DropoutLayer::new(rate)?.into(),
            SerializedLayer::Residual { layers } => {
                let body = layers
                    .into_iter()
                    .map(Layer::try_from)
                    .collect::<Result<Vec<_>>>()?;
                ResidualBlock::new(body)?.into()
            }
        };
        Ok(layer)
    }
}

impl From<&Network> for SerializedNetwork {
    fn from(network: &Network) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            seed: network.seed(),
            loss: network.loss(),
            training: network.is_training(),
            hyperparameters: network.hyperparameters().clone(),
            layers: network.layers().iter().map(SerializedLayer::from).collect(),
        }
    }
}

impl TryFrom<SerializedNetwork> for Network {
    type Error = Error;

    fn try_from(value: SerializedNetwork) -> std::result::Result<Self, Self::Error> {
        value.validate()?;

        let mut network = Network::with_seed(value.loss, value.seed);
        network.set_training(value.training);
        *network.hyperparameters_mut() = value.hyperparameters;

        for (i, layer) in value.layers.into_iter().enumerate() {
            Layer::try_from(layer)
                .and_then(|l| network.add_initialized_layer(l))
                .map_err(|e| Error::Format(format!("layer {i} invalid: {e}")))?;
        }

        Ok(network)
    }
}

impl Network {
    /// Serialize the model to a pretty-printed JSON string.
    ///
    /// Fails with `InvalidData` if a parameter is not finite.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        let ser = SerializedNetwork::from(self);
        ser.check_finite()?;
        serde_json::to_string_pretty(&ser)
            .map_err(|e| Error::Format(format!("failed to serialize model: {e}")))
    }

    /// Serialize the model to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        let ser = SerializedNetwork::from(self);
        ser.check_finite()?;
        serde_json::to_string(&ser)
            .map_err(|e| Error::Format(format!("failed to serialize model: {e}")))
    }

    /// Parse a model from a JSON string.
    ///
    /// The RNG of the returned network is reseeded from the stored seed, i.e. the seed
    /// the saved network was created with. Training a loaded model therefore replays
    /// the shuffles and dropout masks of the original run from its first epoch.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedNetwork = serde_json::from_str(s)
            .map_err(|e| Error::Format(format!("failed to parse model json: {e}")))?;
        ser.try_into()
    }

    /// Save the model to a JSON file (pretty-printed).
    ///
    /// Nothing is written if the model has non-finite parameters.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)?;
        debug!("saved {} layer model to {}", self.num_layers(), p.display());
        Ok(())
    }

    /// Load a model from a JSON file.
    ///
    /// See [`Network::from_json_str`] for how the RNG is restored.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)?;
        let network = Self::from_json_str(&s)?;
        debug!(
            "loaded {} layer model from {}",
            network.num_layers(),
            p.display()
        );
        Ok(network)
    }

    /// Replace this network with the model stored at `path`.
    ///
    /// On error `self` is left unmodified. The RNG restarts from the stored seed, not
    /// from where the saved network's RNG had advanced to.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        *self = Self::load_json(path)?;
        Ok(())
    }
}
