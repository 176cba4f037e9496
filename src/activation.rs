//! Activation functions.
//!
//! A dense layer computes a pre-activation value `z = W x + b` and then applies an
//! activation function element-wise: `y = activation(z)`.
//!
//! Every activation is a (value, derivative) pair of scalar functions. Both take the
//! *pre-activation* value as argument. Which value the dense layer actually feeds into
//! the derivative during backprop is controlled by [`crate::GradientSource`].

/// Slope of [`Activation::LeakyReLU`] for negative inputs.
pub const LEAKY_RELU_SLOPE: f32 = 0.01;

// sqrt(2 / pi) and the cubic coefficient of the tanh GELU approximation.
const GELU_SCALE: f32 = 0.797_884_6;
const GELU_CUBIC: f32 = 0.044_715;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Element-wise activation function.
pub enum Activation {
    Sigmoid,
    Tanh,
    ReLU,
    /// ReLU with slope [`LEAKY_RELU_SLOPE`] below zero.
    LeakyReLU,
    Identity,
    /// `x * sigmoid(x)`.
    Swish,
    /// `x * tanh(softplus(x))`.
    Mish,
    /// Tanh approximation of the Gaussian error linear unit.
    GELU,
}

impl Activation {
    #[inline]
    pub fn forward(self, x: f32) -> f32 {
        match self {
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_RELU_SLOPE * x
                }
            }
            Activation::Identity => x,
            Activation::Swish => x * sigmoid(x),
            Activation::Mish => x * softplus(x).tanh(),
            Activation::GELU => 0.5 * x * (1.0 + gelu_inner(x).tanh()),
        }
    }

    /// Derivative of the activation, evaluated at the pre-activation value `x`.
    #[inline]
    pub fn derivative(self, x: f32) -> f32 {
        match self {
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_RELU_SLOPE
                }
            }
            Activation::Identity => 1.0,
            Activation::Swish => {
                let s = sigmoid(x);
                s + x * s * (1.0 - s)
            }
            Activation::Mish => {
                let t = softplus(x).tanh();
                t + x * (1.0 - t * t) * sigmoid(x)
            }
            Activation::GELU => {
                let t = gelu_inner(x).tanh();
                let d_inner = GELU_SCALE * (1.0 + 3.0 * GELU_CUBIC * x * x);
                0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * d_inner
            }
        }
    }
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// `ln(1 + e^x)` without overflow for large `x`.
#[inline]
fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[inline]
fn gelu_inner(x: f32) -> f32 {
    GELU_SCALE * (x + GELU_CUBIC * x * x * x)
}
