//! Components to build a neural network

use std::sync::atomic::{self, AtomicUsize};

use rand::Rng;
use thiserror::Error;

use crate::{
    tensor::{DataFormat, ImageDims, Tensor, TensorError},
    values::Value,
};

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// A named parameter tensor, e.g. `vgg_19/conv1/conv1_1/weights`
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub tensor: Tensor,
}

impl Variable {
    pub fn new(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            name: name.into(),
            tensor,
        }
    }

    /// Whether the variable name starts with any of the given scopes
    pub fn in_scope<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes.iter().any(|s| self.name.starts_with(s.as_ref()))
    }
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn variables(&self) -> Vec<Variable>;

    fn zero_grad(&self) {
        for variable in self.variables() {
            for value in variable.tensor.values() {
                value.clone().zero_grad();
            }
        }
    }
}

/// He initialization to ensure the variance of the output is the same as the input
/// and keep weights relatively small to avoid exploding or vanishing gradients
fn he_normal<R: Rng + ?Sized>(
    shape: Vec<usize>,
    fan_in: usize,
    rng: &mut R,
) -> Result<Tensor, TensorError> {
    let std = (2.0 / fan_in.max(1) as f32).sqrt();
    Tensor::randn(shape, std, rng)
}

/// Fully connected layer, `y = x W + b` on inputs of shape `[batch, n_inputs]`
pub struct Dense {
    scope: String,
    weights: Tensor,
    biases: Tensor,
    n_output_nans: AtomicUsize,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        scope: impl Into<String>,
        n_inputs: usize,
        n_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        let weights = he_normal(vec![n_inputs, n_outputs], n_inputs, rng)?;
        Ok(Self::from_tensors(scope, weights, Tensor::zeros(vec![n_outputs])))
    }

    pub fn from_tensors(scope: impl Into<String>, weights: Tensor, biases: Tensor) -> Self {
        Self {
            scope: scope.into(),
            weights,
            biases,
            n_output_nans: AtomicUsize::new(0),
        }
    }

    /// Computes forward pass for a layer
    pub fn forward(&self, inputs: &Tensor) -> Result<Tensor, NNError> {
        let n_inputs = self.weights.shape()[0];
        let got = inputs.shape().get(1).copied().unwrap_or(0);
        if inputs.rank() != 2 || got != n_inputs {
            return Err(NNError::InputSizeMismatch {
                expected: n_inputs,
                got,
            });
        }
        let product = inputs.matmul(&self.weights)?;
        let n_outputs = self.biases.numel();
        let data = product
            .values()
            .iter()
            .enumerate()
            .map(|(i, v)| v + &self.biases.values()[i % n_outputs])
            .collect();
        let outputs = Tensor::new(product.shape().to_vec(), data)?;

        let n_output_nans = outputs.values().iter().filter(|v| v.data().is_nan()).count();
        self.n_output_nans
            .store(n_output_nans, atomic::Ordering::Relaxed);
        log::debug!("{}: n_output_nans: {}", self.scope, n_output_nans);
        Ok(outputs)
    }

    /// Returns the number of NaN outputs in the last forward pass (used for debugging)
    pub fn n_output_nans(&self) -> usize {
        self.n_output_nans.load(atomic::Ordering::Relaxed)
    }
}

impl Module for Dense {
    fn variables(&self) -> Vec<Variable> {
        vec![
            Variable::new(format!("{}/weights", self.scope), self.weights.clone()),
            Variable::new(format!("{}/biases", self.scope), self.biases.clone()),
        ]
    }
}

/// 2D convolution with a square kernel and SAME zero padding.
/// Weights are stored as `[kernel, kernel, in_channels, out_channels]`.
pub struct Conv2d {
    scope: String,
    weights: Tensor,
    biases: Tensor,
    stride: usize,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        scope: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        let weights = he_normal(
            vec![kernel, kernel, in_channels, out_channels],
            kernel * kernel * in_channels,
            rng,
        )?;
        Self::from_tensors(scope, weights, Tensor::zeros(vec![out_channels]), stride)
    }

    pub fn from_tensors(
        scope: impl Into<String>,
        weights: Tensor,
        biases: Tensor,
        stride: usize,
    ) -> Result<Self, NNError> {
        let shape = weights.shape();
        if shape.len() != 4 || shape[0] != shape[1] {
            return Err(TensorError::Rank {
                expected: 4,
                shape: shape.to_vec(),
            }
            .into());
        }
        if biases.numel() != shape[3] {
            return Err(NNError::InputSizeMismatch {
                expected: shape[3],
                got: biases.numel(),
            });
        }
        if stride == 0 {
            return Err(TensorError::InvalidParameter("stride must be positive".into()).into());
        }
        Ok(Self {
            scope: scope.into(),
            weights,
            biases,
            stride,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.weights.shape()[2]
    }

    pub fn out_channels(&self) -> usize {
        self.weights.shape()[3]
    }

    pub fn forward(&self, inputs: &Tensor, format: DataFormat) -> Result<Tensor, NNError> {
        let dims = format.dims(inputs.shape())?;
        let (kernel, in_ch, out_ch) = (
            self.weights.shape()[0],
            self.in_channels(),
            self.out_channels(),
        );
        if dims.channels != in_ch {
            return Err(NNError::InputSizeMismatch {
                expected: in_ch,
                got: dims.channels,
            });
        }

        let out_dims = ImageDims {
            batch: dims.batch,
            height: dims.height.div_ceil(self.stride),
            width: dims.width.div_ceil(self.stride),
            channels: out_ch,
        };
        let pad_top = same_padding(dims.height, out_dims.height, kernel, self.stride);
        let pad_left = same_padding(dims.width, out_dims.width, kernel, self.stride);

        let input = inputs.values();
        let weights = self.weights.values();
        let biases = self.biases.values();
        let n_out = out_dims.batch * out_dims.height * out_dims.width * out_ch;
        let mut outputs: Vec<Option<Value>> = vec![None; n_out];

        for b in 0..out_dims.batch {
            for oy in 0..out_dims.height {
                for ox in 0..out_dims.width {
                    for oc in 0..out_ch {
                        let mut terms = vec![biases[oc].clone()];
                        for ky in 0..kernel {
                            let Some(iy) = (oy * self.stride + ky).checked_sub(pad_top) else {
                                continue;
                            };
                            if iy >= dims.height {
                                continue;
                            }
                            for kx in 0..kernel {
                                let Some(ix) = (ox * self.stride + kx).checked_sub(pad_left)
                                else {
                                    continue;
                                };
                                if ix >= dims.width {
                                    continue;
                                }
                                for ic in 0..in_ch {
                                    let x = &input[format.offset(&dims, b, iy, ix, ic)];
                                    let w =
                                        &weights[((ky * kernel + kx) * in_ch + ic) * out_ch + oc];
                                    terms.push(x * w);
                                }
                            }
                        }
                        outputs[format.offset(&out_dims, b, oy, ox, oc)] =
                            Some(Value::sum_of(terms));
                    }
                }
            }
        }

        let data = outputs
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                TensorError::InvalidParameter(format!("{}: unfilled output", self.scope))
            })?;
        Ok(Tensor::new(format.shape(out_dims), data)?)
    }
}

impl Module for Conv2d {
    fn variables(&self) -> Vec<Variable> {
        vec![
            Variable::new(format!("{}/weights", self.scope), self.weights.clone()),
            Variable::new(format!("{}/biases", self.scope), self.biases.clone()),
        ]
    }
}

/// Leading padding for SAME convolution
fn same_padding(size: usize, out: usize, kernel: usize, stride: usize) -> usize {
    (out.saturating_sub(1) * stride + kernel).saturating_sub(size) / 2
}

/// 2x2 max pooling with stride 2 and SAME padding, odd edges pool over a partial window
pub fn max_pool2d(inputs: &Tensor, format: DataFormat) -> Result<Tensor, NNError> {
    let dims = format.dims(inputs.shape())?;
    let out_dims = ImageDims {
        height: dims.height.div_ceil(2),
        width: dims.width.div_ceil(2),
        ..dims
    };
    let input = inputs.values();
    let n_out = out_dims.batch * out_dims.height * out_dims.width * out_dims.channels;
    let mut outputs: Vec<Option<Value>> = vec![None; n_out];

    for b in 0..dims.batch {
        for oy in 0..out_dims.height {
            for ox in 0..out_dims.width {
                for c in 0..dims.channels {
                    let mut window = (2 * oy..(2 * oy + 2).min(dims.height)).flat_map(|y| {
                        (2 * ox..(2 * ox + 2).min(dims.width))
                            .map(move |x| &input[format.offset(&dims, b, y, x, c)])
                    });
                    let pooled = window
                        .next()
                        .map(|first| window.fold(first.clone(), |acc, v| acc.max(v)));
                    outputs[format.offset(&out_dims, b, oy, ox, c)] = pooled;
                }
            }
        }
    }

    let data = outputs
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| TensorError::InvalidParameter("empty pooling window".into()))?;
    Ok(Tensor::new(format.shape(out_dims), data)?)
}

/// Applies ReLU to a tensor, tracking how many units were inactive
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_neurons: AtomicUsize::new(0),
        }
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &Tensor) -> Tensor {
        let n_dead_neurons = inputs.values().iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        relu(inputs)
    }

    /// Returns the number of dead neurons in the last forward pass (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

pub fn relu(inputs: &Tensor) -> Tensor {
    inputs.map(|v| v.relu())
}

/// Row-wise softmax over a `[batch, classes]` tensor
pub fn softmax(inputs: &Tensor) -> Result<Tensor, NNError> {
    if inputs.rank() != 2 {
        return Err(TensorError::Rank {
            expected: 2,
            shape: inputs.shape().to_vec(),
        }
        .into());
    }
    let n_classes = inputs.shape()[1];
    let mut data = Vec::with_capacity(inputs.numel());
    for row in inputs.values().chunks(n_classes.max(1)) {
        // Shifting by the row max keeps exp from overflowing, the shift is a constant
        // so the gradient is unchanged
        let shift = Value::new(row.iter().map(|v| v.data()).fold(f32::NEG_INFINITY, f32::max));
        let exps = row.iter().map(|v| (v - &shift).exp()).collect::<Vec<_>>();
        let exp_sum = Value::sum_of(&exps);
        data.extend(exps.iter().map(|e| e / &exp_sum));
    }
    Ok(Tensor::new(inputs.shape().to_vec(), data)?)
}
