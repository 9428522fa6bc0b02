//! Network architectures
//!
//! A network maps a batch of inputs to logits and exposes its intermediate activations as
//! named end points, e.g. `vgg_19/conv4/conv4_2`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    checkpoint::{Checkpoint, CheckpointError},
    nn::{NNError, Variable},
    tensor::{DataFormat, Tensor, TensorError},
};

pub mod mlp;
pub mod transform_net;
pub mod vgg;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network {network} has no end point {name}")]
    MissingEndPoint { network: String, name: String },
    #[error(transparent)]
    NN(#[from] NNError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Clone)]
pub struct NetOutput {
    pub logits: Tensor,
    pub end_points: BTreeMap<String, Tensor>,
}

impl NetOutput {
    pub fn end_point(&self, network: &str, name: &str) -> Result<&Tensor, NetworkError> {
        self.end_points
            .get(name)
            .ok_or_else(|| NetworkError::MissingEndPoint {
                network: network.to_string(),
                name: name.to_string(),
            })
    }
}

pub trait Network {
    fn name(&self) -> &str;

    fn forward(
        &self,
        inputs: &Tensor,
        data_format: DataFormat,
        is_training: bool,
    ) -> Result<NetOutput, NetworkError>;

    fn variables(&self) -> Vec<Variable>;

    /// Loads the variables under `scopes` from a checkpoint, returns how many were restored
    fn restore(&self, checkpoint: &Checkpoint, scopes: &[&str]) -> Result<usize, NetworkError> {
        Ok(checkpoint.restore_into(&self.variables(), scopes)?)
    }
}
