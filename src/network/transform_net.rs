//! Image to image generator for fast style transfer

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{NetOutput, Network, NetworkError};
use crate::{
    config::NetworkConfig,
    error::Error,
    nn::{Conv2d, Module, Variable, relu},
    tensor::{DataFormat, Tensor},
};

pub const SCOPE: &str = "transform_net";

/// Three SAME convolutions, the last one squashed into pixel range by `127.5 * tanh + 127.5`
pub struct TransformNet {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
}

impl TransformNet {
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
        let (depth, width) = (config.image_depth, config.base_width);
        Ok(Self {
            conv1: Conv2d::new(format!("{}/conv1", SCOPE), depth, width, 3, 1, &mut rng)?,
            conv2: Conv2d::new(format!("{}/conv2", SCOPE), width, width, 3, 1, &mut rng)?,
            conv3: Conv2d::new(format!("{}/conv3", SCOPE), width, depth, 3, 1, &mut rng)?,
        })
    }
}

impl Network for TransformNet {
    fn name(&self) -> &str {
        SCOPE
    }

    fn forward(
        &self,
        inputs: &Tensor,
        data_format: DataFormat,
        _is_training: bool,
    ) -> Result<NetOutput, NetworkError> {
        let mut end_points = BTreeMap::new();
        let net = relu(&self.conv1.forward(inputs, data_format)?);
        end_points.insert(format!("{}/conv1", SCOPE), net.clone());
        let net = relu(&self.conv2.forward(&net, data_format)?);
        end_points.insert(format!("{}/conv2", SCOPE), net.clone());
        let net = self.conv3.forward(&net, data_format)?;
        let logits = net.map(|v| v.tanh()).mul_scalar(127.5).add_scalar(127.5);
        end_points.insert(format!("{}/output", SCOPE), logits.clone());
        Ok(NetOutput { logits, end_points })
    }

    fn variables(&self) -> Vec<Variable> {
        [&self.conv1, &self.conv2, &self.conv3]
            .into_iter()
            .flat_map(|conv| conv.variables())
            .collect()
    }
}

pub fn build(config: &NetworkConfig) -> Result<Box<dyn Network>, Error> {
    Ok(Box::new(TransformNet::new(config)?))
}
