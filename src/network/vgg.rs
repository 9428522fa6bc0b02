//! Reduced width VGG-19 feature extractor
//!
//! Keeps the VGG-19 block structure and end point names so perceptual losses can address
//! layers such as `vgg_19/conv4/conv4_2`, but only builds the layers up to `conv5_1` and
//! scales every block by `base_width`.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{NetOutput, Network, NetworkError};
use crate::{
    config::NetworkConfig,
    error::Error,
    nn::{Conv2d, Module, Variable, max_pool2d, relu},
    tensor::{DataFormat, Tensor},
};

pub const SCOPE: &str = "vgg_19";

enum Layer {
    Conv(Conv2d),
    Pool,
}

pub struct Vgg19Mini {
    // (end point name, layer) in evaluation order
    layers: Vec<(String, Layer)>,
}

impl Vgg19Mini {
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
        // (block, convs in the block, width multiplier)
        let blocks = [(1, 1, 1), (2, 1, 2), (3, 1, 4), (4, 2, 8), (5, 1, 8)];

        let mut layers = vec![];
        let mut in_channels = config.image_depth;
        for (block, n_convs, multiplier) in blocks {
            let width = config.base_width * multiplier;
            for i in 1..=n_convs {
                let name = format!("{}/conv{}/conv{}_{}", SCOPE, block, block, i);
                let conv = Conv2d::new(name.clone(), in_channels, width, 3, 1, &mut rng)?;
                layers.push((name, Layer::Conv(conv)));
                in_channels = width;
            }
            if block < 5 {
                layers.push((format!("{}/pool{}", SCOPE, block), Layer::Pool));
            }
        }
        Ok(Self { layers })
    }
}

impl Network for Vgg19Mini {
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
        let mut net = inputs.clone();
        for (name, layer) in &self.layers {
            net = match layer {
                Layer::Conv(conv) => relu(&conv.forward(&net, data_format)?),
                Layer::Pool => max_pool2d(&net, data_format)?,
            };
            log::debug!("{}: {:?}", name, net.shape());
            end_points.insert(name.clone(), net.clone());
        }
        Ok(NetOutput {
            logits: net,
            end_points,
        })
    }

    fn variables(&self) -> Vec<Variable> {
        self.layers
            .iter()
            .flat_map(|(_, layer)| match layer {
                Layer::Conv(conv) => conv.variables(),
                Layer::Pool => vec![],
            })
            .collect()
    }
}

pub fn build(config: &NetworkConfig) -> Result<Box<dyn Network>, Error> {
    Ok(Box::new(Vgg19Mini::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;

    fn config(seed: u64) -> NetworkConfig {
        NetworkConfig {
            image_depth: 3,
            base_width: 1,
            hidden_units: 4,
            num_classes: 2,
            seed,
        }
    }

    #[test]
    fn test_end_points() {
        let net = Vgg19Mini::new(&config(0)).unwrap();
        let inputs = Tensor::full(vec![1, 8, 8, 3], 10.0);
        let out = net.forward(&inputs, DataFormat::ChannelsLast, false).unwrap();
        for (name, shape) in [
            ("vgg_19/conv1/conv1_1", [1, 8, 8, 1]),
            ("vgg_19/conv2/conv2_1", [1, 4, 4, 2]),
            ("vgg_19/conv3/conv3_1", [1, 2, 2, 4]),
            ("vgg_19/conv4/conv4_1", [1, 1, 1, 8]),
            ("vgg_19/conv4/conv4_2", [1, 1, 1, 8]),
            ("vgg_19/conv5/conv5_1", [1, 1, 1, 8]),
        ] {
            assert_eq!(out.end_point(SCOPE, name).unwrap().shape(), &shape, "{}", name);
        }
        assert!(matches!(
            out.end_point(SCOPE, "vgg_19/fc8"),
            Err(NetworkError::MissingEndPoint { .. })
        ));
    }

    #[test]
    fn test_channels_first() {
        let net = Vgg19Mini::new(&config(0)).unwrap();
        let inputs = Tensor::full(vec![2, 3, 6, 6], 1.0);
        let out = net.forward(&inputs, DataFormat::ChannelsFirst, false).unwrap();
        assert_eq!(
            out.end_point(SCOPE, "vgg_19/conv2/conv2_1").unwrap().shape(),
            &[2, 2, 3, 3]
        );
    }

    #[test]
    fn test_restore_from_checkpoint() {
        let pretrained = Vgg19Mini::new(&config(1)).unwrap();
        let checkpoint = Checkpoint::from_variables(&pretrained.variables(), 0);
        let fresh = Vgg19Mini::new(&config(2)).unwrap();
        assert_ne!(
            fresh.variables()[0].tensor.to_vec(),
            pretrained.variables()[0].tensor.to_vec()
        );
        let restored = fresh.restore(&checkpoint, &[SCOPE]).unwrap();
        assert_eq!(restored, 12);
        for (a, b) in fresh.variables().iter().zip(pretrained.variables()) {
            assert_eq!(a.tensor.to_vec(), b.tensor.to_vec());
        }
    }
}
