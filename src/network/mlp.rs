//! A NN with one hidden layer for 2D toy classification

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{NetOutput, Network, NetworkError};
use crate::{
    config::NetworkConfig,
    error::Error,
    nn::{Dense, Module, ReLU, Variable},
    tensor::{DataFormat, Tensor},
};

pub const SCOPE: &str = "mlp";

pub struct Mlp {
    l1: Dense,
    l1_relu: ReLU,
    l2: Dense,
}

impl Mlp {
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
        Ok(Self {
            l1: Dense::new(format!("{}/dense1", SCOPE), 2, config.hidden_units, &mut rng)?,
            l1_relu: ReLU::new(),
            l2: Dense::new(
                format!("{}/dense2", SCOPE),
                config.hidden_units,
                config.num_classes,
                &mut rng,
            )?,
        })
    }
}

impl Network for Mlp {
    fn name(&self) -> &str {
        SCOPE
    }

    fn forward(
        &self,
        inputs: &Tensor,
        _data_format: DataFormat,
        _is_training: bool,
    ) -> Result<NetOutput, NetworkError> {
        let hidden = self.l1_relu.forward(&self.l1.forward(inputs)?);
        log::debug!("n_dead_neurons: {}", self.l1_relu.n_dead_neurons());
        let logits = self.l2.forward(&hidden)?;
        let end_points = BTreeMap::from([(format!("{}/hidden", SCOPE), hidden)]);
        Ok(NetOutput { logits, end_points })
    }

    fn variables(&self) -> Vec<Variable> {
        self.l1
            .variables()
            .into_iter()
            .chain(self.l2.variables())
            .collect()
    }
}

pub fn build(config: &NetworkConfig) -> Result<Box<dyn Network>, Error> {
    Ok(Box::new(Mlp::new(config)?))
}
