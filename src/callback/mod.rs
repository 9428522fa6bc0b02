//! Hooks run by the runner around a job and every step

use std::collections::BTreeMap;

use crate::{config::Mode, error::Error, modeler::Modeler, tensor::Tensor};

pub mod infer_basic;
pub mod infer_decision_boundary;
pub mod infer_style_transfer;
pub mod train_basic;
pub mod train_loss;
pub mod train_speed;

/// What the runner knows about the job, shared with every callback
#[derive(Debug, Clone)]
pub struct RunState {
    pub mode: Mode,
    pub global_step: usize,
    pub epoch: usize,
    /// samples per step across all replicas
    pub batch_size: usize,
    pub learning_rate: f32,
    /// loss of the latest step
    pub loss: Option<f32>,
    pub metrics: BTreeMap<String, f32>,
    pub batch_ids: Vec<String>,
    pub predictions: Option<Tensor>,
}

impl RunState {
    pub fn new(mode: Mode, batch_size: usize) -> Self {
        Self {
            mode,
            global_step: 0,
            epoch: 0,
            batch_size,
            learning_rate: 0.0,
            loss: None,
            metrics: BTreeMap::new(),
            batch_ids: vec![],
            predictions: None,
        }
    }
}

pub trait Callback {
    fn name(&self) -> &str;

    /// May restore state, e.g. set `global_step` from a checkpoint
    fn before_run(&mut self, _state: &mut RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        Ok(())
    }

    fn before_step(&mut self, _state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        Ok(())
    }

    fn after_step(&mut self, _state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        Ok(())
    }

    fn after_run(&mut self, _state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::{CallbackConfig, Mode},
        datasets::Dataset,
        modeler::{classification::ClassificationModeler, tests::modeler_config},
        network::mlp::Mlp,
        tensor::DataFormat,
    };

    pub(crate) fn callback_config(dir: &std::path::Path, mode: Mode) -> CallbackConfig {
        CallbackConfig {
            mode,
            model_dir: dir.join("model"),
            output_dir: dir.join("output"),
            data_format: DataFormat::ChannelsLast,
            dataset: Dataset::XOR,
            class_size: 10,
            seed: 0,
            log_every_n_iter: 2,
            save_checkpoint_steps: 2,
            keep_checkpoint_max: 2,
        }
    }

    pub(crate) fn mlp_modeler(mode: Mode) -> ClassificationModeler {
        let config = modeler_config(mode);
        ClassificationModeler::new(&config, Box::new(Mlp::new(&config.network).unwrap()))
            .unwrap()
    }
}
