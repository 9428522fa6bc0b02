//! Modelers assemble the graph and the loss of a job
//!
//! A modeler owns the network(s) of a job. For each batch it builds the forward graph
//! ([`Modeler::create_graph_fn`]), the loss ([`Modeler::create_loss_fn`]) and the evaluation
//! metrics, and it decides which variables are trained and how.

use std::collections::BTreeMap;

use crate::{
    config::{ConfigError, ModelerConfig},
    error::Error,
    inputter::Batch,
    network::NetOutput,
    nn::Variable,
    optim::{LearningRateSchedule, Optim},
    tensor::{DataFormat, Tensor},
    values::Value,
};

pub mod classification;
pub mod style_transfer;

/// Result of one forward pass of the model
pub struct ModelOutput {
    /// absent when there is nothing to optimize, e.g. style transfer inference
    pub loss: Option<Value>,
    pub predictions: Tensor,
    pub metrics: BTreeMap<String, f32>,
}

/// A total loss and the values of the terms it was summed from
pub struct Loss {
    pub total: Value,
    pub terms: BTreeMap<String, f32>,
}

pub trait Modeler {
    fn name(&self) -> &str;

    fn base(&self) -> &ModelerBase;

    /// All variables of the model, trainable or not
    fn variables(&self) -> Vec<Variable>;

    /// Work done once before the first step
    fn create_precomputation(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn create_graph_fn(&self, inputs: &Tensor) -> Result<NetOutput, Error>;

    fn create_loss_fn(&mut self, outputs: &Tensor, batch: &Batch) -> Result<Loss, Error>;

    fn create_eval_metrics_fn(
        &self,
        predictions: &Tensor,
        labels: Option<&Tensor>,
    ) -> BTreeMap<String, f32>;

    fn model_fn(&mut self, batch: &Batch) -> Result<ModelOutput, Error>;

    fn train_variables(&self) -> Vec<Variable> {
        self.base().gather_train_vars(self.variables())
    }

    fn learning_rate(&self, global_step: usize) -> f32 {
        self.base().learning_rate(global_step)
    }

    fn create_optimizer(&self) -> Box<dyn Optim> {
        self.base().create_optimizer(&self.train_variables())
    }

    fn data_format(&self) -> DataFormat {
        self.base().config.data_format
    }
}

/// Behaviour shared by all modelers
pub struct ModelerBase {
    pub config: ModelerConfig,
    /// variables whose names start with one of these are not trained
    pub train_skip_vars: Vec<String>,
    /// trainable variables whose names start with one of these are not regularized
    pub l2_loss_skip_vars: Vec<String>,
    schedule: LearningRateSchedule,
}

impl ModelerBase {
    pub fn new(
        config: &ModelerConfig,
        train_skip_vars: Vec<String>,
        l2_loss_skip_vars: Vec<String>,
    ) -> Result<Self, Error> {
        let schedule = LearningRateSchedule::piecewise(
            config.learning_rate,
            config.piecewise_boundaries.clone(),
            config.piecewise_lr_decay.clone(),
        )
        .ok_or(ConfigError::PiecewiseMismatch {
            boundaries: config.piecewise_boundaries.len(),
            decays: config.piecewise_lr_decay.len(),
        })?;
        Ok(Self {
            config: config.clone(),
            train_skip_vars,
            l2_loss_skip_vars,
            schedule,
        })
    }

    pub fn gather_train_vars(&self, variables: Vec<Variable>) -> Vec<Variable> {
        variables
            .into_iter()
            .filter(|v| !v.in_scope(&self.train_skip_vars[..]))
            .collect()
    }

    /// `l2_weight_decay * sum(l2_loss(v))` over the trainable variables not skipped
    pub fn l2_regularization(&self, train_vars: &[Variable]) -> Value {
        if self.config.l2_weight_decay == 0.0 {
            return Value::new(0.0);
        }
        Value::sum_of(
            train_vars
                .iter()
                .filter(|v| !v.in_scope(&self.l2_loss_skip_vars[..]))
                .map(|v| v.tensor.l2_loss()),
        )
        .scale(self.config.l2_weight_decay)
    }

    pub fn learning_rate(&self, global_step: usize) -> f32 {
        self.schedule.at(global_step)
    }

    pub fn create_optimizer(&self, train_vars: &[Variable]) -> Box<dyn Optim> {
        let params = train_vars
            .iter()
            .flat_map(|v| v.tensor.values().to_vec())
            .collect();
        self.config
            .optimizer
            .build(params, self.config.learning_rate, self.config.momentum)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::{Mode, NetworkConfig},
        optim::OptimizerKind,
    };

    pub(crate) fn modeler_config(mode: Mode) -> ModelerConfig {
        ModelerConfig {
            mode,
            feature_net: "vgg_19_mini".into(),
            feature_net_path: None,
            style_image_path: None,
            data_format: DataFormat::ChannelsLast,
            image_depth: 3,
            batch_size_per_replica: 2,
            optimizer: OptimizerKind::Momentum,
            learning_rate: 0.1,
            momentum: 0.0,
            piecewise_boundaries: vec![],
            piecewise_lr_decay: vec![],
            l2_weight_decay: 0.0,
            content_weight: 1.0,
            style_weight: 1.0,
            tv_weight: 1.0,
            network: NetworkConfig {
                image_depth: 3,
                base_width: 1,
                hidden_units: 4,
                num_classes: 2,
                seed: 0,
            },
        }
    }

    fn variables() -> Vec<Variable> {
        vec![
            Variable::new("vgg_19/conv1/weights", Tensor::full(vec![2], 1.0)),
            Variable::new("transform_net/conv1/weights", Tensor::full(vec![2], 2.0)),
            Variable::new("transform_net/conv1/biases", Tensor::full(vec![1], 3.0)),
        ]
    }

    #[test]
    fn test_gather_train_vars() {
        let base = ModelerBase::new(&modeler_config(Mode::Train), vec!["vgg_19".into()], vec![])
            .unwrap();
        let names = base
            .gather_train_vars(variables())
            .into_iter()
            .map(|v| v.name)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["transform_net/conv1/weights", "transform_net/conv1/biases"]
        );
    }

    #[test]
    fn test_l2_regularization() {
        let mut config = modeler_config(Mode::Train);
        config.l2_weight_decay = 0.5;
        let base = ModelerBase::new(
            &config,
            vec!["vgg_19".into()],
            vec!["transform_net/conv1/biases".into()],
        )
        .unwrap();
        let train_vars = base.gather_train_vars(variables());
        // 0.5 * (2^2 + 2^2) / 2
        assert_eq!(base.l2_regularization(&train_vars).data(), 2.0);

        config.l2_weight_decay = 0.0;
        let base = ModelerBase::new(&config, vec![], vec![]).unwrap();
        assert_eq!(base.l2_regularization(&variables()).data(), 0.0);
    }

    #[test]
    fn test_schedule_and_optimizer() {
        let mut config = modeler_config(Mode::Train);
        config.piecewise_boundaries = vec![10];
        config.piecewise_lr_decay = vec![1.0, 0.1];
        let base = ModelerBase::new(&config, vec![], vec![]).unwrap();
        assert_eq!(base.learning_rate(0), 0.1);
        assert!((base.learning_rate(10) - 0.01).abs() < 1e-8);

        let vars = variables();
        let mut optim = base.create_optimizer(&vars[1..2]);
        let loss = vars[1].tensor.sum();
        loss.backward();
        optim.step();
        // only the selected variable moved
        assert_eq!(vars[1].tensor.to_vec(), vec![1.9, 1.9]);
        assert_eq!(vars[0].tensor.to_vec(), vec![1.0, 1.0]);

        config.piecewise_lr_decay = vec![1.0];
        assert!(matches!(
            ModelerBase::new(&config, vec![], vec![]),
            Err(Error::Config(_))
        ));
    }
}
