//! Softmax classification of 2D points

use std::collections::BTreeMap;

use super::{Loss, ModelOutput, Modeler, ModelerBase};
use crate::{
    config::ModelerConfig,
    error::Error,
    inputter::Batch,
    loss::softmax_cross_entropy,
    network::{NetOutput, Network},
    nn::Variable,
    registry::Components,
    tensor::{Tensor, TensorError},
};

/// Index of the largest entry in every row of a `[batch, classes]` tensor
pub fn argmax(logits: &Tensor) -> Result<Vec<usize>, TensorError> {
    if logits.rank() != 2 {
        return Err(TensorError::Rank {
            expected: 2,
            shape: logits.shape().to_vec(),
        });
    }
    let n_classes = logits.shape()[1].max(1);
    Ok(logits
        .to_vec()
        .chunks(n_classes)
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
        .collect())
}

pub struct ClassificationModeler {
    base: ModelerBase,
    net: Box<dyn Network>,
}

impl ClassificationModeler {
    pub fn new(config: &ModelerConfig, net: Box<dyn Network>) -> Result<Self, Error> {
        Ok(Self {
            base: ModelerBase::new(config, vec![], vec![])?,
            net,
        })
    }
}

impl Modeler for ClassificationModeler {
    fn name(&self) -> &str {
        "classification"
    }

    fn base(&self) -> &ModelerBase {
        &self.base
    }

    fn variables(&self) -> Vec<Variable> {
        self.net.variables()
    }

    fn create_graph_fn(&self, inputs: &Tensor) -> Result<NetOutput, Error> {
        Ok(self.net.forward(inputs, self.base.config.data_format, true)?)
    }

    fn create_loss_fn(&mut self, outputs: &Tensor, batch: &Batch) -> Result<Loss, Error> {
        let labels = batch
            .labels
            .as_ref()
            .ok_or_else(|| Error::InvalidState("classification needs labelled batches".into()))?;
        let loss_ce = softmax_cross_entropy(outputs, labels)?;
        let loss_l2 = self.base.l2_regularization(&self.train_variables());
        let terms = BTreeMap::from([
            ("loss_ce".to_string(), loss_ce.data()),
            ("loss_l2".to_string(), loss_l2.data()),
        ]);
        Ok(Loss {
            total: loss_ce + loss_l2,
            terms,
        })
    }

    fn create_eval_metrics_fn(
        &self,
        predictions: &Tensor,
        labels: Option<&Tensor>,
    ) -> BTreeMap<String, f32> {
        let mut metrics = BTreeMap::new();
        let Some(labels) = labels else {
            return metrics;
        };
        let (Ok(predicted), Ok(expected)) = (argmax(predictions), argmax(labels)) else {
            return metrics;
        };
        let correct = predicted
            .iter()
            .zip(&expected)
            .filter(|(p, e)| p == e)
            .count();
        metrics.insert(
            "accuracy".to_string(),
            correct as f32 / predicted.len().max(1) as f32,
        );
        metrics
    }

    fn model_fn(&mut self, batch: &Batch) -> Result<ModelOutput, Error> {
        let logits = self.create_graph_fn(&batch.inputs)?.logits;
        let mut metrics = self.create_eval_metrics_fn(&logits, batch.labels.as_ref());
        let loss = match batch.labels {
            Some(_) => {
                let loss = self.create_loss_fn(&logits, batch)?;
                metrics.extend(loss.terms);
                Some(loss.total)
            }
            None => None,
        };
        Ok(ModelOutput {
            loss,
            predictions: logits,
            metrics,
        })
    }
}

pub fn build(
    config: &ModelerConfig,
    net: Box<dyn Network>,
    _components: &Components,
) -> Result<Box<dyn Modeler>, Error> {
    Ok(Box::new(ClassificationModeler::new(config, net)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Mode,
        modeler::tests::modeler_config,
        network::mlp::Mlp,
    };

    fn batch() -> Batch {
        Batch {
            inputs: Tensor::from_f32(vec![4, 2], &[1.0, 1.0, -1.0, -1.0, 1.0, -1.0, -1.0, 1.0])
                .unwrap(),
            labels: Some(
                Tensor::from_f32(vec![4, 2], &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]).unwrap(),
            ),
            ids: (0..4).map(|i| i.to_string()).collect(),
        }
    }

    #[test]
    fn test_argmax() {
        let logits = Tensor::from_f32(vec![2, 3], &[0.1, 0.5, 0.2, 3.0, -1.0, 2.0]).unwrap();
        assert_eq!(argmax(&logits).unwrap(), vec![1, 0]);
        assert!(argmax(&Tensor::zeros(vec![3])).is_err());
    }

    #[test]
    fn test_model_fn_reports_loss_and_accuracy() {
        let mut config = modeler_config(Mode::Train);
        config.network.hidden_units = 8;
        let mut modeler =
            ClassificationModeler::new(&config, Box::new(Mlp::new(&config.network).unwrap()))
                .unwrap();
        let output = modeler.model_fn(&batch()).unwrap();
        assert_eq!(output.predictions.shape(), &[4, 2]);
        assert!(output.loss.unwrap().data() > 0.0);
        let accuracy = output.metrics["accuracy"];
        assert!((0.0..=1.0).contains(&accuracy));
        assert!(output.metrics.contains_key("loss_ce"));
        assert_eq!(modeler.train_variables().len(), 4);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut config = modeler_config(Mode::Train);
        config.network.hidden_units = 8;
        config.learning_rate = 0.05;
        config.momentum = 0.9;
        let mut modeler =
            ClassificationModeler::new(&config, Box::new(Mlp::new(&config.network).unwrap()))
                .unwrap();
        let mut optim = modeler.create_optimizer();
        let first = modeler.model_fn(&batch()).unwrap().loss.unwrap().data();
        let mut last = first;
        for _ in 0..50 {
            let loss = modeler.model_fn(&batch()).unwrap().loss.unwrap();
            loss.backward();
            optim.step();
            optim.zero_grad();
            last = loss.data();
        }
        assert!(last < first, "{} >= {}", last, first);
    }

    #[test]
    fn test_unlabelled_batch_has_no_loss() {
        let config = modeler_config(Mode::Infer);
        let mut modeler =
            ClassificationModeler::new(&config, Box::new(Mlp::new(&config.network).unwrap()))
                .unwrap();
        let mut unlabelled = batch();
        unlabelled.labels = None;
        let output = modeler.model_fn(&unlabelled).unwrap();
        assert!(output.loss.is_none());
        assert!(output.metrics.is_empty());
    }
}
