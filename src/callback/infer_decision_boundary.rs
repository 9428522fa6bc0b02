//! Plots the toy dataset and the decision boundary of a classifier

use std::{error::Error as StdError, path::PathBuf};

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{Callback, RunState};
use crate::{
    config::CallbackConfig,
    datasets::{Dataset, load_dataset, plot_data, plot_decision_boundary},
    error::Error,
    modeler::{Modeler, classification::argmax},
    tensor::Tensor,
};

pub struct InferDecisionBoundary {
    output_dir: PathBuf,
    dataset: Dataset,
    class_size: usize,
    seed: u64,
}

impl Callback for InferDecisionBoundary {
    fn name(&self) -> &str {
        "infer_decision_boundary"
    }

    fn after_run(&mut self, state: &RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        std::fs::create_dir_all(&self.output_dir).map_err(Error::io(&self.output_dir))?;
        // same seed as the inputter, so these are the points the model saw
        let mut rng = Pcg64Mcg::seed_from_u64(self.seed);
        let (data, labels) = load_dataset(self.dataset, self.class_size, &mut rng);

        let data_path = self
            .output_dir
            .join(format!("dataset_{}.png", self.dataset));
        plot_data(&data, &labels, &data_path, self.dataset)
            .map_err(|e| Error::Plot(e.to_string()))?;

        let classify = |points: &[(f32, f32)]| -> Result<Vec<usize>, Box<dyn StdError>> {
            let flat = points.iter().flat_map(|&(x, y)| [x, y]).collect::<Vec<_>>();
            let inputs = Tensor::from_f32(vec![points.len(), 2], &flat)?;
            let logits = modeler.create_graph_fn(&inputs)?.logits;
            Ok(argmax(&logits)?)
        };
        let boundary_path = self.output_dir.join(format!(
            "decision_boundary_step_{}_{}.png",
            state.global_step, self.dataset
        ));
        plot_decision_boundary(classify, &boundary_path, self.dataset, &data, &labels)
            .map_err(|e| Error::Plot(e.to_string()))
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(InferDecisionBoundary {
        output_dir: config.output_dir.clone(),
        dataset: config.dataset,
        class_size: config.class_size,
        seed: config.seed,
    }))
}
