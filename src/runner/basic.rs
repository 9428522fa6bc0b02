//! Single process runner
//!
//! Replicas are emulated by splitting every batch into `num_replicas` shards. Each shard's
//! loss is scaled by `1 / num_replicas` before backprop so the gradients accumulated in the
//! shared variables are the mean over replicas, then a single optimizer step is applied.

use std::collections::BTreeMap;

use super::{RunSummary, Runner};
use crate::{
    callback::{Callback, RunState},
    config::{Mode, RunnerConfig},
    error::Error,
    inputter::Inputter,
    modeler::Modeler,
};

pub struct BasicRunner {
    config: RunnerConfig,
    inputter: Box<dyn Inputter>,
    modeler: Box<dyn Modeler>,
    callbacks: Vec<Box<dyn Callback>>,
}

fn notify<F>(
    callbacks: &mut [Box<dyn Callback>],
    modeler: &dyn Modeler,
    mut hook: F,
) -> Result<(), Error>
where
    F: FnMut(&mut dyn Callback, &dyn Modeler) -> Result<(), Error>,
{
    for callback in callbacks.iter_mut() {
        hook(callback.as_mut(), modeler)?;
    }
    Ok(())
}

fn summarize(global_step: usize, losses: &[f32]) -> RunSummary {
    RunSummary {
        global_step,
        final_loss: losses.last().copied(),
        mean_loss: (!losses.is_empty()).then(|| losses.iter().sum::<f32>() / losses.len() as f32),
    }
}

impl BasicRunner {
    pub fn new(
        config: &RunnerConfig,
        inputter: Box<dyn Inputter>,
        modeler: Box<dyn Modeler>,
        callbacks: Vec<Box<dyn Callback>>,
    ) -> Result<Self, Error> {
        let n_replicas = config.num_replicas.max(1);
        if inputter.batch_size() % n_replicas != 0 {
            return Err(Error::InvalidState(format!(
                "batch size {} cannot be split across {} replicas",
                inputter.batch_size(),
                n_replicas
            )));
        }
        Ok(Self {
            config: config.clone(),
            inputter,
            modeler,
            callbacks,
        })
    }

    pub fn modeler(&self) -> &dyn Modeler {
        self.modeler.as_ref()
    }

    fn train(&mut self) -> Result<RunSummary, Error> {
        let Self {
            config,
            inputter,
            modeler,
            callbacks,
        } = self;
        let n_replicas = config.num_replicas.max(1);
        let replica_scale = 1.0 / n_replicas as f32;

        let mut state = RunState::new(config.mode, inputter.batch_size());
        notify(callbacks, &**modeler, |cb, m| cb.before_run(&mut state, m))?;
        modeler.create_precomputation()?;
        let mut optimizer = modeler.create_optimizer();
        log::info!(
            "Training {} from step {}: {} epochs of {} steps, {} replicas",
            modeler.name(),
            state.global_step,
            config.epochs,
            inputter.batches_per_epoch(),
            n_replicas
        );

        let mut losses = vec![];
        'epochs: for epoch in 0..config.epochs {
            state.epoch = epoch;
            for batch in inputter.batches(epoch) {
                if config.max_steps.is_some_and(|max| state.global_step >= max) {
                    break 'epochs;
                }
                let batch = batch?;
                let learning_rate = modeler.learning_rate(state.global_step);
                optimizer.set_learning_rate(learning_rate);
                state.learning_rate = learning_rate;
                state.batch_ids = batch.ids.clone();
                notify(callbacks, &**modeler, |cb, m| cb.before_step(&state, m))?;

                let mut step_loss = 0.0;
                let mut metrics = BTreeMap::new();
                for shard in batch.shard(n_replicas)? {
                    let output = modeler.model_fn(&shard)?;
                    let loss = output.loss.ok_or_else(|| {
                        Error::InvalidState(format!("modeler {} returned no loss", modeler.name()))
                    })?;
                    let loss = loss.scale(replica_scale);
                    loss.backward();
                    step_loss += loss.data();
                    for (name, value) in output.metrics {
                        *metrics.entry(name).or_insert(0.0) += value * replica_scale;
                    }
                }
                optimizer.step();
                optimizer.zero_grad();

                state.global_step += 1;
                state.loss = Some(step_loss);
                state.metrics = metrics;
                losses.push(step_loss);
                notify(callbacks, &**modeler, |cb, m| cb.after_step(&state, m))?;
            }
        }

        notify(callbacks, &**modeler, |cb, m| cb.after_run(&state, m))?;
        log::info!("Finished training at step {}", state.global_step);
        Ok(summarize(state.global_step, &losses))
    }

    fn infer(&mut self) -> Result<RunSummary, Error> {
        let Self {
            config,
            inputter,
            modeler,
            callbacks,
        } = self;
        let mut state = RunState::new(config.mode, inputter.batch_size());
        notify(callbacks, &**modeler, |cb, m| cb.before_run(&mut state, m))?;

        let mut losses = vec![];
        let mut n_batches = 0;
        for batch in inputter.batches(0) {
            if config.max_steps.is_some_and(|max| n_batches >= max) {
                break;
            }
            n_batches += 1;
            let batch = batch?;
            state.batch_ids = batch.ids.clone();
            notify(callbacks, &**modeler, |cb, m| cb.before_step(&state, m))?;

            let output = modeler.model_fn(&batch)?;
            state.loss = output.loss.map(|loss| loss.data());
            losses.extend(state.loss);
            state.metrics = output.metrics;
            state.predictions = Some(output.predictions);
            notify(callbacks, &**modeler, |cb, m| cb.after_step(&state, m))?;
        }

        notify(callbacks, &**modeler, |cb, m| cb.after_run(&state, m))?;
        log::info!("Finished inference on {} batches", n_batches);
        Ok(summarize(state.global_step, &losses))
    }
}

impl Runner for BasicRunner {
    fn run(&mut self) -> Result<RunSummary, Error> {
        match self.config.mode {
            Mode::Train | Mode::Tune => self.train(),
            Mode::Infer => self.infer(),
        }
    }
}

pub fn build(
    config: &RunnerConfig,
    inputter: Box<dyn Inputter>,
    modeler: Box<dyn Modeler>,
    callbacks: Vec<Box<dyn Callback>>,
) -> Result<Box<dyn Runner>, Error> {
    Ok(Box::new(BasicRunner::new(
        config, inputter, modeler, callbacks,
    )?))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        callback::{tests::callback_config, train_basic},
        checkpoint,
        config::InputterConfig,
        datasets::Dataset,
        inputter::toy2d::Toy2d,
        modeler::{classification::ClassificationModeler, tests::modeler_config},
        network::mlp::Mlp,
        tensor::DataFormat,
    };

    fn runner(num_replicas: usize, epochs: usize, max_steps: Option<usize>) -> BasicRunner {
        let inputter = Toy2d::new(&InputterConfig {
            mode: Mode::Train,
            dataset_dir: PathBuf::new(),
            data_format: DataFormat::ChannelsLast,
            image_height: 0,
            image_width: 0,
            image_depth: 0,
            batch_size: 8,
            shuffle: true,
            seed: 1,
            dataset: Dataset::XOR,
            class_size: 32,
        })
        .unwrap();
        let mut config = modeler_config(Mode::Train);
        config.network.hidden_units = 8;
        let modeler =
            ClassificationModeler::new(&config, Box::new(Mlp::new(&config.network).unwrap()))
                .unwrap();
        BasicRunner::new(
            &RunnerConfig {
                mode: Mode::Train,
                epochs,
                max_steps,
                num_replicas,
            },
            Box::new(inputter),
            Box::new(modeler),
            vec![],
        )
        .unwrap()
    }

    fn weights(runner: &BasicRunner) -> Vec<f32> {
        runner
            .modeler()
            .variables()
            .iter()
            .flat_map(|v| v.tensor.to_vec())
            .collect()
    }

    #[test]
    fn test_train_steps_and_summary() {
        let summary = runner(1, 3, None).run().unwrap();
        assert_eq!(summary.global_step, 12);
        assert!(summary.final_loss.unwrap().is_finite());
        assert!(summary.mean_loss.unwrap() > 0.0);
    }

    #[test]
    fn test_max_steps() {
        let summary = runner(2, 10, Some(5)).run().unwrap();
        assert_eq!(summary.global_step, 5);
    }

    #[test]
    fn test_replicas_average_gradients() {
        let mut single = runner(1, 1, Some(1));
        let mut sharded = runner(2, 1, Some(1));
        let before = weights(&single);
        assert_eq!(before, weights(&sharded));

        let a = single.run().unwrap();
        let b = sharded.run().unwrap();
        assert!((a.final_loss.unwrap() - b.final_loss.unwrap()).abs() < 1e-5);
        let (after_single, after_sharded) = (weights(&single), weights(&sharded));
        assert_ne!(after_single, before);
        for (x, y) in after_single.iter().zip(&after_sharded) {
            assert!((x - y).abs() < 1e-5, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_uneven_replicas_rejected() {
        let BasicRunner {
            inputter, modeler, ..
        } = runner(1, 1, None);
        let config = RunnerConfig {
            mode: Mode::Train,
            epochs: 1,
            max_steps: None,
            num_replicas: 3,
        };
        assert!(matches!(
            BasicRunner::new(&config, inputter, modeler, vec![]),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_checkpoints_with_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let callback_config = callback_config(dir.path(), Mode::Train);
        let mut first = runner(1, 1, None);
        first.callbacks = vec![train_basic::build(&callback_config).unwrap()];
        first.run().unwrap();
        let latest = checkpoint::latest(&callback_config.model_dir).unwrap().unwrap();
        assert!(latest.ends_with("ckpt-4.json"));

        // resuming continues from the saved step
        let mut resumed = runner(1, 2, None);
        resumed.callbacks = vec![train_basic::build(&callback_config).unwrap()];
        assert_eq!(resumed.run().unwrap().global_step, 12);
    }
}
