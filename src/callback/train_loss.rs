//! Logs the running loss and learning rate

use super::{Callback, RunState};
use crate::{config::CallbackConfig, error::Error, modeler::Modeler};

pub struct TrainLoss {
    log_every_n_iter: usize,
    accumulated: f32,
    n_accumulated: usize,
}

impl TrainLoss {
    pub fn new(config: &CallbackConfig) -> Self {
        Self {
            log_every_n_iter: config.log_every_n_iter.max(1),
            accumulated: 0.0,
            n_accumulated: 0,
        }
    }

    /// Mean loss since the last log line, resets the accumulator
    fn take_average(&mut self) -> Option<f32> {
        if self.n_accumulated == 0 {
            return None;
        }
        let average = self.accumulated / self.n_accumulated as f32;
        self.accumulated = 0.0;
        self.n_accumulated = 0;
        Some(average)
    }
}

impl Callback for TrainLoss {
    fn name(&self) -> &str {
        "train_loss"
    }

    fn after_step(&mut self, state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        if let Some(loss) = state.loss {
            self.accumulated += loss;
            self.n_accumulated += 1;
        }
        if state.global_step % self.log_every_n_iter == 0 {
            if let Some(average) = self.take_average() {
                let terms = state
                    .metrics
                    .iter()
                    .map(|(name, value)| format!("{}: {:.4}", name, value))
                    .collect::<Vec<_>>()
                    .join(", ");
                log::info!(
                    "step: {}, loss: {:.6}, lr: {:.6}, {}",
                    state.global_step,
                    average,
                    state.learning_rate,
                    terms
                );
            }
        }
        Ok(())
    }

    fn after_run(&mut self, state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        if let Some(average) = self.take_average() {
            log::info!("step: {}, loss: {:.6}", state.global_step, average);
        }
        Ok(())
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(TrainLoss::new(config)))
}
