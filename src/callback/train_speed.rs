//! Logs throughput in samples per second

use std::time::{Duration, Instant};

use super::{Callback, RunState};
use crate::{config::CallbackConfig, error::Error, modeler::Modeler};

pub struct TrainSpeed {
    log_every_n_iter: usize,
    step_start: Option<Instant>,
    elapsed: Duration,
    samples: usize,
}

impl TrainSpeed {
    pub fn new(config: &CallbackConfig) -> Self {
        Self {
            log_every_n_iter: config.log_every_n_iter.max(1),
            step_start: None,
            elapsed: Duration::ZERO,
            samples: 0,
        }
    }

    fn samples_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (self.samples > 0 && secs > 0.0).then(|| self.samples as f64 / secs)
    }
}

impl Callback for TrainSpeed {
    fn name(&self) -> &str {
        "train_speed"
    }

    fn before_step(&mut self, _state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        self.step_start = Some(Instant::now());
        Ok(())
    }

    fn after_step(&mut self, state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        if let Some(start) = self.step_start.take() {
            self.elapsed += start.elapsed();
            self.samples += state.batch_size;
        }
        if state.global_step % self.log_every_n_iter == 0 {
            if let Some(speed) = self.samples_per_sec() {
                log::info!("step: {}, speed: {:.2} samples/sec", state.global_step, speed);
            }
            self.elapsed = Duration::ZERO;
            self.samples = 0;
        }
        Ok(())
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(TrainSpeed::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        callback::tests::{callback_config, mlp_modeler},
        config::Mode,
    };

    #[test]
    fn test_counts_samples_until_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut callback = TrainSpeed::new(&callback_config(dir.path(), Mode::Train));
        let modeler = mlp_modeler(Mode::Train);
        let mut state = RunState::new(Mode::Train, 8);

        state.global_step = 1;
        callback.before_step(&state, &modeler).unwrap();
        callback.after_step(&state, &modeler).unwrap();
        assert_eq!(callback.samples, 8);

        // without a matching before_step nothing is counted
        state.global_step = 2;
        callback.after_step(&state, &modeler).unwrap();
        assert_eq!(callback.samples, 0);
        assert_eq!(callback.elapsed, Duration::ZERO);
    }
}
