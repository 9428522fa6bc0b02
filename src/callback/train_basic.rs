//! Resumes training from the latest checkpoint and saves new ones periodically

use std::path::PathBuf;

use super::{Callback, RunState};
use crate::{
    checkpoint::{self, Checkpoint},
    config::CallbackConfig,
    error::Error,
    modeler::Modeler,
};

pub struct TrainBasic {
    model_dir: PathBuf,
    save_checkpoint_steps: usize,
    keep_checkpoint_max: usize,
    last_saved_step: Option<usize>,
}

impl TrainBasic {
    pub fn new(config: &CallbackConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            save_checkpoint_steps: config.save_checkpoint_steps.max(1),
            keep_checkpoint_max: config.keep_checkpoint_max,
            last_saved_step: None,
        }
    }

    fn save(&mut self, state: &RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        let path = Checkpoint::from_variables(&modeler.variables(), state.global_step)
            .save_in_dir(&self.model_dir, self.keep_checkpoint_max)?;
        log::info!("Saved checkpoint {}", path.display());
        self.last_saved_step = Some(state.global_step);
        Ok(())
    }
}

impl Callback for TrainBasic {
    fn name(&self) -> &str {
        "train_basic"
    }

    fn before_run(&mut self, state: &mut RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        match checkpoint::latest(&self.model_dir)? {
            Some(path) => {
                let checkpoint = Checkpoint::load(&path)?;
                let n_restored = checkpoint.restore_into::<&str>(&modeler.variables(), &[])?;
                state.global_step = checkpoint.global_step;
                self.last_saved_step = Some(checkpoint.global_step);
                log::info!(
                    "Restored {} variables from {} at step {}",
                    n_restored,
                    path.display(),
                    state.global_step
                );
            }
            None => log::info!(
                "No checkpoint in {}, training from scratch",
                self.model_dir.display()
            ),
        }
        Ok(())
    }

    fn after_step(&mut self, state: &RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        if state.global_step % self.save_checkpoint_steps == 0 {
            self.save(state, modeler)?;
        }
        Ok(())
    }

    fn after_run(&mut self, state: &RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        if self.last_saved_step != Some(state.global_step) {
            self.save(state, modeler)?;
        }
        Ok(())
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(TrainBasic::new(config)))
}
