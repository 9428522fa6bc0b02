//! Loads the latest checkpoint before inference

use std::path::PathBuf;

use super::{Callback, RunState};
use crate::{
    checkpoint::{self, Checkpoint, CheckpointError},
    config::CallbackConfig,
    error::Error,
    modeler::Modeler,
};

pub struct InferBasic {
    model_dir: PathBuf,
}

impl Callback for InferBasic {
    fn name(&self) -> &str {
        "infer_basic"
    }

    fn before_run(&mut self, state: &mut RunState, modeler: &dyn Modeler) -> Result<(), Error> {
        let path = checkpoint::latest(&self.model_dir)?
            .ok_or_else(|| CheckpointError::NotFound(self.model_dir.clone()))?;
        let checkpoint = Checkpoint::load(&path)?;
        checkpoint.restore_into::<&str>(&modeler.variables(), &[])?;
        state.global_step = checkpoint.global_step;
        log::info!(
            "Restored {} trained for {} steps",
            path.display(),
            checkpoint.global_step
        );
        Ok(())
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(InferBasic {
        model_dir: config.model_dir.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        callback::tests::{callback_config, mlp_modeler},
        config::Mode,
    };

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut callback = build(&callback_config(dir.path(), Mode::Infer)).unwrap();
        let modeler = mlp_modeler(Mode::Infer);
        let mut state = RunState::new(Mode::Infer, 1);
        assert!(matches!(
            callback.before_run(&mut state, &modeler),
            Err(Error::Checkpoint(CheckpointError::NotFound(_)))
        ));
    }

    #[test]
    fn test_restores_latest() {
        let dir = tempfile::tempdir().unwrap();
        let config = callback_config(dir.path(), Mode::Infer);
        let trained = mlp_modeler(Mode::Train);
        for mut value in trained.variables()[0].tensor.values().to_vec() {
            value.set_data(0.25);
        }
        Checkpoint::from_variables(&trained.variables(), 12)
            .save_in_dir(&config.model_dir, 1)
            .unwrap();

        let modeler = mlp_modeler(Mode::Infer);
        let mut state = RunState::new(Mode::Infer, 1);
        build(&config).unwrap().before_run(&mut state, &modeler).unwrap();
        assert_eq!(state.global_step, 12);
        assert!(modeler.variables()[0].tensor.to_vec().iter().all(|v| *v == 0.25));
    }
}
