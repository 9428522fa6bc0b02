//! Writes stylized images produced during inference

use std::path::PathBuf;

use super::{Callback, RunState};
use crate::{
    config::CallbackConfig,
    error::Error,
    image_io,
    modeler::Modeler,
    tensor::DataFormat,
};

pub struct InferStyleTransfer {
    output_dir: PathBuf,
    data_format: DataFormat,
    n_written: usize,
}

impl Callback for InferStyleTransfer {
    fn name(&self) -> &str {
        "infer_style_transfer"
    }

    fn before_run(&mut self, _state: &mut RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        std::fs::create_dir_all(&self.output_dir).map_err(Error::io(&self.output_dir))
    }

    fn after_step(&mut self, state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        let Some(predictions) = &state.predictions else {
            return Ok(());
        };
        let images = image_io::unstack(predictions, self.data_format)?;
        for (i, image) in images.iter().enumerate() {
            let name = state
                .batch_ids
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("{}_{}", state.global_step, i));
            let path = self.output_dir.join(format!("{}.png", name));
            image.save_png(&path)?;
            log::debug!("wrote {}", path.display());
            self.n_written += 1;
        }
        Ok(())
    }

    fn after_run(&mut self, _state: &RunState, _modeler: &dyn Modeler) -> Result<(), Error> {
        log::info!(
            "Wrote {} stylized images to {}",
            self.n_written,
            self.output_dir.display()
        );
        Ok(())
    }
}

pub fn build(config: &CallbackConfig) -> Result<Box<dyn Callback>, Error> {
    Ok(Box::new(InferStyleTransfer {
        output_dir: config.output_dir.clone(),
        data_format: config.data_format,
        n_written: 0,
    }))
}
