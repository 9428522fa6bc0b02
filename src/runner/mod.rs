//! Runners drive a job: they pull batches from the inputter, evaluate the modeler and
//! notify the callbacks

use crate::error::Error;

pub mod basic;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub global_step: usize,
    /// loss of the last step
    pub final_loss: Option<f32>,
    /// mean loss over the steps of this run
    pub mean_loss: Option<f32>,
}

pub trait Runner {
    fn run(&mut self) -> Result<RunSummary, Error>;
}
