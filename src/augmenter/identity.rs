//! Leaves images untouched

use rand::RngCore;

use super::Augmenter;
use crate::{config::InputterConfig, error::Error, image_io::RawImage};

pub struct Identity;

impl Augmenter for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn augment(
        &self,
        image: RawImage,
        _is_training: bool,
        _rng: &mut dyn RngCore,
    ) -> Result<RawImage, Error> {
        Ok(image)
    }
}

pub fn build(_config: &InputterConfig) -> Result<Box<dyn Augmenter>, Error> {
    Ok(Box::new(Identity))
}
