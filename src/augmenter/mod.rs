//! Per image preprocessing applied by inputters before batching

use rand::RngCore;

use crate::{error::Error, image_io::RawImage};

pub mod identity;
pub mod vgg_preprocessing;

pub trait Augmenter {
    fn name(&self) -> &str;

    fn augment(
        &self,
        image: RawImage,
        is_training: bool,
        rng: &mut dyn RngCore,
    ) -> Result<RawImage, Error>;
}
