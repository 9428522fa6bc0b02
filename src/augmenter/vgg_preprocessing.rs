//! VGG style preprocessing: resize, random mirror when training, mean subtraction

use rand::{Rng, RngCore};

use super::Augmenter;
use crate::{config::InputterConfig, error::Error, image_io::{ImageIoError, RawImage}};

/// Per channel mean of the ImageNet training set the VGG weights were fit on
pub const RGB_MEAN: [f32; 3] = [123.68, 116.78, 103.94];

/// The channel means to subtract for an image with `channels` channels.
/// Gray images use the average of the RGB means.
pub fn channel_means(channels: usize) -> Result<Vec<f32>, ImageIoError> {
    match channels {
        3 => Ok(RGB_MEAN.to_vec()),
        1 => Ok(vec![RGB_MEAN.iter().sum::<f32>() / 3.0]),
        other => Err(ImageIoError::UnsupportedDepth(other)),
    }
}

pub struct VggPreprocessing {
    height: usize,
    width: usize,
}

impl VggPreprocessing {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

impl Augmenter for VggPreprocessing {
    fn name(&self) -> &str {
        "vgg_preprocessing"
    }

    fn augment(
        &self,
        image: RawImage,
        is_training: bool,
        rng: &mut dyn RngCore,
    ) -> Result<RawImage, Error> {
        let mut image = image.resize(self.height, self.width)?;
        if is_training && rng.random_bool(0.5) {
            image = image.flip_horizontal();
        }
        Ok(image.subtract_mean(&channel_means(image.channels)?)?)
    }
}

pub fn build(config: &InputterConfig) -> Result<Box<dyn Augmenter>, Error> {
    Ok(Box::new(VggPreprocessing::new(
        config.image_height,
        config.image_width,
    )))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;

    #[test]
    fn test_resizes_and_centres() {
        let augmenter = VggPreprocessing::new(2, 2);
        let image = RawImage::new(4, 4, 3, [200.0, 150.0, 100.0].repeat(16)).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let out = augmenter.augment(image, false, &mut rng).unwrap();
        assert_eq!(out.dims(), (2, 2, 3));
        for pixel in out.data.chunks(3) {
            assert!((pixel[0] - (200.0 - 123.68)).abs() < 1e-2);
            assert!((pixel[1] - (150.0 - 116.78)).abs() < 1e-2);
            assert!((pixel[2] - (100.0 - 103.94)).abs() < 1e-2);
        }
    }

    #[test]
    fn test_flips_only_when_training() {
        let augmenter = VggPreprocessing::new(1, 2);
        let image = RawImage::new(1, 2, 3, vec![0.0, 0.0, 0.0, 255.0, 255.0, 255.0]).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(0);

        for _ in 0..8 {
            let out = augmenter.augment(image.clone(), false, &mut rng).unwrap();
            assert!(out.data[0] < 0.0);
        }

        let flipped = (0..64)
            .map(|_| augmenter.augment(image.clone(), true, &mut rng).unwrap())
            .filter(|out| out.data[0] > 0.0)
            .count();
        assert!(flipped > 0 && flipped < 64);
    }

    #[test]
    fn test_channel_means() {
        assert_eq!(channel_means(3).unwrap(), RGB_MEAN.to_vec());
        assert_eq!(channel_means(1).unwrap().len(), 1);
        assert!(channel_means(4).is_err());
    }
}
