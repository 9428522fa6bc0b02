//! Reading, converting and writing images
//!
//! Images travel through the pipeline as [`RawImage`]s, plain HWC `f32` buffers with pixel
//! values in `0..=255`, and only become graph tensors once a batch is stacked.

use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, Pixel, Rgb, imageops::FilterType};
use thiserror::Error;

use crate::tensor::{DataFormat, ImageDims, Tensor, TensorError};

/// Errors for image files and image tensors
#[derive(Debug, Error)]
pub enum ImageIoError {
    #[error("failed to read image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported image depth {0}, expected 1 or 3")]
    UnsupportedDepth(usize),
    #[error("per channel values hold {got} entries for {channels} channels")]
    ChannelCount { channels: usize, got: usize },
    #[error("images in a batch must share a size: {expected:?} vs {got:?}")]
    SizeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    #[error("cannot stack an empty list of images")]
    Empty,
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// HWC image with `f32` pixel values
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl RawImage {
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, ImageIoError> {
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(TensorError::ElementCount {
                shape: vec![height, width, channels],
                expected,
                got: data.len(),
            }
            .into());
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Decodes an image file, converting it to `depth` channels (1 = gray, 3 = RGB)
    pub fn load(path: &Path, depth: usize) -> Result<Self, ImageIoError> {
        let decoded = image::open(path).map_err(|source| ImageIoError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let (width, height, bytes) = match depth {
            1 => {
                let gray = decoded.to_luma8();
                (gray.width(), gray.height(), gray.into_raw())
            }
            3 => {
                let rgb = decoded.to_rgb8();
                (rgb.width(), rgb.height(), rgb.into_raw())
            }
            other => return Err(ImageIoError::UnsupportedDepth(other)),
        };
        let data = bytes.into_iter().map(f32::from).collect();
        Self::new(height as usize, width as usize, depth, data)
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    /// Bilinear resize to `height x width`
    pub fn resize(&self, height: usize, width: usize) -> Result<Self, ImageIoError> {
        if (height, width) == (self.height, self.width) {
            return Ok(self.clone());
        }
        let data = match self.channels {
            1 => resize_buffer::<Luma<f32>>(self, height, width),
            3 => resize_buffer::<Rgb<f32>>(self, height, width),
            other => return Err(ImageIoError::UnsupportedDepth(other)),
        }?;
        Self::new(height, width, self.channels, data)
    }

    /// Mirrors the image left to right
    pub fn flip_horizontal(&self) -> Self {
        let row_len = self.width * self.channels;
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks(row_len.max(1)) {
            for pixel in row.chunks(self.channels.max(1)).rev() {
                data.extend_from_slice(pixel);
            }
        }
        Self {
            data,
            ..self.clone()
        }
    }

    /// Adds `offsets[c]` to every pixel of channel `c`
    pub fn offset_channels(&self, offsets: &[f32]) -> Result<Self, ImageIoError> {
        if offsets.len() != self.channels {
            return Err(ImageIoError::ChannelCount {
                channels: self.channels,
                got: offsets.len(),
            });
        }
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(i, v)| v + offsets[i % self.channels])
            .collect();
        Ok(Self {
            data,
            ..self.clone()
        })
    }

    /// Subtracts a per channel mean, e.g. the VGG RGB mean
    pub fn subtract_mean(&self, mean: &[f32]) -> Result<Self, ImageIoError> {
        let negated = mean.iter().map(|m| -m).collect::<Vec<_>>();
        self.offset_channels(&negated)
    }

    /// Writes the image as PNG, values are clamped to `0..=255`
    pub fn save_png(&self, path: &Path) -> Result<(), ImageIoError> {
        let color = match self.channels {
            1 => image::ExtendedColorType::L8,
            3 => image::ExtendedColorType::Rgb8,
            other => return Err(ImageIoError::UnsupportedDepth(other)),
        };
        let bytes = self
            .data
            .iter()
            .map(|v| v.round().clamp(0.0, 255.0) as u8)
            .collect::<Vec<_>>();
        image::save_buffer_with_format(
            path,
            &bytes,
            self.width as u32,
            self.height as u32,
            color,
            image::ImageFormat::Png,
        )
        .map_err(|source| ImageIoError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Float pixels are clamped to `0..=1` by the resampler, so the buffer is rescaled around it
fn resize_buffer<P>(raw: &RawImage, height: usize, width: usize) -> Result<Vec<f32>, ImageIoError>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    let buffer = ImageBuffer::<P, Vec<f32>>::from_raw(
        raw.width as u32,
        raw.height as u32,
        raw.data.iter().map(|v| v / 255.0).collect(),
    )
    .ok_or(ImageIoError::ChannelCount {
        channels: raw.channels,
        got: raw.data.len(),
    })?;
    let resized =
        image::imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);
    Ok(resized.into_raw().into_iter().map(|v| v * 255.0).collect())
}

/// Stacks same sized images into a rank 4 tensor of leaf values
pub fn stack(images: &[RawImage], format: DataFormat) -> Result<Tensor, ImageIoError> {
    let first = images.first().ok_or(ImageIoError::Empty)?;
    let dims = ImageDims {
        batch: images.len(),
        height: first.height,
        width: first.width,
        channels: first.channels,
    };
    let mut data = vec![0.0; images.len() * first.data.len()];
    for (b, image) in images.iter().enumerate() {
        if image.dims() != first.dims() {
            return Err(ImageIoError::SizeMismatch {
                expected: first.dims(),
                got: image.dims(),
            });
        }
        for y in 0..dims.height {
            for x in 0..dims.width {
                for c in 0..dims.channels {
                    data[format.offset(&dims, b, y, x, c)] =
                        image.data[(y * dims.width + x) * dims.channels + c];
                }
            }
        }
    }
    Ok(Tensor::from_f32(format.shape(dims), &data)?)
}

/// Splits a rank 4 image tensor back into HWC images
pub fn unstack(tensor: &Tensor, format: DataFormat) -> Result<Vec<RawImage>, ImageIoError> {
    let dims = format.dims(tensor.shape())?;
    let values = tensor.to_vec();
    (0..dims.batch)
        .map(|b| {
            let mut data = Vec::with_capacity(dims.height * dims.width * dims.channels);
            for y in 0..dims.height {
                for x in 0..dims.width {
                    for c in 0..dims.channels {
                        data.push(values[format.offset(&dims, b, y, x, c)]);
                    }
                }
            }
            RawImage::new(dims.height, dims.width, dims.channels, data)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(height: usize, width: usize) -> RawImage {
        let data = (0..height * width * 3).map(|v| (v * 7 % 256) as f32).collect();
        RawImage::new(height, width, 3, data).unwrap()
    }

    #[test]
    fn test_png_roundtrip_and_gray_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let image = gradient_image(4, 5);
        image.save_png(&path).unwrap();

        let loaded = RawImage::load(&path, 3).unwrap();
        assert_eq!(loaded, image);

        let gray = RawImage::load(&path, 1).unwrap();
        assert_eq!(gray.dims(), (4, 5, 1));
        assert!(matches!(
            RawImage::load(&path, 2),
            Err(ImageIoError::UnsupportedDepth(2))
        ));
        assert!(matches!(
            RawImage::load(&dir.path().join("missing.png"), 3),
            Err(ImageIoError::Decode { .. })
        ));
    }

    #[test]
    fn test_save_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamped.png");
        RawImage::new(1, 1, 3, vec![-20.0, 300.0, 12.4])
            .unwrap()
            .save_png(&path)
            .unwrap();
        let loaded = RawImage::load(&path, 3).unwrap();
        assert_eq!(loaded.data, vec![0.0, 255.0, 12.0]);
    }

    #[test]
    fn test_resize_constant_image() {
        let image = RawImage::new(4, 4, 3, vec![100.0; 48]).unwrap();
        let resized = image.resize(2, 3).unwrap();
        assert_eq!(resized.dims(), (2, 3, 3));
        assert!(resized.data.iter().all(|v| (v - 100.0).abs() < 1e-3));
    }

    #[test]
    fn test_flip_and_mean() {
        let image = RawImage::new(1, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(
            image.flip_horizontal().data,
            vec![4.0, 5.0, 6.0, 1.0, 2.0, 3.0]
        );
        let centred = image.subtract_mean(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(centred.data, vec![0.0, 0.0, 0.0, 3.0, 3.0, 3.0]);
        assert!(image.subtract_mean(&[1.0]).is_err());
    }

    #[test]
    fn test_stack_unstack_both_formats() {
        let images = vec![gradient_image(2, 3), gradient_image(2, 3).flip_horizontal()];
        for format in [DataFormat::ChannelsLast, DataFormat::ChannelsFirst] {
            let tensor = stack(&images, format).unwrap();
            let expected = format.shape(ImageDims {
                batch: 2,
                height: 2,
                width: 3,
                channels: 3,
            });
            assert_eq!(tensor.shape(), expected.as_slice());
            assert_eq!(unstack(&tensor, format).unwrap(), images);
        }

        let mixed = vec![gradient_image(2, 3), gradient_image(3, 3)];
        assert!(matches!(
            stack(&mixed, DataFormat::ChannelsLast),
            Err(ImageIoError::SizeMismatch { .. })
        ));
    }
}
