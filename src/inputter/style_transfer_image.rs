//! Content images read from a directory

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{Batch, BatchIter, Inputter};
use crate::{
    augmenter::Augmenter,
    config::{InputterConfig, Mode},
    dataloader::DataLoader,
    error::Error,
    image_io::{self, RawImage},
    tensor::DataFormat,
};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct StyleTransferImage {
    paths: Vec<PathBuf>,
    loader: DataLoader,
    augmenter: Option<Box<dyn Augmenter>>,
    height: usize,
    width: usize,
    depth: usize,
    data_format: DataFormat,
    is_training: bool,
    seed: u64,
}

/// Image files directly inside `dir`, sorted by name
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths = vec![];
    for entry in std::fs::read_dir(dir).map_err(Error::io(dir))? {
        let path = entry.map_err(Error::io(dir))?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

impl StyleTransferImage {
    pub fn new(
        config: &InputterConfig,
        augmenter: Option<Box<dyn Augmenter>>,
    ) -> Result<Self, Error> {
        let paths = list_images(&config.dataset_dir)?;
        log::info!(
            "Found {} images in {}",
            paths.len(),
            config.dataset_dir.display()
        );
        let loader = DataLoader::new(paths.len(), config.batch_size, config.shuffle, config.seed)?;
        Ok(Self {
            paths,
            loader,
            augmenter,
            height: config.image_height,
            width: config.image_width,
            depth: config.image_depth,
            data_format: config.data_format,
            is_training: config.mode != Mode::Infer,
            seed: config.seed,
        })
    }

    fn load_batch(&self, indices: &[usize], rng: &mut Pcg64Mcg) -> Result<Batch, Error> {
        let mut images = Vec::with_capacity(indices.len());
        let mut ids = Vec::with_capacity(indices.len());
        for &idx in indices {
            let path = &self.paths[idx];
            let mut image = RawImage::load(path, self.depth)?.resize(self.height, self.width)?;
            if let Some(augmenter) = &self.augmenter {
                image = augmenter.augment(image, self.is_training, rng)?;
            }
            images.push(image);
            ids.push(
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| idx.to_string()),
            );
        }
        Ok(Batch {
            inputs: image_io::stack(&images, self.data_format)?,
            labels: None,
            ids,
        })
    }
}

impl Inputter for StyleTransferImage {
    fn name(&self) -> &str {
        "style_transfer_image"
    }

    fn num_samples(&self) -> usize {
        self.paths.len()
    }

    fn batch_size(&self) -> usize {
        self.loader.batch_size()
    }

    fn batches(&self, epoch: usize) -> BatchIter<'_> {
        let mut rng = Pcg64Mcg::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        Box::new(
            self.loader
                .iter(epoch)
                .map(move |indices| self.load_batch(&indices, &mut rng)),
        )
    }
}

pub fn build(
    config: &InputterConfig,
    augmenter: Option<Box<dyn Augmenter>>,
) -> Result<Box<dyn Inputter>, Error> {
    Ok(Box::new(StyleTransferImage::new(config, augmenter)?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{augmenter::identity::Identity, datasets::Dataset};

    pub(crate) fn write_images(dir: &Path, n: usize, size: usize) {
        for i in 0..n {
            let data = (0..size * size * 3)
                .map(|v| ((v * 13 + i * 29) % 256) as f32)
                .collect();
            RawImage::new(size, size, 3, data)
                .unwrap()
                .save_png(&dir.join(format!("content_{}.png", i)))
                .unwrap();
        }
    }

    pub(crate) fn inputter_config(dir: &Path, batch_size: usize, mode: Mode) -> InputterConfig {
        InputterConfig {
            mode,
            dataset_dir: dir.to_path_buf(),
            data_format: DataFormat::ChannelsLast,
            image_height: 4,
            image_width: 4,
            image_depth: 3,
            batch_size,
            shuffle: false,
            seed: 0,
            dataset: Dataset::XOR,
            class_size: 0,
        }
    }

    #[test]
    fn test_batches_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), 3, 6);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let inputter = StyleTransferImage::new(
            &inputter_config(dir.path(), 2, Mode::Train),
            Some(Box::new(Identity)),
        )
        .unwrap();
        assert_eq!(inputter.num_samples(), 3);
        assert_eq!(inputter.batches_per_epoch(), 1);

        let batches = inputter.batches(0).collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].inputs.shape(), &[2, 4, 4, 3]);
        assert_eq!(batches[0].ids, vec!["content_0", "content_1"]);
        assert!(batches[0].labels.is_none());
    }

    #[test]
    fn test_too_few_images() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), 1, 4);
        assert!(matches!(
            StyleTransferImage::new(&inputter_config(dir.path(), 2, Mode::Train), None),
            Err(Error::DataLoader(_))
        ));
        assert!(matches!(
            StyleTransferImage::new(
                &inputter_config(&dir.path().join("missing"), 1, Mode::Train),
                None,
            ),
            Err(Error::Io { .. })
        ));
    }
}
