//! Generated 2D points for binary classification

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use super::{Batch, BatchIter, Inputter};
use crate::{
    augmenter::Augmenter,
    config::InputterConfig,
    dataloader::DataLoader,
    datasets::{Dataset, Points, load_dataset},
    error::Error,
    tensor::Tensor,
};

pub struct Toy2d {
    dataset: Dataset,
    data: Vec<Vec<f32>>,
    labels: Vec<Vec<u8>>,
    loader: DataLoader,
}

impl Toy2d {
    pub fn new(config: &InputterConfig) -> Result<Self, Error> {
        let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
        let (data, labels): Points = load_dataset(config.dataset, config.class_size, &mut rng);
        log::info!("Generated {} {} points", data.len(), config.dataset);
        let loader = DataLoader::new(data.len(), config.batch_size, config.shuffle, config.seed)?;
        Ok(Self {
            dataset: config.dataset,
            data,
            labels,
            loader,
        })
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    fn batch(&self, indices: &[usize]) -> Result<Batch, Error> {
        let n_classes = self.labels.first().map(Vec::len).unwrap_or(0);
        let inputs = indices
            .iter()
            .flat_map(|&i| self.data[i].iter().copied())
            .collect::<Vec<_>>();
        let labels = indices
            .iter()
            .flat_map(|&i| self.labels[i].iter().map(|&l| f32::from(l)))
            .collect::<Vec<_>>();
        Ok(Batch {
            inputs: Tensor::from_f32(vec![indices.len(), 2], &inputs)?,
            labels: Some(Tensor::from_f32(vec![indices.len(), n_classes], &labels)?),
            ids: indices.iter().map(|i| i.to_string()).collect(),
        })
    }
}

impl Inputter for Toy2d {
    fn name(&self) -> &str {
        "toy2d"
    }

    fn num_samples(&self) -> usize {
        self.data.len()
    }

    fn batch_size(&self) -> usize {
        self.loader.batch_size()
    }

    fn batches(&self, epoch: usize) -> BatchIter<'_> {
        Box::new(
            self.loader
                .iter(epoch)
                .map(move |indices| self.batch(&indices)),
        )
    }
}

/// Points need no augmentation, a configured augmenter is ignored
pub fn build(
    config: &InputterConfig,
    augmenter: Option<Box<dyn Augmenter>>,
) -> Result<Box<dyn Inputter>, Error> {
    if let Some(augmenter) = augmenter {
        log::warn!("toy2d ignores augmenter {}", augmenter.name());
    }
    Ok(Box::new(Toy2d::new(config)?))
}
