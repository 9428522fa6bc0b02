//! Data loader
//!
//! Yields mini batches of sample indices. Inputters own the samples themselves and
//! materialize each batch of indices into tensors.

use rand::{SeedableRng, seq::SliceRandom};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

/// Errors for the dataloader
#[derive(Debug, Error, PartialEq)]
pub enum DataLoaderError {
    #[error("Batch size must be positive")]
    ZeroBatchSize,
    #[error("Dataset of {n_samples} samples cannot fill a single batch of {batch_size}")]
    NotEnoughSamples { n_samples: usize, batch_size: usize },
}

/// Data loader, returns batches of indices optionally shuffled.
/// The incomplete final batch is dropped so every batch has `batch_size` samples.
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
#[derive(Debug, Clone)]
pub struct DataLoader {
    n_samples: usize,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl DataLoader {
    pub fn new(
        n_samples: usize,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if n_samples < batch_size {
            return Err(DataLoaderError::NotEnoughSamples {
                n_samples,
                batch_size,
            });
        }
        Ok(Self {
            n_samples,
            batch_size,
            shuffle,
            seed,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn n_batches(&self) -> usize {
        self.n_samples / self.batch_size
    }

    /// Batches for one epoch, the shuffle order depends only on `(seed, epoch)`
    pub fn iter(&self, epoch: usize) -> DataLoaderIterator {
        let mut indices = (0..self.n_samples).collect::<Vec<_>>();
        if self.shuffle {
            let mut rng = Pcg64Mcg::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        DataLoaderIterator {
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of indices until the end of the dataset
pub struct DataLoaderIterator {
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl Iterator for DataLoaderIterator {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.curr_iter + self.batch_size;
        if end > self.indices.len() {
            return None;
        }
        let batch = self.indices[self.curr_iter..end].to_vec();
        self.curr_iter = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataloader() {
        let dataloader = DataLoader::new(5, 2, false, 0).unwrap();
        assert_eq!(dataloader.n_batches(), 2);
        let batches = dataloader.iter(0).collect::<Vec<_>>();
        // the remainder is dropped
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_dataloader_shuffle_is_seeded_per_epoch() {
        let dataloader = DataLoader::new(16, 4, true, 42).unwrap();
        let first = dataloader.iter(0).collect::<Vec<_>>();
        assert_eq!(first, dataloader.iter(0).collect::<Vec<_>>());

        let mut seen = first.concat();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());

        let other_epochs = (1..5)
            .map(|e| dataloader.iter(e).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert!(other_epochs.iter().any(|b| *b != first));
    }

    #[test]
    fn test_dataloader_errors() {
        assert_eq!(
            DataLoader::new(3, 0, false, 0).unwrap_err(),
            DataLoaderError::ZeroBatchSize
        );
        assert!(matches!(
            DataLoader::new(1, 2, false, 0),
            Err(DataLoaderError::NotEnoughSamples {
                n_samples: 1,
                batch_size: 2
            })
        ));
    }
}
