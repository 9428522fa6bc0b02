//! Data pipelines producing batches of tensors

use crate::{error::Error, tensor::Tensor};

pub mod style_transfer_image;
pub mod toy2d;

/// One step worth of samples
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Option<Tensor>,
    /// identifies each sample, e.g. the file stem of an image
    pub ids: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Splits the batch into `n` equally sized shards along the leading dimension
    pub fn shard(&self, n: usize) -> Result<Vec<Batch>, Error> {
        if n == 1 {
            return Ok(vec![self.clone()]);
        }
        let inputs = self.inputs.split(0, n)?;
        let labels = match &self.labels {
            Some(labels) => labels.split(0, n)?.into_iter().map(Some).collect(),
            None => vec![None; n],
        };
        let per_shard = self.ids.len() / n;
        Ok(inputs
            .into_iter()
            .zip(labels)
            .zip(self.ids.chunks(per_shard.max(1)))
            .map(|((inputs, labels), ids)| Batch {
                inputs,
                labels,
                ids: ids.to_vec(),
            })
            .collect())
    }
}

pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<Batch, Error>> + 'a>;

pub trait Inputter {
    fn name(&self) -> &str;

    fn num_samples(&self) -> usize;

    /// Samples per step across all replicas
    fn batch_size(&self) -> usize;

    fn batches_per_epoch(&self) -> usize {
        self.num_samples() / self.batch_size().max(1)
    }

    /// Batches of one epoch, the order is reproducible for a given epoch
    fn batches(&self, epoch: usize) -> BatchIter<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard() {
        let batch = Batch {
            inputs: Tensor::from_f32(vec![4, 2], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
                .unwrap(),
            labels: Some(Tensor::from_f32(vec![4, 1], &[0.0, 1.0, 0.0, 1.0]).unwrap()),
            ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        };
        let shards = batch.shard(2).unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[1].inputs.to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(shards[1].labels.as_ref().unwrap().to_vec(), vec![0.0, 1.0]);
        assert_eq!(shards[1].ids, vec!["c", "d"]);
        // shards share values with the batch
        assert_eq!(shards[0].inputs.values()[0].id(), batch.inputs.values()[0].id());

        assert!(batch.shard(3).is_err());
    }
}
