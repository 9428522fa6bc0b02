//! Shaped tensors built from graph [`Value`]s
//!
//! A [`Tensor`] is a row-major grid of values. Layout operations (reshape, permute, slicing)
//! reuse the existing values, so gradients flow through them untouched. Arithmetic creates
//! new graph nodes element by element.

use std::fmt::{self, Display};

use clap::ValueEnum;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::values::Value;

/// Errors for tensor shape handling
#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but {got} were given")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },
    #[error("shape mismatch: {lhs:?} vs {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("expected a rank {expected} tensor, got shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },
    #[error("invalid slice {start}..{end} along an axis of size {size}")]
    InvalidSlice {
        start: usize,
        end: usize,
        size: usize,
    },
    #[error("cannot split an axis of size {size} into {parts} equal parts")]
    UnevenSplit { size: usize, parts: usize },
    #[error("invalid permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },
    #[error("cannot concatenate an empty list of tensors")]
    EmptyConcat,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Memory layout of rank 4 image tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DataFormat {
    /// NHWC
    #[default]
    #[value(name = "channels_last")]
    ChannelsLast,
    /// NCHW
    #[value(name = "channels_first")]
    ChannelsFirst,
}

impl Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFormat::ChannelsLast => write!(f, "channels_last"),
            DataFormat::ChannelsFirst => write!(f, "channels_first"),
        }
    }
}

/// Logical dimensions of a batch of images, independent of layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl DataFormat {
    pub fn channel_axis(&self) -> usize {
        match self {
            DataFormat::ChannelsLast => 3,
            DataFormat::ChannelsFirst => 1,
        }
    }

    pub fn height_axis(&self) -> usize {
        match self {
            DataFormat::ChannelsLast => 1,
            DataFormat::ChannelsFirst => 2,
        }
    }

    pub fn width_axis(&self) -> usize {
        match self {
            DataFormat::ChannelsLast => 2,
            DataFormat::ChannelsFirst => 3,
        }
    }

    /// Reads the image dimensions out of a rank 4 shape
    pub fn dims(&self, shape: &[usize]) -> Result<ImageDims, TensorError> {
        if shape.len() != 4 {
            return Err(TensorError::Rank {
                expected: 4,
                shape: shape.to_vec(),
            });
        }
        Ok(ImageDims {
            batch: shape[0],
            height: shape[self.height_axis()],
            width: shape[self.width_axis()],
            channels: shape[self.channel_axis()],
        })
    }

    /// Rank 4 shape laid out in this format
    pub fn shape(&self, dims: ImageDims) -> Vec<usize> {
        match self {
            DataFormat::ChannelsLast => vec![dims.batch, dims.height, dims.width, dims.channels],
            DataFormat::ChannelsFirst => vec![dims.batch, dims.channels, dims.height, dims.width],
        }
    }

    /// Flat offset of pixel `(b, y, x, c)`
    pub fn offset(&self, dims: &ImageDims, b: usize, y: usize, x: usize, c: usize) -> usize {
        match self {
            DataFormat::ChannelsLast => {
                ((b * dims.height + y) * dims.width + x) * dims.channels + c
            }
            DataFormat::ChannelsFirst => {
                ((b * dims.channels + c) * dims.height + y) * dims.width + x
            }
        }
    }
}

fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Splits a shape around `axis` into (outer, size, inner) extents
fn around_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    (
        numel(&shape[..axis]),
        shape[axis],
        numel(&shape[axis + 1..]),
    )
}

/// Tensor of graph values, stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<Value>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<Value>) -> Result<Self, TensorError> {
        let expected = numel(&shape);
        if expected != data.len() {
            return Err(TensorError::ElementCount {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a tensor of fresh leaf values
    pub fn from_f32(shape: Vec<usize>, data: &[f32]) -> Result<Self, TensorError> {
        Self::new(shape, data.iter().map(|v| Value::new(*v)).collect())
    }

    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let data = (0..numel(&shape)).map(|_| Value::new(value)).collect();
        Self { shape, data }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Normally distributed leaf values with mean zero
    pub fn randn<R: Rng + ?Sized>(
        shape: Vec<usize>,
        std: f32,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        let normal = Normal::new(0.0, std)
            .map_err(|e| TensorError::InvalidParameter(format!("std {}: {}", std, e)))?;
        let data = (0..numel(&shape))
            .map(|_| Value::new(normal.sample(rng)))
            .collect();
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn values(&self) -> &[Value] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().map(|v| v.data()).collect()
    }

    pub fn get(&self, index: &[usize]) -> Option<&Value> {
        if index.len() != self.rank() || index.iter().zip(&self.shape).any(|(i, s)| i >= s) {
            return None;
        }
        let flat = index
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (i, s)| acc * s + i);
        self.data.get(flat)
    }

    /// Copy made of leaf values, cut from the graph that produced this tensor
    pub fn detach(&self) -> Tensor {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|v| v.detach()).collect(),
        }
    }

    /// Number of elements in a single example, i.e. all but the leading dimension
    pub fn size_per_example(&self) -> usize {
        numel(self.shape.get(1..).unwrap_or(&[]))
    }

    fn check_axis(&self, axis: usize) -> Result<(), TensorError> {
        if axis >= self.rank() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                rank: self.rank(),
            });
        }
        Ok(())
    }
}

// Layout operations, these share values with the source tensor
impl Tensor {
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Tensor, TensorError> {
        Tensor::new(shape, self.data.clone())
    }

    /// Inserts a dimension of size one at `axis`
    pub fn expand_dims(&self, axis: usize) -> Result<Tensor, TensorError> {
        if axis > self.rank() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                rank: self.rank(),
            });
        }
        let mut shape = self.shape.clone();
        shape.insert(axis, 1);
        self.reshape(shape)
    }

    /// Reorders the axes, output axis `i` is input axis `perm[i]`
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor, TensorError> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        let valid = perm.len() == rank
            && perm.iter().all(|&p| p < rank && !std::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(TensorError::InvalidPermutation {
                perm: perm.to_vec(),
                rank,
            });
        }

        let out_shape = perm.iter().map(|&p| self.shape[p]).collect::<Vec<_>>();
        let mut in_strides = vec![1; rank];
        for axis in (0..rank.saturating_sub(1)).rev() {
            in_strides[axis] = in_strides[axis + 1] * self.shape[axis + 1];
        }

        let mut data = Vec::with_capacity(self.numel());
        let mut index = vec![0; rank];
        for _ in 0..self.numel() {
            let offset = index
                .iter()
                .zip(perm)
                .map(|(i, &p)| i * in_strides[p])
                .sum::<usize>();
            data.push(self.data[offset].clone());
            // odometer increment over the output shape
            for axis in (0..rank).rev() {
                index[axis] += 1;
                if index[axis] < out_shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Tensor::new(out_shape, data)
    }

    /// Swaps the last two axes, e.g. `[b, m, n] -> [b, n, m]`
    pub fn transpose_last2(&self) -> Result<Tensor, TensorError> {
        let rank = self.rank();
        if rank < 2 {
            return Err(TensorError::Rank {
                expected: 2,
                shape: self.shape.clone(),
            });
        }
        let mut perm = (0..rank).collect::<Vec<_>>();
        perm.swap(rank - 2, rank - 1);
        self.permute(&perm)
    }

    /// Elements `start..end` along `axis`
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Tensor, TensorError> {
        self.check_axis(axis)?;
        let (outer, size, inner) = around_axis(&self.shape, axis);
        if start > end || end > size {
            return Err(TensorError::InvalidSlice { start, end, size });
        }
        let mut data = Vec::with_capacity(outer * (end - start) * inner);
        for o in 0..outer {
            let base = o * size * inner;
            data.extend_from_slice(&self.data[base + start * inner..base + end * inner]);
        }
        let mut shape = self.shape.clone();
        shape[axis] = end - start;
        Tensor::new(shape, data)
    }

    /// Splits `axis` into `parts` equally sized tensors
    pub fn split(&self, axis: usize, parts: usize) -> Result<Vec<Tensor>, TensorError> {
        self.check_axis(axis)?;
        let size = self.shape[axis];
        if parts == 0 || size % parts != 0 {
            return Err(TensorError::UnevenSplit { size, parts });
        }
        let step = size / parts;
        (0..parts)
            .map(|i| self.slice_axis(axis, i * step, (i + 1) * step))
            .collect()
    }

    /// Joins tensors along `axis`, all other dimensions must agree
    pub fn concat(tensors: &[Tensor], axis: usize) -> Result<Tensor, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyConcat)?;
        first.check_axis(axis)?;
        for t in &tensors[1..] {
            let compatible = t.rank() == first.rank()
                && t.shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(TensorError::ShapeMismatch {
                    lhs: first.shape.clone(),
                    rhs: t.shape.clone(),
                });
            }
        }

        let (outer, _, inner) = around_axis(&first.shape, axis);
        let total = tensors.iter().map(|t| t.shape[axis]).sum::<usize>();
        let mut data = Vec::with_capacity(outer * total * inner);
        for o in 0..outer {
            for t in tensors {
                let chunk = t.shape[axis] * inner;
                data.extend_from_slice(&t.data[o * chunk..(o + 1) * chunk]);
            }
        }
        let mut shape = first.shape.clone();
        shape[axis] = total;
        Tensor::new(shape, data)
    }

    /// Repeats a tensor with a leading dimension of one `n` times along that dimension
    pub fn repeat_batch(&self, n: usize) -> Result<Tensor, TensorError> {
        if self.shape.first() != Some(&1) {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: vec![1],
            });
        }
        let mut shape = self.shape.clone();
        shape[0] = n;
        let data = (0..n).flat_map(|_| self.data.iter().cloned()).collect();
        Tensor::new(shape, data)
    }
}

// Arithmetic, these create new graph nodes
impl Tensor {
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(&Value) -> Value,
    {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    pub fn zip_with<F>(&self, other: &Tensor, f: F) -> Result<Tensor, TensorError>
    where
        F: Fn(&Value, &Value) -> Value,
    {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
            });
        }
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| f(a, b))
                .collect(),
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn add_scalar(&self, value: f32) -> Tensor {
        self.map(|v| v + &Value::new(value))
    }

    pub fn mul_scalar(&self, factor: f32) -> Tensor {
        self.map(|v| v.scale(factor))
    }

    pub fn sum(&self) -> Value {
        Value::sum_of(&self.data)
    }

    pub fn mean(&self) -> Value {
        self.sum().scale(1.0 / self.numel().max(1) as f32)
    }

    /// Half the sum of squares, `sum(x ** 2) / 2`
    pub fn l2_loss(&self) -> Value {
        Value::sum_of(self.data.iter().map(|v| v.square())).scale(0.5)
    }

    /// Matrix product of rank 2 tensors, or batched product of rank 3 tensors
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        let mismatch = || TensorError::ShapeMismatch {
            lhs: self.shape.clone(),
            rhs: other.shape.clone(),
        };
        let (batch, m, k, n) = match (self.shape.as_slice(), other.shape.as_slice()) {
            ([m, k], [k2, n]) if k == k2 => (1, *m, *k, *n),
            ([b, m, k], [b2, k2, n]) if b == b2 && k == k2 => (*b, *m, *k, *n),
            _ => return Err(mismatch()),
        };

        let mut data = Vec::with_capacity(batch * m * n);
        for b in 0..batch {
            let lhs = &self.data[b * m * k..(b + 1) * m * k];
            let rhs = &other.data[b * k * n..(b + 1) * k * n];
            for i in 0..m {
                for j in 0..n {
                    data.push(Value::sum_of(
                        (0..k).map(|p| &lhs[i * k + p] * &rhs[p * n + j]),
                    ));
                }
            }
        }
        let shape = if self.rank() == 2 {
            vec![m, n]
        } else {
            vec![batch, m, n]
        };
        Tensor::new(shape, data)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::assert_eq_float;

    fn arange(shape: Vec<usize>) -> Tensor {
        let n = numel(&shape);
        Tensor::from_f32(shape, &(0..n).map(|v| v as f32).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_element_count_checked() {
        let err = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            TensorError::ElementCount {
                shape: vec![2, 2],
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn test_permute_and_transpose() {
        let t = arange(vec![2, 3]);
        let tt = t.transpose_last2().unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

        // NHWC -> NCHW
        let nhwc = arange(vec![1, 2, 2, 3]);
        let nchw = nhwc.permute(&[0, 3, 1, 2]).unwrap();
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);
        assert_eq!(nchw.get(&[0, 2, 1, 0]).unwrap().data(), 8.0);

        assert!(matches!(
            t.permute(&[0, 0]),
            Err(TensorError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn test_slice_split_concat() {
        let t = arange(vec![2, 4]);
        let s = t.slice_axis(1, 1, 3).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![1.0, 2.0, 5.0, 6.0]);

        let parts = t.split(1, 2).unwrap();
        assert_eq!(parts[1].to_vec(), vec![2.0, 3.0, 6.0, 7.0]);
        let joined = Tensor::concat(&parts, 1).unwrap();
        assert_eq!(joined.to_vec(), t.to_vec());

        assert_eq!(
            t.split(1, 3).unwrap_err(),
            TensorError::UnevenSplit { size: 4, parts: 3 }
        );
        assert!(matches!(
            t.slice_axis(1, 3, 5),
            Err(TensorError::InvalidSlice { .. })
        ));
    }

    #[test]
    fn test_batched_matmul() {
        let a = arange(vec![2, 2, 3]);
        let b = Tensor::full(vec![2, 3, 1], 1.0);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2, 1]);
        assert_eq!(c.to_vec(), vec![3.0, 12.0, 21.0, 30.0]);

        let err = a.matmul(&arange(vec![2, 2, 1])).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_matmul_backward() {
        // y = sum(A x), dy/dx_j = sum_i A_ij
        let a = arange(vec![2, 2]);
        let x = Tensor::from_f32(vec![2, 1], &[1.0, 1.0]).unwrap();
        let y = a.matmul(&x).unwrap().sum();
        assert_eq!(y.data(), 6.0);
        y.backward();
        assert_eq!(x.values()[0].grad(), 2.0);
        assert_eq!(x.values()[1].grad(), 4.0);
    }

    #[test]
    fn test_l2_loss_and_sizes() {
        let t = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq_float!(t.l2_loss().data(), 15.0);
        assert_eq!(t.size_per_example(), 2);
        assert_eq_float!(t.mean().data(), 2.5);
    }

    #[test]
    fn test_repeat_batch_and_expand_dims() {
        let t = arange(vec![2, 2]).expand_dims(0).unwrap();
        assert_eq!(t.shape(), &[1, 2, 2]);
        let r = t.repeat_batch(3).unwrap();
        assert_eq!(r.shape(), &[3, 2, 2]);
        assert_eq!(r.get(&[2, 1, 1]).unwrap().data(), 3.0);
    }

    #[test]
    fn test_data_format_offsets() {
        let dims = ImageDims {
            batch: 1,
            height: 2,
            width: 3,
            channels: 4,
        };
        let nhwc = DataFormat::ChannelsLast;
        let nchw = DataFormat::ChannelsFirst;
        assert_eq!(nhwc.shape(dims), vec![1, 2, 3, 4]);
        assert_eq!(nchw.shape(dims), vec![1, 4, 2, 3]);
        assert_eq!(nhwc.offset(&dims, 0, 1, 2, 3), 23);
        assert_eq!(nchw.offset(&dims, 0, 1, 2, 3), 23);
        assert_eq!(nchw.offset(&dims, 0, 0, 0, 1), 6);
        assert_eq!(nchw.dims(&[1, 4, 2, 3]).unwrap(), dims);
    }

    #[test]
    fn test_randn_is_seeded() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let a = Tensor::randn(vec![4], 1.0, &mut rng).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let b = Tensor::randn(vec![4], 1.0, &mut rng).unwrap();
        assert_eq!(a, b);
        assert!(Tensor::randn(vec![1], f32::NAN, &mut rng).is_err());
    }
}
