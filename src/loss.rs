//! Loss function(s)

use crate::{
    nn::{NNError, softmax},
    tensor::{Tensor, TensorError},
    values::Value,
};

/// Mean Squared Error Loss between two vectors of values
pub struct MSELoss;

impl MSELoss {
    pub fn call<T, U>(y_pred: &[T], y_true: &[U]) -> Value
    where
        T: AsRef<Value>,
        U: AsRef<Value>,
    {
        let loss = Value::sum_of(
            y_pred
                .iter()
                .zip(y_true.iter())
                .map(|(a, b)| (a.as_ref() - b.as_ref()).square()),
        );
        loss / Value::new(y_pred.len() as f32)
    }

    /// Same as [`MSELoss::call`] on tensors of identical shape
    pub fn tensors(y_pred: &Tensor, y_true: &Tensor) -> Result<Value, TensorError> {
        if y_pred.shape() != y_true.shape() {
            return Err(TensorError::ShapeMismatch {
                lhs: y_pred.shape().to_vec(),
                rhs: y_true.shape().to_vec(),
            });
        }
        Ok(Self::call(y_pred.values(), y_true.values()))
    }
}

/// Cross entropy of softmax(logits) against one hot labels, averaged over the batch
pub fn softmax_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Value, NNError> {
    if logits.shape() != labels.shape() {
        return Err(TensorError::ShapeMismatch {
            lhs: logits.shape().to_vec(),
            rhs: labels.shape().to_vec(),
        }
        .into());
    }
    let probs = softmax(logits)?;
    // clamp away from zero so ln stays finite, the clamp is a constant offset
    let eps = Value::new(1e-7);
    let total = Value::sum_of(
        probs
            .values()
            .iter()
            .zip(labels.values())
            .filter(|(_, y)| y.data() != 0.0)
            .map(|(p, y)| y * &(p + &eps).ln()),
    );
    let batch = logits.shape().first().copied().unwrap_or(1).max(1);
    Ok((-&total).scale(1.0 / batch as f32))
}

/// Half the squared L2 norm, `sum(t ** 2) / 2`
pub fn l2_loss(tensor: &Tensor) -> Value {
    tensor.l2_loss()
}
