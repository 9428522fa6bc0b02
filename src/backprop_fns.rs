//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph.

use crate::values::Value;

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    ReLU,
    Exp,
    Ln,
    Tanh,
    /// n-ary sum, used to keep reductions shallow
    Sum,
}

impl BackpropFunc {
    /// Number of operands, `None` for variadic functions
    pub fn n_operands(&self) -> Option<usize> {
        match self {
            BackpropFunc::Add
            | BackpropFunc::Sub
            | BackpropFunc::Mul
            | BackpropFunc::Div
            | BackpropFunc::Pow => Some(2),
            BackpropFunc::Neg
            | BackpropFunc::ReLU
            | BackpropFunc::Exp
            | BackpropFunc::Ln
            | BackpropFunc::Tanh => Some(1),
            BackpropFunc::Sum => None,
        }
    }
}

fn accumulate(value: &Value, delta: f32) {
    value.0.borrow_mut().grad += delta;
}

/// Represents backprop for the operation `in1 * in2 = out`
fn mul(in1: &Value, in2: &Value, grad: f32) {
    // read both operands first, `x * x` shares a single node
    let (d1, d2) = (in1.data(), in2.data());
    accumulate(in1, d2 * grad);
    accumulate(in2, d1 * grad);
}

/// Represents backprop for the operation `in1 / in2 = out`
fn div(in1: &Value, in2: &Value, grad: f32) {
    let (d1, d2) = (in1.data(), in2.data());
    accumulate(in1, grad / d2);
    accumulate(in2, -d1 * grad / d2.powi(2));
}

/// Represents backprop for the operation `in1^in2 = out`
/// only support numerical float powers, da^b/db is only defined for positive a, so gradient is
/// not calculated for the exponent
fn pow(in1: &Value, in2: &Value, grad: f32) {
    let (base, exponent) = (in1.data(), in2.data());
    accumulate(in1, exponent * base.powf(exponent - 1.0) * grad);
}

/// Propagates the gradient of `out` into its operands
pub fn update_gradients(out: &Value) {
    let (backprop_fn, grad, out_data, operands) = {
        let inner = out.0.borrow();
        let operands = inner
            .children
            .iter()
            .map(|c| Value(c.clone()))
            .collect::<Vec<_>>();
        (inner.backprop_fn, inner.grad, inner.data, operands)
    };
    let Some(backprop_fn) = backprop_fn else {
        return;
    };
    if let Some(n) = backprop_fn.n_operands() {
        debug_assert_eq!(n, operands.len(), "{:?}", backprop_fn);
    }

    match backprop_fn {
        BackpropFunc::Add | BackpropFunc::Sum => {
            for operand in &operands {
                accumulate(operand, grad);
            }
        }
        BackpropFunc::Sub => {
            accumulate(&operands[0], grad);
            accumulate(&operands[1], -grad);
        }
        BackpropFunc::Mul => mul(&operands[0], &operands[1], grad),
        BackpropFunc::Div => div(&operands[0], &operands[1], grad),
        BackpropFunc::Pow => pow(&operands[0], &operands[1], grad),
        BackpropFunc::Neg => accumulate(&operands[0], -grad),
        BackpropFunc::ReLU => {
            let x = operands[0].data();
            accumulate(&operands[0], if x > 0.0 { grad } else { 0.0 });
        }
        // d exp(x) / dx = exp(x), which is the output
        BackpropFunc::Exp => accumulate(&operands[0], out_data * grad),
        BackpropFunc::Ln => {
            let x = operands[0].data();
            accumulate(&operands[0], grad / x);
        }
        BackpropFunc::Tanh => accumulate(&operands[0], (1.0 - out_data * out_data) * grad),
    }
}
