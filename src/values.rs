//! Scalar values which form a computation graph
//!
//! Every tensor in the crate is a grid of [`Value`]s. Operations on values record their
//! operands so that [`Value::backward`] can walk the graph in reverse and accumulate
//! gradients into every node that contributed to the result.
use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::backprop_fns::{BackpropFunc, update_gradients};

type SharedValue = Rc<RefCell<InnerValue>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Newtype representing a shared value in a computation graph
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f32) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None))))
    }

    /// Create a new value derived from an operation on other values (i.e. not a leaf node)
    fn new_derived(data: f32, backprop_fn: BackpropFunc, operands: &[&Value]) -> Self {
        let mut inner = InnerValue::new(data, Some(backprop_fn));
        inner.children = operands.iter().map(|v| v.0.clone()).collect();
        Self(Rc::new(RefCell::new(inner)))
    }

    pub fn data(&self) -> f32 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f32 {
        self.0.borrow().grad
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    /// Whether the value was created directly rather than by an operation
    pub fn is_leaf(&self) -> bool {
        self.0.borrow().backprop_fn.is_none()
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    pub fn set_data(&mut self, data: f32) {
        self.0.borrow_mut().data = data;
    }

    /// A leaf copy of this value, gradients do not flow through it
    pub fn detach(&self) -> Value {
        Value::new(self.data())
    }

    /// Zeros out all gradients in the computation graph which are children of this node
    pub fn zero_grad(&mut self) {
        for value in self.topological_order() {
            value.0.borrow_mut().grad = 0.0;
        }
    }

    pub fn backward(&self) {
        // d out / d out = 1
        self.0.borrow_mut().grad = 1.0;

        // apply backprop, reversed to start from root first
        for value in self.topological_order().into_iter().rev() {
            update_gradients(&value);
        }
    }

    /// Nodes reachable from this one in post order (operands before results).
    /// Iterative so long reduction chains cannot exhaust the stack.
    fn topological_order(&self) -> Vec<Value> {
        let mut order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack = vec![(self.clone(), false)];

        while let Some((value, expanded)) = stack.pop() {
            if expanded {
                order.push(value);
                continue;
            }
            if !visited.insert(value.id()) {
                continue;
            }
            stack.push((value.clone(), true));
            for child in value.0.borrow().children.iter() {
                if !visited.contains(&child.borrow().id) {
                    stack.push((Value(child.clone()), false));
                }
            }
        }
        order
    }
}

// Various operations on values
impl Value {
    pub fn pow(&self, other: &Value) -> Value {
        Value::new_derived(
            self.data().powf(other.data()),
            BackpropFunc::Pow,
            &[self, other],
        )
    }

    pub fn relu(&self) -> Value {
        Value::new_derived(self.data().max(0.0), BackpropFunc::ReLU, &[self])
    }

    pub fn exp(&self) -> Value {
        Value::new_derived(self.data().exp(), BackpropFunc::Exp, &[self])
    }

    pub fn ln(&self) -> Value {
        Value::new_derived(self.data().ln(), BackpropFunc::Ln, &[self])
    }

    pub fn tanh(&self) -> Value {
        Value::new_derived(self.data().tanh(), BackpropFunc::Tanh, &[self])
    }

    pub fn square(&self) -> Value {
        self * self
    }

    /// `max(a, b) = relu(a - b) + b`, routes the gradient to the larger operand
    pub fn max(&self, other: &Value) -> Value {
        &(self - other).relu() + other
    }

    /// Multiplies by a constant which does not take part in backprop
    pub fn scale(&self, factor: f32) -> Value {
        self * &Value::new(factor)
    }

    /// Sums any number of values into a single node
    pub fn sum_of<I>(values: I) -> Value
    where
        I: IntoIterator,
        I::Item: AsRef<Value>,
    {
        let values = values.into_iter().collect::<Vec<_>>();
        if values.is_empty() {
            return Value::new(0.0);
        }
        let data = values.iter().map(|v| v.as_ref().data()).sum();
        let operands = values.iter().map(|v| v.as_ref()).collect::<Vec<_>>();
        Value::new_derived(data, BackpropFunc::Sum, &operands)
    }
}

// pretty print a value and its children recursively in a JSON-like format
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_value(value: &Value, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let inner = value.0.borrow();
            let indent_str = " ".repeat(indent);
            let indent_inner = " ".repeat(indent + 2);
            writeln!(f, "{}{{", indent_str)?;
            writeln!(f, "{}\"data\": {},", indent_inner, inner.data)?;
            writeln!(f, "{}\"grad\": {},", indent_inner, inner.grad)?;
            writeln!(f, "{}\"id\": {},", indent_inner, inner.id)?;
            writeln!(
                f,
                "{}\"backprop_fn\": {:?},",
                indent_inner, inner.backprop_fn
            )?;
            writeln!(f, "{}\"children\": [", indent_inner)?;
            for (i, child) in inner.children.iter().enumerate() {
                let child_value = Value(child.clone());
                fmt_value(&child_value, indent + 4, f)?;
                if i < inner.children.len() - 1 {
                    writeln!(f, ",")?;
                } else {
                    writeln!(f)?;
                }
            }
            writeln!(f, "{}]", indent_inner)?;
            write!(f, "{}}}", indent_str)
        }
        fmt_value(self, 0, f)
    }
}

/// Implements a binary operator on `&Value` which records a graph node
macro_rules! impl_binary_op(
    ($trait:ident, $trait_method:ident, $op:tt, $backprop_fn:expr) => {
        impl $trait for &Value {
            type Output = Value;

            fn $trait_method(self, other: &Value) -> Value {
                Value::new_derived(self.data() $op other.data(), $backprop_fn, &[self, other])
            }
        }
    }
);
impl_binary_op!(Add, add, +, BackpropFunc::Add);
impl_binary_op!(Sub, sub, -, BackpropFunc::Sub);
impl_binary_op!(Mul, mul, *, BackpropFunc::Mul);
impl_binary_op!(Div, div, /, BackpropFunc::Div);

impl Neg for &Value {
    type Output = Value;

    fn neg(self) -> Value {
        Value::new_derived(-self.data(), BackpropFunc::Neg, &[self])
    }
}

impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Value::sum_of(iter)
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.borrow().data == other.0.borrow().data
    }
}

impl Eq for Value {}

// unfortunate that there isn't a blanket impl for AsRef<T> for T
// <https://doc.rust-lang.org/std/convert/trait.AsRef.html#reflexivity>
impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}

#[derive(Debug)]
pub(crate) struct InnerValue {
    // the network uses 32 bit precision floats (roughly 7 decimal digits of precision)
    pub(crate) data: f32,
    /// gradient of the value with respect to the output
    pub(crate) grad: f32,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    pub(crate) children: Vec<SharedValue>,
    /// Unique identifier for the node
    id: u64,
    /// The function which created this value from its children
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerValue {
    fn new(data: f32, backprop_fn: Option<BackpropFunc>) -> Self {
        Self {
            data,
            grad: 0.0,
            children: vec![],
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            backprop_fn,
        }
    }
}

// Unlinks uniquely owned children one at a time, a long chain would otherwise recurse
// once per node while dropping
impl Drop for InnerValue {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(child) = stack.pop() {
            if let Ok(cell) = Rc::try_unwrap(child) {
                stack.append(&mut cell.into_inner().children);
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[macro_export]
    macro_rules! assert_eq_float {
        ($a:expr, $b:expr) => {
            $crate::assert_eq_float!($a, $b, 1e-6)
        };
        ($a:expr, $b:expr, $tol:expr) => {{
            let (a, b) = ($a, $b);
            assert!((a - b).abs() < $tol, "{} != {}", a, b);
        }};
    }

    #[test]
    fn test_add() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a + &b;
        assert_eq!(c.data(), 5.0);
        c.backward();

        // dc/da = 1
        // dc/db = 1
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_mul_same_operand() {
        let a = Value::new(3.0);
        let c = a.square();
        assert_eq!(c.data(), 9.0);

        c.backward();

        // dc/da = 2a
        assert_eq!(a.grad(), 6.0);
    }

    #[test]
    fn test_div() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a / &b;
        assert_eq_float!(c.data(), 2.0 / 3.0);

        c.backward();

        // dc/da = 1/b
        // dc/db = -a/b^2
        assert_eq_float!(a.grad(), 1.0 / 3.0);
        assert_eq_float!(b.grad(), -2.0 / 9.0);
    }

    #[test]
    fn test_pow() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let c = a.pow(&b);
        assert_eq_float!(c.data(), 8.0);

        c.backward();

        // dc/da = 3a^2, exponent gets no gradient
        assert_eq_float!(a.grad(), 12.0);
        assert_eq!(b.grad(), 0.0);
    }

    #[test]
    fn test_ln_and_tanh() {
        let a = Value::new(2.0);
        let b = a.ln();
        b.backward();
        assert_eq_float!(a.grad(), 0.5);

        let x = Value::new(0.5);
        let y = x.tanh();
        y.backward();
        let t = 0.5f32.tanh();
        assert_eq_float!(x.grad(), 1.0 - t * t);
    }

    #[test]
    fn test_max_routes_gradient() {
        let a = Value::new(1.0);
        let b = Value::new(4.0);
        let m = a.max(&b);
        assert_eq!(m.data(), 4.0);
        m.backward();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_sum_of_is_a_single_node() {
        let values = (0..5).map(|i| Value::new(i as f32)).collect::<Vec<_>>();
        let total = Value::sum_of(&values);
        assert_eq!(total.data(), 10.0);
        assert_eq!(total.0.borrow().children.len(), 5);
        total.backward();
        assert!(values.iter().all(|v| v.grad() == 1.0));

        assert_eq!(Value::sum_of(Vec::<Value>::new()).data(), 0.0);
    }

    #[test]
    fn test_shared_subexpression_accumulates() {
        // z = (a * b) + (a * b) reuses the same node twice
        let a = Value::new(2.0);
        let b = Value::new(5.0);
        let c = &a * &b;
        let z = &c + &c;
        z.backward();
        assert_eq!(c.grad(), 2.0);
        assert_eq!(a.grad(), 10.0);
        assert_eq!(b.grad(), 4.0);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let x = Value::new(1.0);
        let mut acc = x.clone();
        for _ in 0..20_000 {
            acc = &acc + &Value::new(0.0);
        }
        acc.backward();
        assert_eq!(x.grad(), 1.0);
        drop(acc);
        assert_eq!(x.data(), 1.0);
    }

    #[test]
    fn test_zero_grad() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let mut c = &a * &b;
        c.backward();
        assert_eq!(a.grad(), 2.0);
        c.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
        assert_eq!(c.grad(), 0.0);
    }

    #[test]
    fn test_relu_and_detach() {
        let a = Value::new(-1.0);
        let b = Value::new(2.0);
        let z = &(&a * &b).relu() + &b.detach();
        assert_eq!(z.data(), 2.0);

        z.backward();

        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
    }
}
