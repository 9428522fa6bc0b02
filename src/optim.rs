//! Optimizer(s) and learning rate schedules

use clap::ValueEnum;

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
    fn learning_rate(&self) -> f32;
    fn set_learning_rate(&mut self, lr: f32);
}

/// Optimizer selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OptimizerKind {
    Momentum,
    Rmsprop,
    Adam,
}

impl OptimizerKind {
    pub fn build(&self, params: Vec<Value>, lr: f32, momentum: f32) -> Box<dyn Optim> {
        match self {
            OptimizerKind::Momentum => Box::new(SGD::new(params, lr, momentum)),
            OptimizerKind::Rmsprop => Box::new(RMSProp::new(params, lr, 0.9, momentum)),
            OptimizerKind::Adam => Box::new(Adam::new(params, lr)),
        }
    }
}

fn zero_all(params: &mut [Value]) {
    for param in params.iter_mut() {
        param.zero_grad();
    }
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Value>,
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let velocity = self.momentum * self.velocity[idx] - self.lr * param.grad();
            let new_val = param.data() + velocity;
            self.velocity[idx] = velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_all(&mut self.params);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// RMSProp with optional momentum, as in TensorFlow's `RMSPropOptimizer`
pub struct RMSProp {
    params: Vec<Value>,
    lr: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    mean_square: Vec<f32>,
    velocity: Vec<f32>,
}

impl RMSProp {
    pub fn new(params: Vec<Value>, lr: f32, decay: f32, momentum: f32) -> Self {
        let n = params.len();
        Self {
            params,
            lr,
            decay,
            momentum,
            epsilon: 1e-10,
            mean_square: vec![0.0; n],
            velocity: vec![0.0; n],
        }
    }
}

impl Optim for RMSProp {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let grad = param.grad();
            let ms = self.decay * self.mean_square[idx] + (1.0 - self.decay) * grad * grad;
            let velocity =
                self.momentum * self.velocity[idx] + self.lr * grad / (ms + self.epsilon).sqrt();
            self.mean_square[idx] = ms;
            self.velocity[idx] = velocity;
            let new_val = param.data() - velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_all(&mut self.params);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adam with bias correction
/// <https://arxiv.org/abs/1412.6980>
pub struct Adam {
    params: Vec<Value>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl Adam {
    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        let n = params.len();
        Self {
            params,
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: vec![0.0; n],
            v: vec![0.0; n],
            t: 0,
        }
    }
}

impl Optim for Adam {
    fn step(&mut self) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        for (idx, param) in self.params.iter_mut().enumerate() {
            let grad = param.grad();
            self.m[idx] = self.beta1 * self.m[idx] + (1.0 - self.beta1) * grad;
            self.v[idx] = self.beta2 * self.v[idx] + (1.0 - self.beta2) * grad * grad;
            let m_hat = self.m[idx] / bias1;
            let v_hat = self.v[idx] / bias2;
            let new_val = param.data() - self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_all(&mut self.params);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Piecewise constant learning rate.
/// At `step` the rate is `base * decays[k]` where `k` counts the boundaries `<= step`.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
    base: f32,
    boundaries: Vec<usize>,
    decays: Vec<f32>,
}

impl LearningRateSchedule {
    /// `decays` must hold one more entry than `boundaries`, an empty pair means a constant rate
    pub fn piecewise(base: f32, boundaries: Vec<usize>, decays: Vec<f32>) -> Option<Self> {
        if boundaries.is_empty() && decays.is_empty() {
            return Some(Self::constant(base));
        }
        if decays.len() != boundaries.len() + 1 {
            return None;
        }
        Some(Self {
            base,
            boundaries,
            decays,
        })
    }

    pub fn constant(base: f32) -> Self {
        Self {
            base,
            boundaries: vec![],
            decays: vec![1.0],
        }
    }

    pub fn at(&self, step: usize) -> f32 {
        let k = self.boundaries.iter().filter(|&&b| b <= step).count();
        self.base * self.decays[k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.0);
        optim.step();
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
        assert_eq!(c.grad(), 1.0);
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.9);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
        assert_eq!(optim.velocities(), &[-0.1, -0.1, -0.1]);
        optim.step();
        assert_eq!(a.data(), 0.71);
        assert_eq!(b.data(), 1.71);
        assert_eq!(c.data(), 2.71);
        assert_eq!(optim.velocities(), &[-0.19, -0.19, -0.19]);

        optim.zero_grad();
        assert_eq!(a.grad(), 0.0);
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        // the bias corrected first step is lr * sign(grad)
        let a = Value::new(1.0);
        let loss = a.scale(3.0);
        loss.backward();
        let mut optim = Adam::new(vec![a.clone()], 0.01);
        optim.step();
        assert_eq_float!(a.data(), 0.99, 1e-5);
    }

    #[test]
    fn test_rmsprop_descends() {
        let a = Value::new(2.0);
        let loss = a.square();
        loss.backward();
        let mut optim = RMSProp::new(vec![a.clone()], 0.01, 0.9, 0.0);
        optim.step();
        assert!(a.data() < 2.0);
        optim.set_learning_rate(0.5);
        assert_eq!(optim.learning_rate(), 0.5);
    }

    #[test]
    fn test_piecewise_schedule() {
        let schedule = LearningRateSchedule::piecewise(0.1, vec![10, 20], vec![1.0, 0.1, 0.01])
            .unwrap();
        assert_eq_float!(schedule.at(0), 0.1);
        assert_eq_float!(schedule.at(9), 0.1);
        assert_eq_float!(schedule.at(10), 0.01);
        assert_eq_float!(schedule.at(25), 0.001);

        assert!(LearningRateSchedule::piecewise(0.1, vec![10], vec![1.0]).is_none());
        assert_eq!(LearningRateSchedule::constant(0.5).at(1000), 0.5);
    }
}
