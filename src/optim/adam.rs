//! Adam optimizer

use super::optimizer::{buffers_from_state, buffers_to_state, kind_mismatch};
use super::{Optimizer, OptimizerKind, OptimizerState};
use crate::{Result, Tensor};
use ndarray::Array1;

/// Adam optimizer (Adaptive Moment Estimation) with L2 weight decay
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>, // First moment
    v: Vec<Option<Array1<f32>>>, // Second moment
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with default parameters
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.0)
    }

    fn ensure_moments(&mut self, params: &[Tensor]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|_| None).collect();
            self.v = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params);
        self.t += 1;

        // Bias correction folded into the step size
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));

        for (i, param) in params.iter_mut().enumerate() {
            let Some(mut grad) = param.grad() else {
                continue;
            };
            if self.weight_decay != 0.0 {
                grad = grad + param.data() * self.weight_decay;
            }

            // m_t = β1 * m_{t-1} + (1 - β1) * g
            let m_t = match &self.m[i] {
                Some(m) => m * self.beta1 + &grad * (1.0 - self.beta1),
                None => &grad * (1.0 - self.beta1),
            };

            // v_t = β2 * v_{t-1} + (1 - β2) * g²
            let grad_sq = &grad * &grad;
            let v_t = match &self.v[i] {
                Some(v) => v * self.beta2 + &grad_sq * (1.0 - self.beta2),
                None => &grad_sq * (1.0 - self.beta2),
            };

            // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
            let update = &m_t / &(v_t.mapv(f32::sqrt) + self.epsilon) * lr_t;
            *param.data_mut() = param.data() - &update;

            self.m[i] = Some(m_t);
            self.v[i] = Some(v_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            weight_decay: self.weight_decay,
            t: self.t,
            m: buffers_to_state(&self.m),
            v: buffers_to_state(&self.v),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Adam {
                lr,
                beta1,
                beta2,
                epsilon,
                weight_decay,
                t,
                m,
                v,
            } => {
                self.lr = lr;
                self.beta1 = beta1;
                self.beta2 = beta2;
                self.epsilon = epsilon;
                self.weight_decay = weight_decay;
                self.t = t;
                self.m = buffers_from_state(m);
                self.v = buffers_from_state(v);
                Ok(())
            }
            other => Err(kind_mismatch(OptimizerKind::Adam, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_quadratic_convergence() {
        // f(x) = x², gradient 2x
        let mut params = vec![Tensor::from_vec(vec![5.0, -3.0, 2.0], true)];
        let mut optimizer = Adam::default_params(0.1);

        for _ in 0..200 {
            let grad = params[0].data().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }

        for &val in params[0].data().iter() {
            assert!(val.abs() < 0.5, "value {val} did not converge");
        }
    }

    #[test]
    fn test_adam_first_step_is_lr_sized() {
        let mut params = vec![Tensor::from_vec(vec![1.0], true)];
        params[0].set_grad(Array1::from(vec![4.0]));
        let mut optimizer = Adam::default_params(0.01);
        optimizer.step(&mut params);
        // Bias-corrected first step moves by ~lr regardless of gradient scale
        assert!((params[0].data()[0] - 0.99).abs() < 1e-4);
    }

    #[test]
    fn test_adam_state_round_trip_continues_identically() {
        let mut params = vec![Tensor::from_vec(vec![1.0, 2.0], true)];
        let mut opt = Adam::default_params(0.05);
        for _ in 0..3 {
            params[0].set_grad(params[0].data().mapv(|x| 2.0 * x));
            opt.step(&mut params);
        }

        let json = serde_json::to_string(&opt.state()).unwrap();
        let mut restored = Adam::default_params(0.0);
        restored.load_state(serde_json::from_str(&json).unwrap()).unwrap();

        let mut a = vec![Tensor::from_vec(params[0].data().to_vec(), true)];
        let mut b = vec![Tensor::from_vec(params[0].data().to_vec(), true)];
        a[0].set_grad(a[0].data().mapv(|x| 2.0 * x));
        b[0].set_grad(b[0].data().mapv(|x| 2.0 * x));
        opt.step(&mut a);
        restored.step(&mut b);

        assert_eq!(a[0].data(), b[0].data());
        assert_eq!(restored.lr(), 0.05);
    }
}
