//! Stochastic Gradient Descent optimizer

use super::optimizer::{buffers_from_state, buffers_to_state, kind_mismatch};
use super::{Optimizer, OptimizerKind, OptimizerState};
use crate::{Result, Tensor};
use ndarray::Array1;

/// SGD optimizer with optional momentum and L2 weight decay
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: Vec<Option<Array1<f32>>>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocities: Vec::new(),
        }
    }

    fn ensure_velocities(&mut self, params: &[Tensor]) {
        if self.velocities.len() != params.len() {
            self.velocities = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_velocities(params);

        for (i, param) in params.iter_mut().enumerate() {
            let Some(mut grad) = param.grad() else {
                continue;
            };
            if self.weight_decay != 0.0 {
                grad = grad + param.data() * self.weight_decay;
            }

            if self.momentum > 0.0 {
                // v = momentum * v + g
                let velocity = match &self.velocities[i] {
                    Some(v) => v * self.momentum + &grad,
                    None => grad,
                };
                *param.data_mut() = param.data() - &(&velocity * self.lr);
                self.velocities[i] = Some(velocity);
            } else {
                *param.data_mut() = param.data() - &(&grad * self.lr);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Sgd {
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            velocities: buffers_to_state(&self.velocities),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Sgd {
                lr,
                momentum,
                weight_decay,
                velocities,
            } => {
                self.lr = lr;
                self.momentum = momentum;
                self.weight_decay = weight_decay;
                self.velocities = buffers_from_state(velocities);
                Ok(())
            }
            other => Err(kind_mismatch(OptimizerKind::Sgd, &other)),
        }
    }
}
