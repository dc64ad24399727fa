//! Learning rate schedulers

use super::Optimizer;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Step the scheduler (called once per epoch)
    fn step(&mut self);
}

/// Constant rate for `niter` epochs, then linear decay to zero over `niter_decay` epochs
///
/// Formula: lr_e = lr_base * (1 - max(0, e + 1 - niter) / (niter_decay + 1))
pub struct LinearDecayLR {
    base_lr: f32,
    niter: usize,
    niter_decay: usize,
    last_epoch: usize,
}

impl LinearDecayLR {
    pub fn new(base_lr: f32, niter: usize, niter_decay: usize) -> Self {
        Self {
            base_lr,
            niter,
            niter_decay,
            last_epoch: 0,
        }
    }

    fn factor(&self) -> f32 {
        let over = (self.last_epoch + 1).saturating_sub(self.niter) as f32;
        (1.0 - over / (self.niter_decay as f32 + 1.0)).max(0.0)
    }
}

impl LRScheduler for LinearDecayLR {
    fn get_lr(&self) -> f32 {
        self.base_lr * self.factor()
    }

    fn step(&mut self) {
        self.last_epoch += 1;
    }
}

/// Multiply the rate by `gamma` every `step_size` epochs
pub struct StepLR {
    base_lr: f32,
    step_size: usize,
    gamma: f32,
    last_epoch: usize,
}

impl StepLR {
    pub fn new(base_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            last_epoch: 0,
        }
    }
}

impl LRScheduler for StepLR {
    fn get_lr(&self) -> f32 {
        self.base_lr * self.gamma.powi((self.last_epoch / self.step_size) as i32)
    }

    fn step(&mut self) {
        self.last_epoch += 1;
    }
}

/// Reduce the rate by `factor` once the monitored score stops improving
///
/// Mode is "min" with a relative improvement threshold: a score counts as
/// better only when it is below `best * (1 - threshold)`. After more than
/// `patience` non-improving observations the rate is multiplied by `factor`
/// and the counter restarts.
pub struct ReduceLROnPlateau {
    lr: f32,
    factor: f32,
    patience: usize,
    threshold: f32,
    min_lr: f32,
    best: f32,
    num_bad_epochs: usize,
}

impl ReduceLROnPlateau {
    pub fn new(lr: f32, factor: f32, patience: usize) -> Self {
        Self {
            lr,
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            best: f32::INFINITY,
            num_bad_epochs: 0,
        }
    }

    pub fn get_lr(&self) -> f32 {
        self.lr
    }

    /// Feed one score; returns true when the rate was reduced
    pub fn observe(&mut self, score: f32) -> bool {
        if score < self.best * (1.0 - self.threshold) {
            self.best = score;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            self.num_bad_epochs = 0;
            let new_lr = (self.lr * self.factor).max(self.min_lr);
            if self.lr - new_lr > 1e-8 {
                self.lr = new_lr;
                return true;
            }
        }
        false
    }
}

/// Closed set of LR policies selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrPolicy {
    Lambda,
    Step,
    Plateau,
    None,
}

impl FromStr for LrPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lambda" => Ok(LrPolicy::Lambda),
            "step" => Ok(LrPolicy::Step),
            "plateau" => Ok(LrPolicy::Plateau),
            "none" => Ok(LrPolicy::None),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for LrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LrPolicy::Lambda => "lambda",
            LrPolicy::Step => "step",
            LrPolicy::Plateau => "plateau",
            LrPolicy::None => "none",
        };
        f.write_str(name)
    }
}

/// Numeric knobs shared by the policies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleParams {
    pub niter: usize,
    pub niter_decay: usize,
    /// Step size for `step`, patience for `plateau`
    pub decay_iters: usize,
    pub gamma: f32,
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            niter: 50,
            niter_decay: 400,
            decay_iters: 7,
            gamma: 0.5,
        }
    }
}

/// Persisted scheduler position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum SchedulerState {
    Lambda {
        last_epoch: usize,
    },
    Step {
        last_epoch: usize,
    },
    Plateau {
        lr: f32,
        /// `None` until a first score has been observed
        best: Option<f32>,
        num_bad_epochs: usize,
    },
    #[default]
    None,
}

/// The schedule driven by the trainer
///
/// Epoch-indexed policies advance in [`LrSchedule::before_epoch`]; the
/// plateau policy only reacts to validation scores.
pub enum LrSchedule {
    Lambda(LinearDecayLR),
    Step(StepLR),
    Plateau(ReduceLROnPlateau),
    None,
}

impl LrSchedule {
    pub fn new(policy: LrPolicy, base_lr: f32, params: &ScheduleParams) -> Self {
        match policy {
            LrPolicy::Lambda => {
                LrSchedule::Lambda(LinearDecayLR::new(base_lr, params.niter, params.niter_decay))
            }
            LrPolicy::Step => {
                LrSchedule::Step(StepLR::new(base_lr, params.decay_iters, params.gamma))
            }
            LrPolicy::Plateau => LrSchedule::Plateau(ReduceLROnPlateau::new(
                base_lr,
                params.gamma,
                params.decay_iters,
            )),
            LrPolicy::None => LrSchedule::None,
        }
    }

    pub fn policy(&self) -> LrPolicy {
        match self {
            LrSchedule::Lambda(_) => LrPolicy::Lambda,
            LrSchedule::Step(_) => LrPolicy::Step,
            LrSchedule::Plateau(_) => LrPolicy::Plateau,
            LrSchedule::None => LrPolicy::None,
        }
    }

    /// Advance an epoch-indexed schedule and push the rate into the optimizer
    pub fn before_epoch(&mut self, optimizer: &mut dyn Optimizer) -> Option<f32> {
        let lr = match self {
            LrSchedule::Lambda(s) => {
                s.step();
                s.get_lr()
            }
            LrSchedule::Step(s) => {
                s.step();
                s.get_lr()
            }
            LrSchedule::Plateau(_) | LrSchedule::None => return None,
        };
        optimizer.set_lr(lr);
        Some(lr)
    }

    /// Feed the validation score to a plateau schedule
    ///
    /// Returns the new rate when it was reduced.
    pub fn after_validation(&mut self, score: f32, optimizer: &mut dyn Optimizer) -> Option<f32> {
        let LrSchedule::Plateau(s) = self else {
            return None;
        };
        if !s.observe(score) {
            return None;
        }
        let lr = s.get_lr();
        optimizer.set_lr(lr);
        Some(lr)
    }

    pub fn state(&self) -> SchedulerState {
        match self {
            LrSchedule::Lambda(s) => SchedulerState::Lambda {
                last_epoch: s.last_epoch,
            },
            LrSchedule::Step(s) => SchedulerState::Step {
                last_epoch: s.last_epoch,
            },
            LrSchedule::Plateau(s) => SchedulerState::Plateau {
                lr: s.lr,
                best: s.best.is_finite().then_some(s.best),
                num_bad_epochs: s.num_bad_epochs,
            },
            LrSchedule::None => SchedulerState::None,
        }
    }

    pub fn load_state(&mut self, state: SchedulerState) -> Result<()> {
        match (self, state) {
            (LrSchedule::Lambda(s), SchedulerState::Lambda { last_epoch }) => {
                s.last_epoch = last_epoch;
            }
            (LrSchedule::Step(s), SchedulerState::Step { last_epoch }) => {
                s.last_epoch = last_epoch;
            }
            (
                LrSchedule::Plateau(s),
                SchedulerState::Plateau {
                    lr,
                    best,
                    num_bad_epochs,
                },
            ) => {
                s.lr = lr;
                s.best = best.unwrap_or(f32::INFINITY);
                s.num_bad_epochs = num_bad_epochs;
            }
            (LrSchedule::None, SchedulerState::None) => {}
            (schedule, state) => {
                return Err(Error::OptimizerState(format!(
                    "scheduler state {state:?} does not fit the {} policy",
                    schedule.policy()
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::Sgd;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linear_decay_flat_then_linear() {
        let mut s = LinearDecayLR::new(1.0, 2, 3);
        // e = 0, 1 are flat
        assert_abs_diff_eq!(s.get_lr(), 1.0);
        s.step();
        assert_abs_diff_eq!(s.get_lr(), 1.0);
        s.step();
        assert_abs_diff_eq!(s.get_lr(), 0.75);
        s.step();
        assert_abs_diff_eq!(s.get_lr(), 0.5);
    }

    #[test]
    fn test_linear_decay_never_negative() {
        let mut s = LinearDecayLR::new(1.0, 0, 1);
        for _ in 0..10 {
            s.step();
        }
        assert_eq!(s.get_lr(), 0.0);
    }

    #[test]
    fn test_step_lr_decays_every_step_size() {
        let mut s = StepLR::new(0.1, 2, 0.5);
        let mut lrs = vec![s.get_lr()];
        for _ in 0..4 {
            s.step();
            lrs.push(s.get_lr());
        }
        let expected = [0.1, 0.1, 0.05, 0.05, 0.025];
        for (lr, exp) in lrs.iter().zip(expected) {
            assert_abs_diff_eq!(*lr, exp, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_plateau_waits_for_patience() {
        let mut s = ReduceLROnPlateau::new(1.0, 0.5, 2);
        assert!(!s.observe(1.0));
        assert!(!s.observe(1.0));
        assert!(!s.observe(1.0));
        // third bad epoch exceeds patience 2
        assert!(s.observe(1.0));
        assert_abs_diff_eq!(s.get_lr(), 0.5);
    }

    #[test]
    fn test_plateau_ignores_negligible_improvement() {
        let mut s = ReduceLROnPlateau::new(1.0, 0.5, 0);
        s.observe(1.0);
        // within the 1e-4 relative threshold
        assert!(s.observe(0.99999));
    }

    #[test]
    fn test_plateau_improvement_resets_counter() {
        let mut s = ReduceLROnPlateau::new(1.0, 0.5, 1);
        s.observe(1.0);
        s.observe(1.0);
        s.observe(0.5);
        assert!(!s.observe(0.5));
        assert_abs_diff_eq!(s.get_lr(), 1.0);
    }

    #[test]
    fn test_schedule_pushes_lr_into_optimizer() {
        let params = ScheduleParams {
            decay_iters: 1,
            gamma: 0.1,
            ..ScheduleParams::default()
        };
        let mut schedule = LrSchedule::new(LrPolicy::Step, 1.0, &params);
        let mut opt = Sgd::new(1.0, 0.0, 0.0);
        let lr = schedule.before_epoch(&mut opt).unwrap();
        assert_abs_diff_eq!(lr, 0.1, epsilon = 1e-7);
        assert_eq!(opt.lr(), lr);
        assert_eq!(schedule.after_validation(0.0, &mut opt), None);
    }

    #[test]
    fn test_plateau_schedule_only_reacts_to_scores() {
        let params = ScheduleParams {
            decay_iters: 0,
            ..ScheduleParams::default()
        };
        let mut schedule = LrSchedule::new(LrPolicy::Plateau, 1.0, &params);
        let mut opt = Sgd::new(1.0, 0.0, 0.0);
        assert_eq!(schedule.before_epoch(&mut opt), None);
        schedule.after_validation(2.0, &mut opt);
        assert_eq!(schedule.after_validation(2.0, &mut opt), Some(0.5));
        assert_eq!(opt.lr(), 0.5);
    }

    #[test]
    fn test_state_restores_position() {
        let params = ScheduleParams::default();
        let mut a = LrSchedule::new(LrPolicy::Plateau, 1.0, &params);
        let mut opt = Sgd::new(1.0, 0.0, 0.0);
        a.after_validation(3.0, &mut opt);
        a.after_validation(4.0, &mut opt);

        let json = serde_json::to_string(&a.state()).unwrap();
        let mut b = LrSchedule::new(LrPolicy::Plateau, 1.0, &params);
        b.load_state(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_state_rejects_other_policy() {
        let params = ScheduleParams::default();
        let mut schedule = LrSchedule::new(LrPolicy::Lambda, 1.0, &params);
        assert!(schedule.load_state(SchedulerState::None).is_err());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Plateau".parse::<LrPolicy>(), Ok(LrPolicy::Plateau));
        assert!("cosine".parse::<LrPolicy>().is_err());
    }
}
