//! Optimizer trait and its persisted state

use crate::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trait for optimization algorithms
///
/// Implementations keep per-parameter buffers indexed by the position of
/// the parameter in the slice handed to `step`, so the slice order must be
/// stable for the lifetime of the optimizer.
pub trait Optimizer {
    /// Perform a single optimization step
    fn step(&mut self, params: &mut [Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    fn lr(&self) -> f32;

    fn set_lr(&mut self, lr: f32);

    /// Snapshot of every buffer needed to continue training bit-for-bit
    fn state(&self) -> OptimizerState;

    /// Restore a snapshot taken with [`Optimizer::state`]
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Serializable optimizer state, one variant per algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerState {
    Sgd {
        lr: f32,
        momentum: f32,
        weight_decay: f32,
        velocities: Vec<Option<Vec<f32>>>,
    },
    Adam {
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
        t: u64,
        m: Vec<Option<Vec<f32>>>,
        v: Vec<Option<Vec<f32>>>,
    },
}

impl OptimizerState {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerState::Sgd { .. } => OptimizerKind::Sgd,
            OptimizerState::Adam { .. } => OptimizerKind::Adam,
        }
    }
}

/// Closed set of optimizers selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

/// Build an optimizer from its configuration tag
///
/// SGD uses momentum 0.9, Adam the usual (0.9, 0.999, 1e-8).
pub fn build_optimizer(kind: OptimizerKind, lr: f32, weight_decay: f32) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adam => Box::new(super::Adam::new(lr, 0.9, 0.999, 1e-8, weight_decay)),
        OptimizerKind::Sgd => Box::new(super::Sgd::new(lr, 0.9, weight_decay)),
    }
}

pub(crate) fn buffers_to_state(buffers: &[Option<ndarray::Array1<f32>>]) -> Vec<Option<Vec<f32>>> {
    buffers
        .iter()
        .map(|b| b.as_ref().map(|a| a.to_vec()))
        .collect()
}

pub(crate) fn buffers_from_state(
    buffers: Vec<Option<Vec<f32>>>,
) -> Vec<Option<ndarray::Array1<f32>>> {
    buffers
        .into_iter()
        .map(|b| b.map(ndarray::Array1::from))
        .collect()
}

pub(crate) fn kind_mismatch(expected: OptimizerKind, got: &OptimizerState) -> Error {
    Error::OptimizerState(format!(
        "expected {expected} state, found {}",
        got.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_kind_parse() {
        assert_eq!("adam".parse::<OptimizerKind>(), Ok(OptimizerKind::Adam));
        assert_eq!("SGD".parse::<OptimizerKind>(), Ok(OptimizerKind::Sgd));
        assert!("rmsprop".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_build_optimizer_sets_lr() {
        let opt = build_optimizer(OptimizerKind::Sgd, 0.05, 0.0);
        assert_eq!(opt.lr(), 0.05);
        assert_eq!(opt.state().kind(), OptimizerKind::Sgd);
    }

    #[test]
    fn test_state_serializes_with_kind_tag() {
        let state = OptimizerState::Sgd {
            lr: 0.1,
            momentum: 0.0,
            weight_decay: 0.0,
            velocities: vec![None, Some(vec![1.0])],
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"kind\":\"sgd\""));
        let back: OptimizerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
