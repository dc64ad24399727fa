//! Optimizers, gradient clipping and learning-rate schedules

mod adam;
mod clip;
mod optimizer;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use clip::clip_grad_norm;
pub use optimizer::{build_optimizer, Optimizer, OptimizerKind, OptimizerState};
pub use scheduler::{
    LRScheduler, LinearDecayLR, LrPolicy, LrSchedule, ReduceLROnPlateau, ScheduleParams,
    SchedulerState, StepLR,
};
pub use sgd::Sgd;
