//! High-level training loop
//!
//! This module provides the epoch loop and everything it persists:
//! - Running averages of losses and metrics
//! - Checkpoint persistence, retention and resume
//! - The operator-facing run log
//! - The [`Trainer`] state machine
//!
//! # Example
//!
//! ```no_run
//! use segdepth::config::{validate_config, TrainSpec};
//! use segdepth::train::Trainer;
//!
//! let config = validate_config(&TrainSpec::default())?;
//! let mut trainer = Trainer::from_config(&config)?;
//! let outcome = trainer.run()?;
//! println!("best epoch {} ({})", outcome.best_epoch, outcome.lowest_score);
//! # Ok::<(), segdepth::Error>(())
//! ```

mod checkpoint;
mod meter;
mod run_log;
mod trainer;

pub use checkpoint::{CheckpointManager, CheckpointRecord, MARKER_FILE};
pub use meter::RunningAverage;
pub use run_log::RunLog;
pub use trainer::{
    resume_checkpoint, Datasets, EpochSummary, PhaseSummary, Stage, TrainOutcome, Trainer,
    TrainingState,
};
