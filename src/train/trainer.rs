//! Epoch loop: train, validate, checkpoint, repeat
//!
//! ```text
//! FreshStart ─┬─────────────► TrainingEpoch ─► ValidatingEpoch ─► Checkpointing ─┬─► TrainingEpoch
//!             └─► Resumed ──┘                                                     └─► Terminal
//! ```
//!
//! A cancellation flag is polled between training batches; when it is set
//! the current epoch is abandoned without a checkpoint and the trainer stops
//! in [`Stage::Cancelled`]. An epoch whose training pass finished is still
//! validated and checkpointed before the flag takes effect.

use super::{CheckpointManager, CheckpointRecord, RunLog, RunningAverage};
use crate::config::{PretrainedSource, TrainConfig};
use crate::data::{BatchIter, DataLoader, DepthDataset, SyntheticDepthDataset};
use crate::device::{DeviceGroup, SystemProbe};
use crate::io::{load_weights, ParamState, WeightFormat};
use crate::loss::{LossAggregator, LossBreakdown, LossTerm, Phase};
use crate::metrics::{DepthMetrics, MetricKind};
use crate::model::{build_model, DepthCompletionModel, MergeReport};
use crate::optim::{build_optimizer, clip_grad_norm, LrSchedule, Optimizer};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Where the trainer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FreshStart,
    /// Restored from the checkpoint of this completed epoch
    Resumed(usize),
    TrainingEpoch(usize),
    ValidatingEpoch(usize),
    Checkpointing(usize),
    Terminal,
    Cancelled,
}

/// Bookkeeping persisted at every epoch boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingState {
    /// Completed epochs; the next loop index to run
    pub epoch: usize,
    pub best_epoch: usize,
    pub lowest_score: f32,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            epoch: 0,
            best_epoch: 0,
            lowest_score: f32::INFINITY,
        }
    }
}

/// The three datasets a run draws from
#[derive(Clone)]
pub struct Datasets {
    pub train: Arc<dyn DepthDataset>,
    pub val: Arc<dyn DepthDataset>,
    /// Used by evaluate-only runs
    pub val_subset: Arc<dyn DepthDataset>,
}

impl Datasets {
    /// Non-overlapping synthetic splits sized by the configuration
    pub fn synthetic(config: &TrainConfig) -> Self {
        let scenes = |n: usize, offset: usize| -> Arc<dyn DepthDataset> {
            Arc::new(SyntheticDepthDataset::new(n, config.dataset.clone()).with_offset(offset))
        };
        Self {
            train: scenes(config.train_samples, 0),
            val: scenes(config.val_samples, config.train_samples),
            val_subset: scenes(config.val_subset_samples, config.train_samples),
        }
    }
}

/// Averages of one training or validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    /// Batch-size weighted loss averages
    pub loss: LossBreakdown,
    /// Valid-pixel weighted metric averages, in configuration order
    pub metrics: Vec<(MetricKind, f32)>,
    pub batches: usize,
    /// Batches dropped because a sample failed to load
    pub skipped: usize,
    pub elapsed_secs: f64,
}

impl PhaseSummary {
    pub fn metric(&self, kind: MetricKind) -> Option<f32> {
        self.metrics
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
    }
}

/// Result of one completed epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    /// Completed-epoch label (loop index + 1)
    pub epoch: usize,
    pub lr: f32,
    pub train: PhaseSummary,
    pub validation: PhaseSummary,
    /// Validation average of the primary metric
    pub score: f32,
    pub is_best: bool,
}

/// What [`Trainer::run`] did
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub stage: Stage,
    /// Loop index the run started at
    pub start_epoch: usize,
    /// Completed epochs after the run
    pub epoch: usize,
    pub best_epoch: usize,
    pub lowest_score: f32,
    pub history: Vec<EpochSummary>,
    /// Set by evaluate-only runs
    pub evaluation: Option<PhaseSummary>,
}

/// Per-phase running averages
struct PhaseTrackers {
    total: RunningAverage,
    terms: [RunningAverage; 5],
    metrics: Vec<(MetricKind, RunningAverage)>,
    batch_time: RunningAverage,
}

impl PhaseTrackers {
    fn new(kinds: &[MetricKind]) -> Self {
        Self {
            total: RunningAverage::new(),
            terms: [RunningAverage::new(); 5],
            metrics: kinds.iter().map(|k| (*k, RunningAverage::new())).collect(),
            batch_time: RunningAverage::new(),
        }
    }

    fn update(&mut self, loss: &LossBreakdown, batch_size: usize, metrics: &DepthMetrics) {
        let n = batch_size as f64;
        self.total.update(loss.total, n);
        for (tracker, term) in self.terms.iter_mut().zip(LossTerm::ALL) {
            tracker.update(loss.get(term), n);
        }
        let pixels = metrics.num() as f64;
        for (kind, tracker) in &mut self.metrics {
            tracker.update(metrics.get_metric(*kind), pixels);
        }
    }

    fn averages(&self) -> LossBreakdown {
        let [coarse, class, depth, segmentation, edge] = self.terms.map(|t| t.avg());
        LossBreakdown {
            total: self.total.avg(),
            coarse,
            class,
            depth,
            segmentation,
            edge,
        }
    }

    fn summary(&self, batches: usize, skipped: usize, started: Instant) -> PhaseSummary {
        PhaseSummary {
            loss: self.averages(),
            metrics: self
                .metrics
                .iter()
                .map(|(k, t)| (*k, metric_average(t)))
                .collect(),
            batches,
            skipped,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }

    fn progress_line(&self, header: &str) -> String {
        let mut line = format!(
            "{header}\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4})",
            self.batch_time.value(),
            self.batch_time.avg(),
            self.total.value(),
            self.total.avg(),
        );
        for (tracker, term) in self.terms.iter().zip(LossTerm::ALL) {
            line.push_str(&format!("\t{} {:.4}", term.name(), tracker.avg()));
        }
        if let Some((kind, tracker)) = self.metrics.first() {
            line.push_str(&format!(
                "\t{} {:.3} ({:.3})",
                kind.label(),
                tracker.value(),
                tracker.avg()
            ));
        }
        line
    }
}

/// Drives training of one run directory
pub struct Trainer {
    config: TrainConfig,
    model: Box<dyn DepthCompletionModel>,
    optimizer: Box<dyn Optimizer>,
    schedule: LrSchedule,
    aggregator: LossAggregator,
    metrics: DepthMetrics,
    devices: DeviceGroup,
    train_loader: DataLoader,
    val_loader: DataLoader,
    val_subset_loader: DataLoader,
    checkpoints: CheckpointManager,
    log: RunLog,
    state: TrainingState,
    start_epoch: usize,
    stage: Stage,
    cancel: Arc<AtomicBool>,
}

impl Trainer {
    /// Resolve devices, then build the default model and synthetic datasets
    ///
    /// A required accelerator that is missing fails here, before any state
    /// is created.
    pub fn from_config(config: &TrainConfig) -> Result<Self> {
        let devices = DeviceGroup::resolve(&config.device, &SystemProbe::new())?;
        Self::new(
            config,
            build_model(&config.model),
            Datasets::synthetic(config),
            devices,
        )
    }

    /// Assemble a trainer around an already-built model
    ///
    /// Reads the checkpoint named by the resume marker, opens the run log
    /// (`_0` unless that checkpoint is usable), then either restores it or
    /// applies the configured pretrained weights.
    pub fn new(
        config: &TrainConfig,
        model: Box<dyn DepthCompletionModel>,
        datasets: Datasets,
        devices: DeviceGroup,
    ) -> Result<Self> {
        let run_dir = config.run_dir();
        let probe = CheckpointManager::new(&run_dir, RunLog::memory())?;
        let marker = if config.evaluate || config.test_mode {
            None
        } else {
            probe.resume_lookup()
        };

        // the log name depends on whether the marked checkpoint is usable
        let mut fallback = None;
        let restored = match marker {
            Some(epoch) => match probe.load(epoch) {
                Ok(record) => Some((epoch, record)),
                Err(e) if e.is_recoverable_checkpoint() => {
                    warn!("resume from epoch {epoch} failed: {e}");
                    fallback = Some(e);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let log_name = if config.evaluate {
            "log_evaluate.txt".to_string()
        } else {
            let start = restored.as_ref().map_or(0, |(epoch, _)| *epoch);
            format!("log_train_start_{start}.txt")
        };
        let log = RunLog::to_file(run_dir.join(log_name))?;
        let checkpoints = probe.with_log(log.clone());

        let optimizer = build_optimizer(config.optimizer, config.lr, config.weight_decay);
        let schedule = LrSchedule::new(config.policy, config.lr, &config.schedule);

        let mut trainer = Self {
            config: config.clone(),
            model,
            optimizer,
            schedule,
            aggregator: LossAggregator::new(config.weights, config.criterion),
            metrics: config.depth_metrics(),
            devices,
            train_loader: DataLoader::new(datasets.train, config.train_loader.clone())?,
            val_loader: DataLoader::new(datasets.val, config.val_loader.clone())?,
            val_subset_loader: DataLoader::new(datasets.val_subset, config.val_loader.clone())?,
            checkpoints,
            log,
            state: TrainingState::default(),
            start_epoch: 0,
            stage: Stage::FreshStart,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        trainer.log.line(format!("=> run directory {}", run_dir.display()));
        trainer.log.line(format!(
            "=> model {} on {}{}",
            trainer.model.kind(),
            trainer.devices,
            if trainer.devices.is_replicated() { " (replicated)" } else { "" }
        ));

        if let Some(e) = fallback {
            trainer.log.line(format!("=> {e}; starting from epoch 0"));
        }
        match restored {
            Some((epoch, record)) => trainer.restore(epoch, record),
            None if !config.evaluate => trainer.load_pretrained(),
            None => {}
        }
        Ok(trainer)
    }

    /// Apply the checkpoint of completed epoch `epoch`
    fn restore(&mut self, epoch: usize, record: CheckpointRecord) {
        let report = self.model.load_state(&record.model_parameters, "");
        self.report_merge("checkpoint", &report);
        if let Err(e) = self.optimizer.load_state(record.optimizer_state) {
            warn!("optimizer state not restored: {e}");
            self.log.line(format!("=> {e}; optimizer starts fresh"));
        }
        if let Err(e) = self.schedule.load_state(record.scheduler_state) {
            warn!("scheduler state not restored: {e}");
            self.log.line(format!("=> {e}; scheduler starts fresh"));
        }

        self.state = TrainingState {
            epoch: record.epoch,
            best_epoch: record.best_epoch,
            lowest_score: record.lowest_score,
        };
        self.start_epoch = record.epoch;
        self.stage = Stage::Resumed(record.epoch);
        self.log.line(format!(
            "=> loaded checkpoint {} (epoch {})",
            self.checkpoints.checkpoint_path(epoch).display(),
            record.epoch
        ));
    }

    /// Apply configured pretrained weights; every failure is logged and skipped
    fn load_pretrained(&mut self) {
        let Some(source) = self.config.pretrained.clone() else {
            return;
        };
        let (path, prefix) = match &source {
            PretrainedSource::Backbone(p) => (p.clone(), self.model.backbone_prefix().to_string()),
            PretrainedSource::Checkpoint(p) => (p.clone(), String::new()),
        };
        if !path.is_file() {
            self.log
                .line(format!("=> no checkpoint found at {}", path.display()));
            return;
        }

        let params = match &source {
            PretrainedSource::Backbone(_) => load_weights(&path),
            PretrainedSource::Checkpoint(_) => read_external_checkpoint(&path),
        };
        match params {
            Ok(params) => {
                let report = self.model.load_state(&params, &prefix);
                self.report_merge(&path.display().to_string(), &report);
            }
            Err(e) => {
                warn!("pretrained weights skipped: {e}");
                self.log.line(format!("=> {e}; using initial weights"));
            }
        }
    }

    fn report_merge(&self, source: &str, report: &MergeReport) {
        self.log.line(format!(
            "=> loaded {} parameters from {source}",
            report.loaded.len()
        ));
        for (name, reason) in &report.skipped {
            self.log.line(format!("   skipped {name}: {reason}"));
        }
    }

    /// Run until the configured epoch count, cancellation or, in
    /// evaluate-only mode, after one validation pass
    pub fn run(&mut self) -> Result<TrainOutcome> {
        if self.config.evaluate {
            let evaluation = self.evaluate()?;
            return Ok(self.outcome(Vec::new(), Some(evaluation)));
        }

        let mut history = Vec::new();
        for epoch in self.state.epoch..self.config.epochs {
            if self.is_cancelled() {
                self.stage = Stage::Cancelled;
                break;
            }
            match self.run_epoch(epoch)? {
                Some(summary) => history.push(summary),
                None => {
                    self.stage = Stage::Cancelled;
                    break;
                }
            }
        }
        if self.stage != Stage::Cancelled {
            self.stage = Stage::Terminal;
        } else {
            self.log.line("=> cancelled");
        }
        self.log.flush()?;
        Ok(self.outcome(history, None))
    }

    fn outcome(&self, history: Vec<EpochSummary>, evaluation: Option<PhaseSummary>) -> TrainOutcome {
        TrainOutcome {
            stage: self.stage,
            start_epoch: self.start_epoch,
            epoch: self.state.epoch,
            best_epoch: self.state.best_epoch,
            lowest_score: self.state.lowest_score,
            history,
            evaluation,
        }
    }

    /// One full epoch at loop index `epoch`; `None` when cancelled
    pub fn run_epoch(&mut self, epoch: usize) -> Result<Option<EpochSummary>> {
        self.stage = Stage::TrainingEpoch(epoch);
        if let Some(lr) = self.schedule.before_epoch(self.optimizer.as_mut()) {
            debug!("epoch {epoch}: lr {lr}");
        }
        let lr = self.optimizer.lr();
        self.log.line(format!("=> epoch {epoch}, lr {lr}"));

        let Some(train) = self.train_epoch(epoch)? else {
            return Ok(None);
        };

        self.stage = Stage::ValidatingEpoch(epoch);
        // a trained epoch is always validated and checkpointed
        let validation = self.validate_epoch(epoch)?;

        self.stage = Stage::Checkpointing(epoch);
        let primary = self.config.primary_metric();
        let score = validation.metric(primary).unwrap_or(f32::NAN);
        let is_best = self.checkpoint(epoch, score)?;

        Ok(Some(EpochSummary {
            epoch: epoch + 1,
            lr,
            train,
            validation,
            score,
            is_best,
        }))
    }

    /// Training pass over the train loader; `None` when cancelled
    pub fn train_epoch(&mut self, epoch: usize) -> Result<Option<PhaseSummary>> {
        self.model.set_training(true);
        let started = Instant::now();
        let mut trackers = PhaseTrackers::new(&self.config.metrics);
        let mut batches = 0;
        let mut skipped = 0;

        let iter = self.train_loader.iter(epoch)?;
        let total = iter.total();
        let mut tick = Instant::now();
        for (i, item) in iter.enumerate() {
            if self.is_cancelled() {
                return Ok(None);
            }
            let batch = match item {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("epoch {epoch}: batch {i} skipped: {e}");
                    skipped += 1;
                    continue;
                }
            };

            let output = self.model.forward(batch.input.view(), epoch)?;
            let (loss, grads) = self.aggregator.compute(&output, &batch, Phase::Train)?;
            if !loss.total.is_finite() {
                warn!("epoch {epoch}: non-finite loss {} at batch {i}", loss.total);
            }

            self.optimizer.zero_grad(self.model.parameters_mut());
            if let Some(grads) = grads {
                self.model.backward(&grads)?;
            }
            if self.config.clip_grad_norm > 0.0 {
                clip_grad_norm(self.model.parameters_mut(), self.config.clip_grad_norm);
            }
            self.optimizer.step(self.model.parameters_mut());

            self.metrics.calculate(output.depth.view(), batch.depth.view())?;
            trackers.update(&loss, batch.len(), &self.metrics);
            trackers.batch_time.push(tick.elapsed().as_secs_f32());
            tick = Instant::now();
            batches += 1;

            if (i + 1) % self.config.print_freq == 0 {
                let header = format!("Epoch: [{epoch}][{}/{total}]", i + 1);
                self.log.line(trackers.progress_line(&header));
            }
        }

        let summary = trackers.summary(batches, skipped, started);
        self.log.line(format!(
            "=> train epoch {epoch}: loss {:.4}{}",
            summary.loss.total,
            format_metrics(&summary.metrics)
        ));
        Ok(Some(summary))
    }

    /// Validation pass over the validation loader
    pub fn validate_epoch(&mut self, epoch: usize) -> Result<PhaseSummary> {
        let iter = self.val_loader.iter(epoch)?;
        self.validate_batches(iter, epoch)
    }

    fn validate_batches(&mut self, iter: BatchIter, epoch: usize) -> Result<PhaseSummary> {
        self.model.set_training(false);
        let started = Instant::now();
        let mut trackers = PhaseTrackers::new(&self.config.metrics);
        let mut batches = 0;
        let mut skipped = 0;

        let total = iter.total();
        let mut tick = Instant::now();
        for (i, item) in iter.enumerate() {
            let batch = match item {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("validation batch {i} skipped: {e}");
                    skipped += 1;
                    continue;
                }
            };

            let output = self.model.forward(batch.input.view(), epoch)?;
            let (loss, _) = self.aggregator.compute(&output, &batch, Phase::Validate)?;
            self.metrics.calculate(output.depth.view(), batch.depth.view())?;
            trackers.update(&loss, batch.len(), &self.metrics);
            trackers.batch_time.push(tick.elapsed().as_secs_f32());
            tick = Instant::now();
            batches += 1;

            if (i + 1) % self.config.print_freq == 0 {
                let header = format!("Test: [{}/{total}]", i + 1);
                self.log.line(trackers.progress_line(&header));
            }
        }

        let summary = trackers.summary(batches, skipped, started);
        self.log.line(format!(
            "=> validation: loss {:.4}{}",
            summary.loss.total,
            format_metrics(&summary.metrics)
        ));
        Ok(summary)
    }

    /// Persist the epoch and feed the score to the schedule
    ///
    /// Returns whether the epoch is the new best.
    fn checkpoint(&mut self, epoch: usize, score: f32) -> Result<bool> {
        let completed = epoch + 1;
        let is_best = score < self.state.lowest_score;
        if is_best {
            self.state.lowest_score = score;
            self.state.best_epoch = completed;
        }
        self.state.epoch = completed;

        if let Some(lr) = self.schedule.after_validation(score, self.optimizer.as_mut()) {
            self.log.line(format!("=> lr reduced to {lr}"));
        }

        let record = CheckpointRecord {
            epoch: completed,
            best_epoch: self.state.best_epoch,
            architecture: self.model.kind().to_string(),
            model_parameters: self.model.state(),
            lowest_score: self.state.lowest_score,
            optimizer_state: self.optimizer.state(),
            scheduler_state: self.schedule.state(),
        };
        self.checkpoints.save(&record, is_best)?;
        self.checkpoints.write_marker(completed)?;

        self.log.line(format!(
            "=> best epoch {} with {} {:.4}",
            self.state.best_epoch,
            self.config.primary_metric(),
            self.state.lowest_score
        ));
        Ok(is_best)
    }

    /// Restore the best checkpoint when there is one and validate on the
    /// validation subset
    pub fn evaluate(&mut self) -> Result<PhaseSummary> {
        match self.checkpoints.load_best() {
            Ok(record) => {
                let report = self.model.load_state(&record.model_parameters, "");
                self.report_merge("best checkpoint", &report);
                self.state = TrainingState {
                    epoch: record.epoch,
                    best_epoch: record.best_epoch,
                    lowest_score: record.lowest_score,
                };
            }
            Err(e) if e.is_recoverable_checkpoint() => {
                self.log.line(format!("=> {e}; evaluating initial weights"));
            }
            Err(e) => return Err(e),
        }

        self.stage = Stage::ValidatingEpoch(self.state.epoch);
        let iter = self.val_subset_loader.iter(self.state.epoch)?;
        let summary = self.validate_batches(iter, self.state.epoch)?;

        self.stage = Stage::Terminal;
        self.log.flush()?;
        Ok(summary)
    }

    /// Flag polled between training batches; set it from any thread to stop the run
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Loop index the next [`Trainer::run`] starts at
    pub fn start_epoch(&self) -> usize {
        self.state.epoch
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn DepthCompletionModel {
        self.model.as_ref()
    }

    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    pub fn devices(&self) -> &DeviceGroup {
        &self.devices
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn run_dir(&self) -> &Path {
        self.checkpoints.dir()
    }
}

/// Parameters from an earlier run: a checkpoint record, or a bare weight file
fn read_external_checkpoint(path: &Path) -> Result<ParamState> {
    if WeightFormat::from_path(path) == Some(WeightFormat::SafeTensors) {
        return load_weights(path);
    }
    match CheckpointRecord::read(path) {
        Ok(record) => Ok(record.model_parameters),
        Err(Error::CheckpointCorrupt { .. }) => load_weights(path),
        Err(e) => Err(e),
    }
}

/// Metric average; NaN when no valid pixel was seen, so it never wins best
fn metric_average(tracker: &RunningAverage) -> f32 {
    if tracker.count() == 0.0 {
        f32::NAN
    } else {
        tracker.avg()
    }
}

fn format_metrics(metrics: &[(MetricKind, f32)]) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!(", {} {v:.3}", k.label()))
        .collect()
}

/// Location of the checkpoint a resumed run would load, if any
pub fn resume_checkpoint(config: &TrainConfig) -> Option<PathBuf> {
    let manager = CheckpointManager::new(config.run_dir(), RunLog::memory()).ok()?;
    let epoch = manager.resume_lookup()?;
    let path = manager.checkpoint_path(epoch);
    path.is_file().then_some(path)
}
