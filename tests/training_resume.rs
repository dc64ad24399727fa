//! End-to-end runs of the epoch loop against a temporary save directory

use segdepth::config::{validate_config, PretrainedSource, TrainConfig, TrainSpec};
use segdepth::train::{Stage, Trainer, MARKER_FILE};
use segdepth::Error;
use std::fs;
use std::path::Path;

fn small_config(save_path: &Path, epochs: usize, optimizer: &str) -> TrainConfig {
    let mut spec = TrainSpec::default();
    spec.training.epochs = epochs;
    spec.training.save_path = save_path.to_path_buf();
    spec.training.print_freq = 1;
    spec.optimizer.name = optimizer.into();
    spec.optimizer.clip_grad_norm = 5.0;
    spec.data.train_samples = 6;
    spec.data.val_samples = 3;
    spec.data.val_subset_samples = 2;
    spec.data.height = 6;
    spec.data.width = 9;
    spec.model.hidden = 4;
    validate_config(&spec).unwrap()
}

fn json_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".json"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let straight_dir = tempfile::tempdir().unwrap();
    let mut straight = Trainer::from_config(&small_config(straight_dir.path(), 3, "adam")).unwrap();
    let straight_outcome = straight.run().unwrap();

    let split_dir = tempfile::tempdir().unwrap();
    let first = small_config(split_dir.path(), 1, "adam");
    Trainer::from_config(&first).unwrap().run().unwrap();

    let mut resumed = Trainer::from_config(&small_config(split_dir.path(), 3, "adam")).unwrap();
    assert_eq!(resumed.stage(), Stage::Resumed(1));
    let resumed_outcome = resumed.run().unwrap();

    assert_eq!(resumed_outcome.start_epoch, 1);
    assert_eq!(resumed_outcome.epoch, 3);
    assert_eq!(resumed_outcome.best_epoch, straight_outcome.best_epoch);
    assert_eq!(
        resumed_outcome.lowest_score.to_bits(),
        straight_outcome.lowest_score.to_bits()
    );
    assert_eq!(resumed.model().state(), straight.model().state());
    assert_eq!(resumed.lr(), straight.lr());
}

#[test]
fn test_marker_selects_next_epoch() {
    let dir = tempfile::tempdir().unwrap();
    Trainer::from_config(&small_config(dir.path(), 2, "sgd"))
        .unwrap()
        .run()
        .unwrap();

    let config = small_config(dir.path(), 4, "sgd");
    let marker = config.run_dir().join(MARKER_FILE);
    assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "2");

    let mut trainer = Trainer::from_config(&config).unwrap();
    assert_eq!(trainer.start_epoch(), 2);
    let outcome = trainer.run().unwrap();
    let labels: Vec<usize> = outcome.history.iter().map(|e| e.epoch).collect();
    assert_eq!(labels, vec![3, 4]);
    assert!(config.run_dir().join("log_train_start_2.txt").is_file());
}

#[test]
fn test_retention_leaves_one_checkpoint_and_one_best() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path(), 4, "adam");
    let outcome = Trainer::from_config(&config).unwrap().run().unwrap();

    let files = json_files(&config.run_dir());
    assert_eq!(files.len(), 2, "{files:?}");
    assert!(files.contains(&"checkpoint_model_epoch_4.json".to_string()));
    assert!(files.contains(&format!("model_best_epoch_{}.json", outcome.best_epoch)));
}

#[test]
fn test_corrupt_checkpoint_degrades_to_fresh_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path(), 1, "sgd");
    Trainer::from_config(&config).unwrap().run().unwrap();

    fs::write(
        config.run_dir().join("checkpoint_model_epoch_1.json"),
        b"{ not json",
    )
    .unwrap();

    let trainer = Trainer::from_config(&small_config(dir.path(), 2, "sgd")).unwrap();
    assert_eq!(trainer.stage(), Stage::FreshStart);
    assert_eq!(trainer.start_epoch(), 0);

    trainer.log().flush().unwrap();
    let log = fs::read_to_string(config.run_dir().join("log_train_start_0.txt")).unwrap();
    assert!(log.contains("starting from epoch 0"));
}

#[test]
fn test_test_mode_ignores_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path(), 1, "sgd");
    Trainer::from_config(&config).unwrap().run().unwrap();

    let mut again = config.clone();
    again.test_mode = true;
    let trainer = Trainer::from_config(&again).unwrap();
    assert_eq!(trainer.stage(), Stage::FreshStart);
}

#[test]
fn test_evaluate_only_restores_best() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path(), 2, "adam");
    let trained = Trainer::from_config(&config).unwrap().run().unwrap();

    let mut eval_config = config.clone();
    eval_config.evaluate = true;
    let mut trainer = Trainer::from_config(&eval_config).unwrap();
    let outcome = trainer.run().unwrap();

    assert_eq!(outcome.stage, Stage::Terminal);
    assert!(outcome.history.is_empty());
    assert_eq!(outcome.epoch, trained.best_epoch);
    let evaluation = outcome.evaluation.unwrap();
    assert_eq!(evaluation.batches, 2);
    assert_eq!(evaluation.metrics.len(), 2);
    assert!(config.run_dir().join("log_evaluate.txt").is_file());
}

#[test]
fn test_full_checkpoint_as_pretrained_source() {
    let source_dir = tempfile::tempdir().unwrap();
    let source_config = small_config(source_dir.path(), 1, "sgd");
    let mut source = Trainer::from_config(&source_config).unwrap();
    source.run().unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let mut target_config = small_config(target_dir.path(), 1, "sgd");
    target_config.pretrained = Some(PretrainedSource::Checkpoint(
        source_config.run_dir().join("checkpoint_model_epoch_1.json"),
    ));
    let target = Trainer::from_config(&target_config).unwrap();

    assert_eq!(target.stage(), Stage::FreshStart);
    assert_eq!(target.model().state(), source.model().state());
}

#[test]
fn test_missing_accelerator_fails_before_any_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), 1, "sgd");
    config.device.accelerator = true;
    config.device.ids = vec![4096];

    let err = Trainer::from_config(&config).err().unwrap();
    assert!(matches!(err, Error::DeviceUnavailable(_)));
    assert!(!config.run_dir().exists());
}
