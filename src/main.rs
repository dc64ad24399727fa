//! segdepth CLI
//!
//! # Usage
//!
//! ```bash
//! # Train (resumes automatically when the run directory has a marker)
//! segdepth train config.yaml
//!
//! # Train with overrides
//! segdepth train config.yaml --epochs 10 --lr 0.001
//!
//! # Evaluate the best checkpoint of a run
//! segdepth train config.yaml --evaluate
//!
//! # Validate config
//! segdepth validate config.yaml
//!
//! # Show the resolved configuration
//! segdepth info config.yaml
//! ```

use clap::Parser;
use segdepth::config::{
    apply_overrides, load_config, validate_config, Cli, Command, InfoArgs, OutputFormat, TrainArgs,
    ValidateArgs,
};
use segdepth::train::{resume_checkpoint, Stage, Trainer};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Validate(args) => run_validate(args),
        Command::Info(args) => run_info(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: TrainArgs) -> segdepth::Result<()> {
    info!("segdepth: training from {}", args.config.display());

    let mut spec = load_config(&args.config)?;
    apply_overrides(&mut spec, &args);
    let config = validate_config(&spec)?;

    let mut trainer = Trainer::from_config(&config)?;
    let cancel = trainer.cancel_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupt received; stopping, last completed epoch stays on disk");
        cancel.store(true, Ordering::SeqCst);
    }) {
        warn!("interrupt handler not installed: {e}");
    }
    let outcome = trainer.run()?;

    if let Some(evaluation) = &outcome.evaluation {
        for (kind, value) in &evaluation.metrics {
            info!("{} {value:.4}", kind.label());
        }
    }
    match outcome.stage {
        Stage::Cancelled => info!("stopped after epoch {}", outcome.epoch),
        _ => info!(
            "done: {} epochs, best epoch {} ({} {:.4})",
            outcome.epoch,
            outcome.best_epoch,
            config.primary_metric(),
            outcome.lowest_score
        ),
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> segdepth::Result<()> {
    let spec = load_config(&args.config)?;
    let config = validate_config(&spec)?;
    info!("configuration is valid, run directory {}", config.run_dir().display());
    Ok(())
}

fn run_info(args: InfoArgs) -> segdepth::Result<()> {
    let spec = load_config(&args.config)?;

    match args.format {
        OutputFormat::Text => {
            let config = validate_config(&spec)?;
            println!("Run: {}", config.run_id());
            println!("Model: {} (hidden {})", config.model.kind, config.model.hidden);
            println!("Optimizer: {} (lr={})", config.optimizer, config.lr);
            println!("Criterion: {}", config.criterion);
            println!("LR policy: {}", config.policy);
            println!("Epochs: {}", config.epochs);
            println!("Batch size: {}", config.train_loader.batch_size);
            let metrics: Vec<&str> = config.metrics.iter().map(|m| m.name()).collect();
            println!("Metrics: {}", metrics.join(", "));
            match resume_checkpoint(&config) {
                Some(path) => println!("Resumes from: {}", path.display()),
                None => println!("Resumes from: (fresh start)"),
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&spec)
                .map_err(|e| segdepth::Error::Serialization(e.to_string()))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&spec)
                .map_err(|e| segdepth::Error::Serialization(e.to_string()))?;
            println!("{yaml}");
        }
    }

    Ok(())
}
