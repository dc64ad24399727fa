//! Single-command training from YAML configuration

use super::schema::TrainSpec;
use super::validate::validate_config;
use crate::error::{Error, Result};
use crate::train::{TrainOutcome, Trainer};
use std::fs;
use std::path::Path;

/// Read and parse a YAML configuration without validating it
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<TrainSpec> {
    let path = config_path.as_ref();
    let yaml = fs::read_to_string(path)?;
    serde_yaml::from_str(&yaml).map_err(|e| {
        Error::Serialization(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Train a model from YAML configuration file
///
/// Loads, validates and runs the configuration end to end, resuming from the
/// run directory's marker when one exists.
///
/// # Example
///
/// ```no_run
/// use segdepth::config::train_from_yaml;
///
/// let outcome = train_from_yaml("config.yaml")?;
/// println!("best epoch {}", outcome.best_epoch);
/// # Ok::<(), segdepth::Error>(())
/// ```
pub fn train_from_yaml<P: AsRef<Path>>(config_path: P) -> Result<TrainOutcome> {
    let spec = load_config(config_path)?;
    let config = validate_config(&spec)?;
    Trainer::from_config(&config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "training:\n  epochs: 2\n").unwrap();
        let spec = load_config(&path).unwrap();
        assert_eq!(spec.training.epochs, 2);
    }

    #[test]
    fn test_load_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config(dir.path().join("missing.yaml")),
            Err(Error::Io(_))
        ));

        let path = dir.path().join("bad.yaml");
        fs::write(&path, "training: [1, 2").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Serialization(_))));
    }
}
