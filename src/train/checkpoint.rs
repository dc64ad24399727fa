//! Checkpoint persistence, retention and resume lookup
//!
//! Layout of a save directory:
//!
//! ```text
//! checkpoint_model_epoch_<E>.json   newest completed epoch
//! model_best_epoch_<B>.json         copy of the best epoch so far
//! last_epoch.txt                    resume marker, holds <E>
//! ```
//!
//! Every file is written to a temporary sibling first and renamed into place,
//! so an interrupted write never leaves a truncated checkpoint behind.

use super::RunLog;
use crate::io::ParamState;
use crate::optim::{OptimizerState, SchedulerState};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MARKER_FILE: &str = "last_epoch.txt";
const CHECKPOINT_PREFIX: &str = "checkpoint_model_epoch_";
const BEST_PREFIX: &str = "model_best_epoch_";
const EXTENSION: &str = "json";

/// Full training state at an epoch boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Completed epochs; also the loop index training resumes at
    pub epoch: usize,
    pub best_epoch: usize,
    pub architecture: String,
    pub model_parameters: ParamState,
    /// Lowest validation score so far; `+inf` before the first validation
    #[serde(with = "score")]
    pub lowest_score: f32,
    pub optimizer_state: OptimizerState,
    #[serde(default)]
    pub scheduler_state: SchedulerState,
}

impl CheckpointRecord {
    /// Parse a checkpoint file outside of any managed directory
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CheckpointNotFound(path.to_path_buf()))
            }
            Err(e) => {
                return Err(Error::CheckpointCorrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::CheckpointCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// JSON has no infinity: non-finite scores are stored as `null`
mod score {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::INFINITY))
    }
}

/// Owns the files of one save directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    log: RunLog,
}

impl CheckpointManager {
    pub fn new(dir: impl AsRef<Path>, log: RunLog) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, log })
    }

    /// Route operator lines to `log` from now on
    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = log;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_PREFIX}{epoch}.{EXTENSION}"))
    }

    pub fn best_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{BEST_PREFIX}{epoch}.{EXTENSION}"))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// Last completed epoch according to the resume marker
    ///
    /// A missing or unreadable marker means "start fresh".
    pub fn resume_lookup(&self) -> Option<usize> {
        let path = self.marker_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("cannot read resume marker {}: {e}", path.display());
                }
                return None;
            }
        };
        match content.trim().parse() {
            Ok(epoch) => Some(epoch),
            Err(_) => {
                warn!("ignoring unreadable resume marker {:?}", content.trim());
                None
            }
        }
    }

    pub fn write_marker(&self, epoch: usize) -> Result<()> {
        write_atomic(&self.marker_path(), epoch.to_string().as_bytes())
    }

    pub fn load(&self, epoch: usize) -> Result<CheckpointRecord> {
        CheckpointRecord::read(&self.checkpoint_path(epoch))
    }

    /// Path of the current best copy, if any
    pub fn best(&self) -> Option<PathBuf> {
        self.files_with_prefix(BEST_PREFIX)
            .into_iter()
            .max_by_key(|(epoch, _)| *epoch)
            .map(|(_, path)| path)
    }

    pub fn load_best(&self) -> Result<CheckpointRecord> {
        let path = self
            .best()
            .ok_or_else(|| Error::CheckpointNotFound(self.dir.join(format!("{BEST_PREFIX}*"))))?;
        CheckpointRecord::read(&path)
    }

    /// Persist `record` as the checkpoint for `record.epoch`
    ///
    /// When `is_best`, every older best copy is removed before the new one is
    /// written. The checkpoint of the previous epoch is removed last.
    pub fn save(&self, record: &CheckpointRecord, is_best: bool) -> Result<()> {
        let epoch = record.epoch;
        let bytes = serde_json::to_vec(record)
            .map_err(|e| Error::Serialization(format!("checkpoint encoding failed: {e}")))?;

        let path = self.checkpoint_path(epoch);
        write_atomic(&path, &bytes)?;
        debug!("wrote {}", path.display());

        if is_best {
            for (_, old) in self.files_with_prefix(BEST_PREFIX) {
                remove_if_present(&old)?;
            }
            write_atomic(&self.best_path(epoch), &bytes)?;
            self.log.line("Best model copied");
        }

        if epoch > 0 {
            remove_if_present(&self.checkpoint_path(epoch - 1))?;
        }
        Ok(())
    }

    /// `(epoch, path)` of every file named `<prefix><epoch>.json`
    fn files_with_prefix(&self, prefix: &str) -> Vec<(usize, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let epoch = name
                    .to_str()?
                    .strip_prefix(prefix)?
                    .strip_suffix(EXTENSION)?
                    .strip_suffix('.')?
                    .parse()
                    .ok()?;
                Some((epoch, e.path()))
            })
            .collect()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
