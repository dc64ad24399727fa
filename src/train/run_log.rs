//! Operator-facing run log
//!
//! Every line is mirrored to `tracing` at info level and appended to the
//! run's log file. The log is shared by handle between the trainer and the
//! checkpoint manager.

use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

enum Sink {
    File(BufWriter<File>),
    Memory(Vec<String>),
}

/// Cloneable handle to a log sink
#[derive(Clone)]
pub struct RunLog {
    sink: Arc<Mutex<Sink>>,
}

impl RunLog {
    /// Append to `path`, creating it if needed
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::from_sink(Sink::File(BufWriter::new(file))))
    }

    /// Keep lines in memory; for tests and dry runs
    pub fn memory() -> Self {
        Self::from_sink(Sink::Memory(Vec::new()))
    }

    fn from_sink(sink: Sink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn line(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(target: "segdepth::run", "{message}");

        match &mut *self.lock() {
            Sink::File(w) => {
                let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                if let Err(e) = writeln!(w, "[{stamp}] {message}") {
                    warn!("run log write failed: {e}");
                }
            }
            Sink::Memory(lines) => lines.push(message.to_string()),
        }
    }

    /// Lines captured by a memory sink; empty for file sinks
    pub fn lines(&self) -> Vec<String> {
        match &*self.lock() {
            Sink::Memory(lines) => lines.clone(),
            Sink::File(_) => Vec::new(),
        }
    }

    pub fn flush(&self) -> Result<()> {
        if let Sink::File(w) = &mut *self.lock() {
            w.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.lock() {
            Sink::File(_) => "file",
            Sink::Memory(_) => "memory",
        };
        f.debug_struct("RunLog").field("sink", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_is_shared_between_clones() {
        let log = RunLog::memory();
        let other = log.clone();
        log.line("first");
        other.line("second");
        assert_eq!(log.lines(), vec!["first", "second"]);
    }

    #[test]
    fn test_file_sink_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_train_start_0.txt");

        let log = RunLog::to_file(&path).unwrap();
        log.line("epoch 1 done");
        log.flush().unwrap();
        drop(log);

        let log = RunLog::to_file(&path).unwrap();
        log.line("epoch 2 done");
        drop(log);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("epoch 1 done"));
        assert!(lines[1].ends_with("epoch 2 done"));
    }
}
