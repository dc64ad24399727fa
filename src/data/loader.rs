//! Batched, seeded, optionally multi-threaded iteration over a dataset

use super::{Batch, DepthDataset};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Batching and worker settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderOptions {
    /// Samples per batch; the last batch may be smaller
    pub batch_size: usize,
    /// Reorder samples every epoch
    pub shuffle: bool,
    pub seed: u64,
    /// Producer threads; `0` loads on the calling thread
    pub num_workers: usize,
    /// Ready batches each worker may hold before it blocks
    pub prefetch: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 2,
            shuffle: true,
            seed: 1,
            num_workers: 0,
            prefetch: 2,
        }
    }
}

/// Batched iterator factory over a [`DepthDataset`]
///
/// The order for a given `(seed, epoch)` pair is always the same, so a run
/// resumed at epoch `e` sees exactly the batches an uninterrupted run would.
/// With workers, batch `k` is produced by worker `k % num_workers` and
/// consumed in index order, which keeps the output order independent of
/// thread scheduling.
pub struct DataLoader {
    dataset: Arc<dyn DepthDataset>,
    options: LoaderOptions,
}

impl DataLoader {
    pub fn new(dataset: Arc<dyn DepthDataset>, options: LoaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".into()));
        }
        Ok(Self { dataset, options })
    }

    pub fn dataset(&self) -> &dyn DepthDataset {
        self.dataset.as_ref()
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Number of complete (or partial) batches per epoch
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.options.batch_size)
    }

    /// Sample indices in the order they are served during `epoch`
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            let mixed = self.options.seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            indices.shuffle(&mut StdRng::seed_from_u64(mixed));
        }
        indices
    }

    /// Iterate over the batches of `epoch`
    pub fn iter(&self, epoch: usize) -> Result<BatchIter> {
        let order = self.epoch_order(epoch);
        let batches: Vec<Vec<usize>> = order
            .chunks(self.options.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let total = batches.len();

        let workers = self.options.num_workers.min(total);
        if workers == 0 {
            return Ok(BatchIter {
                source: Source::Inline {
                    dataset: Arc::clone(&self.dataset),
                    batches,
                },
                next: 0,
                total,
            });
        }

        let batches = Arc::new(batches);
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = sync_channel(self.options.prefetch.max(1));
            let dataset = Arc::clone(&self.dataset);
            let batches = Arc::clone(&batches);
            let handle = thread::Builder::new()
                .name(format!("loader-{worker}"))
                .spawn(move || {
                    for k in (worker..batches.len()).step_by(workers) {
                        if tx.send(load_batch(dataset.as_ref(), &batches[k])).is_err() {
                            debug!(worker, "batch consumer gone, stopping");
                            break;
                        }
                    }
                })?;
            receivers.push(rx);
            handles.push(handle);
        }

        Ok(BatchIter {
            source: Source::Workers { receivers, handles },
            next: 0,
            total,
        })
    }
}

fn load_batch(dataset: &dyn DepthDataset, indices: &[usize]) -> Result<Batch> {
    let samples = indices
        .iter()
        .map(|&i| dataset.get(i))
        .collect::<Result<Vec<_>>>()?;
    Batch::collate(&samples)
}

enum Source {
    Inline {
        dataset: Arc<dyn DepthDataset>,
        batches: Vec<Vec<usize>>,
    },
    Workers {
        receivers: Vec<Receiver<Result<Batch>>>,
        handles: Vec<JoinHandle<()>>,
    },
}

/// Iterator returned by [`DataLoader::iter`]
///
/// A sample that fails to load surfaces as an `Err` item for its batch;
/// iteration continues with the next batch.
pub struct BatchIter {
    source: Source,
    next: usize,
    total: usize,
}

impl BatchIter {
    /// Batches in this epoch
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let k = self.next;
        self.next += 1;

        match &self.source {
            Source::Inline { dataset, batches } => Some(load_batch(dataset.as_ref(), &batches[k])),
            Source::Workers { receivers, .. } => match receivers[k % receivers.len()].recv() {
                Ok(item) => Some(item),
                Err(_) => {
                    self.next = self.total;
                    Some(Err(Error::Dataset(format!("loader worker for batch {k} stopped"))))
                }
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let Source::Workers { receivers, handles } = &mut self.source {
            // Unblock workers waiting on a full channel
            receivers.clear();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
