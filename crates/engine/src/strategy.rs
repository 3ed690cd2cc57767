//! Worker-pool selection for engine passes

use imgcalc_core::{Error, Result};
use rayon::prelude::*;

/// How the blocks of a pass are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Rayon's global pool
    #[default]
    Parallel,
    /// A dedicated pool with the given number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Number of blocks processed per wave
    pub fn workers(&self) -> usize {
        match self {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => rayon::current_num_threads().max(1),
            ProcessingMode::ParallelWith(n) => (*n).max(1),
        }
    }

    /// Build the executor for one pass
    pub fn executor(&self) -> Result<Executor> {
        let pool = match self {
            ProcessingMode::ParallelWith(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads((*n).max(1))
                    .build()
                    .map_err(|e| Error::Configuration(format!("cannot build thread pool: {e}")))?,
            ),
            _ => None,
        };
        Ok(Executor { mode: *self, pool })
    }
}

/// Runs the per-block closure of a wave according to a [`ProcessingMode`]
pub struct Executor {
    mode: ProcessingMode,
    pool: Option<rayon::ThreadPool>,
}

impl Executor {
    /// Map `f` over `items`, preserving order in the result
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match (&self.mode, &self.pool) {
            (ProcessingMode::Sequential, _) => items.iter().map(f).collect(),
            (_, Some(pool)) => pool.install(|| items.par_iter().map(&f).collect()),
            _ => items.par_iter().map(f).collect(),
        }
    }
}
