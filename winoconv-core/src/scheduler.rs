//! Fan-out of stage work across worker threads.
//!
//! Stages are written against `(thread_id, thread_count)` and never spawn threads themselves;
//! a [`Scheduler`] decides where those slices execute and returns once all of them finished.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use rayon::prelude::*;

use crate::error::ConfigurationError;

pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Number of slices the scheduler can run concurrently.
    fn num_threads(&self) -> usize;

    /// Run `task(slice, num_slices)` for every slice and wait for all of them.
    fn schedule(&self, num_slices: usize, task: &(dyn Fn(usize, usize) + Sync));
}

/// Executes slices one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialScheduler;

impl Scheduler for SerialScheduler {
    fn num_threads(&self) -> usize {
        1
    }

    fn schedule(&self, num_slices: usize, task: &(dyn Fn(usize, usize) + Sync)) {
        for slice in 0..num_slices {
            task(slice, num_slices);
        }
    }
}

/// Executes slices on a rayon pool: the global one, or a dedicated pool of fixed size.
#[derive(Clone)]
pub struct RayonScheduler {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonScheduler {
    /// Use rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Build a dedicated pool. `threads == 0` falls back to the global pool.
    pub fn with_threads(threads: usize) -> Result<Self, ConfigurationError> {
        if threads == 0 {
            return Ok(Self::global());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("winoconv-worker-{index}"))
            .build()
            .map_err(|err| ConfigurationError::ThreadPool(err.to_string()))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }
}

impl Default for RayonScheduler {
    fn default() -> Self {
        Self::global()
    }
}

impl Scheduler for RayonScheduler {
    fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn schedule(&self, num_slices: usize, task: &(dyn Fn(usize, usize) + Sync)) {
        let run = || {
            (0..num_slices)
                .into_par_iter()
                .for_each(|slice| task(slice, num_slices))
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

impl fmt::Debug for RayonScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonScheduler")
            .field("dedicated", &self.pool.is_some())
            .field("threads", &self.num_threads())
            .finish()
    }
}

/// Contiguous share of `0..total` owned by `slice` out of `count` slices. Earlier slices take
/// the remainder, so sizes differ by at most one.
pub fn split_range(total: usize, slice: usize, count: usize) -> Range<usize> {
    let count = count.max(1);
    let base = total / count;
    let extra = total % count;
    let start = slice * base + slice.min(extra);
    let len = base + usize::from(slice < extra);
    start.min(total)..(start + len).min(total)
}

/// Split `data` at the given ascending boundaries into per-slice chunks guarded for
/// hand-off to scheduler tasks. `bounds` holds `slices + 1` offsets starting at 0.
pub fn partition_mut<'a>(data: &'a mut [f32], bounds: &[usize]) -> Vec<Mutex<&'a mut [f32]>> {
    let mut chunks = Vec::with_capacity(bounds.len().saturating_sub(1));
    let mut rest = data;
    for pair in bounds.windows(2) {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(pair[1] - pair[0]);
        chunks.push(Mutex::new(head));
        rest = tail;
    }
    chunks
}

/// Lock a chunk produced by [`partition_mut`], recovering it if another slice panicked.
pub fn lock_chunk<'g, 'a>(chunk: &'g Mutex<&'a mut [f32]>) -> MutexGuard<'g, &'a mut [f32]> {
    match chunk.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
