//! Work-stealing execution context and the parallel column transformer.
//!
//! Built directly on [`rayon`]'s fork-join pool: a worker thread calling
//! back into [`Context::call`] runs inline via `ThreadPool::install`'s
//! nested-pool detection rather than re-queuing, which is what gives us
//! rule 4 of the scheduling contract (nested submissions never deadlock)
//! for free.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use once_cell::sync::Lazy;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{instrument, warn};

use crate::{
    buffer::Value,
    column::Column,
    error::{Error, Result},
};

static DEFAULT_POOL: Lazy<Arc<ThreadPool>> = Lazy::new(|| {
    Arc::new(
        ThreadPoolBuilder::new()
            .build()
            .expect("default worker pool failed to initialize"),
    )
});

/// A handle to a shared fork-join pool, carrying a parallelism level and an
/// active flag. Submitting to an inactive context fails immediately.
#[derive(Clone)]
pub struct Context {
    pool: Arc<ThreadPool>,
    active: Arc<AtomicBool>,
}

impl Context {
    /// The process-wide default context, created lazily on first use.
    #[must_use]
    pub fn default_context() -> Context {
        Context { pool: DEFAULT_POOL.clone(), active: Arc::new(AtomicBool::new(true)) }
    }

    /// A context bound to a pool with exactly `workers` threads.
    ///
    /// # Panics
    ///
    /// Panics if the underlying pool fails to initialize.
    #[must_use]
    pub fn with_worker_count(workers: usize) -> Context {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("worker pool failed to initialize");
        Context { pool: Arc::new(pool), active: Arc::new(AtomicBool::new(true)) }
    }

    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Flips the active flag false. Running tasks complete; new submissions
    /// (from any thread, including those tasks) fail `context-inactive`.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Runs `callables` concurrently, returning results in submission
    /// order.
    ///
    /// # Errors
    ///
    /// [`Error::ContextInactive`] if the context was shut down;
    /// [`Error::UserFailure`] if the first callable observed to fail
    /// propagates its cause; [`Error::Aborted`] if a sentinel interrupts the
    /// batch.
    #[instrument(skip_all, fields(count = callables.len()))]
    pub fn call<T, F>(&self, callables: Vec<F>) -> Result<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        if callables.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_active() {
            return Err(Error::ContextInactive);
        }

        let sentinel = Arc::new(AtomicBool::new(true));
        let results: Vec<Result<T>> = self.pool.install(|| {
            use rayon::iter::{IntoParallelIterator, ParallelIterator};
            callables
                .into_par_iter()
                .map(|callable| {
                    if !sentinel.load(Ordering::Acquire) {
                        return Err(Error::Aborted);
                    }
                    let outcome = callable();
                    if outcome.is_err() {
                        sentinel.store(false, Ordering::Release);
                    }
                    outcome
                })
                .collect()
        });

        results.into_iter().collect()
    }
}

/// Per-row cost/throughput classification used to pick batch size and
/// worker count for a parallel transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Small,
    Medium,
    Large,
    Huge,
}

impl Workload {
    fn threshold(self) -> usize {
        match self {
            Workload::Small => 16_384,
            Workload::Medium => 4_096,
            Workload::Large => 1_024,
            Workload::Huge => 256,
        }
    }

    fn batch(self) -> usize {
        match self {
            Workload::Small => 8_192,
            Workload::Medium => 2_048,
            Workload::Large => 512,
            Workload::Huge => 64,
        }
    }
}

fn plan(size: usize, workers: usize, workload: Workload) -> (usize, usize) {
    if size < workload.threshold() || workers <= 1 {
        return (1, size.max(1));
    }
    let by_batch = size.div_ceil(workload.batch());
    let worker_count = workers.min(by_batch).max(1);
    let batch_size = size.div_ceil(worker_count).max(1);
    (worker_count, batch_size)
}

fn batch_ranges(size: usize, worker_count: usize) -> Vec<(usize, usize)> {
    let batch_size = size.div_ceil(worker_count.max(1));
    (0..worker_count)
        .map(|i| (i * batch_size, (size).min((i + 1) * batch_size)))
        .filter(|(start, end)| start < end)
        .collect()
}

/// Progress reporting; callbacks may fire concurrently and unordered — the
/// caller must treat them as a thread-unsafe best-effort signal.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Builds a new `f64` column by applying `mapper` to every row of `source`
/// in parallel.
///
/// # Errors
///
/// [`Error::ContextInactive`] if `context` was shut down;
/// [`Error::UserFailure`] if `mapper` panics (caught as an abort) or the
/// pool reports a failure.
pub fn transform_numeric<F>(
    context: &Context,
    source: &Column,
    workload: Workload,
    progress: Option<ProgressCallback>,
    mapper: F,
) -> Result<Vec<f64>>
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    if !context.is_active() {
        return Err(Error::ContextInactive);
    }
    let size = source.size();
    if size == 0 {
        return Ok(Vec::new());
    }

    let (worker_count, _) = plan(size, context.parallelism(), workload);
    let ranges = batch_ranges(size, worker_count);
    let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mapper = &mapper;

    let callables: Vec<_> = ranges
        .into_iter()
        .map(|(start, end)| {
            let completed = completed.clone();
            let progress = progress.clone();
            move || -> Result<(usize, Vec<f64>)> {
                const CHUNK: usize = 128;
                let mut scratch = vec![0.0f64; CHUNK.min(end - start)];
                let mut out = Vec::with_capacity(end - start);
                let mut row = start;
                while row < end {
                    let n = CHUNK.min(end - row);
                    source.fill_doubles(&mut scratch[..n], row)?;
                    out.extend(scratch[..n].iter().map(|&v| mapper(v)));
                    row += n;
                }
                let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                if let Some(cb) = &progress {
                    cb(done, end.saturating_sub(start));
                }
                Ok((start, out))
            }
        })
        .collect();

    let mut batches = context.call(callables)?;
    batches.sort_by_key(|(start, _)| *start);

    let mut result = vec![0.0f64; size];
    for (start, values) in batches {
        result[start..start + values.len()].copy_from_slice(&values);
    }
    Ok(result)
}

/// Folds every row of `source` with `combiner`, seeded independently per
/// worker batch then combined pairwise. `combiner` must be associative.
///
/// # Errors
///
/// [`Error::ContextInactive`] if `context` was shut down.
pub fn reduce_numeric<F>(context: &Context, source: &Column, workload: Workload, seed: f64, combiner: F) -> Result<f64>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    if !context.is_active() {
        return Err(Error::ContextInactive);
    }
    let size = source.size();
    if size == 0 {
        return Ok(seed);
    }

    let (worker_count, _) = plan(size, context.parallelism(), workload);
    let ranges = batch_ranges(size, worker_count);

    let callables: Vec<_> = ranges
        .into_iter()
        .map(|(start, end)| {
            let combiner = &combiner;
            move || -> Result<f64> {
                const CHUNK: usize = 128;
                let mut scratch = vec![0.0f64; CHUNK.min(end - start)];
                let mut acc = seed;
                let mut row = start;
                while row < end {
                    let n = CHUNK.min(end - row);
                    source.fill_doubles(&mut scratch[..n], row)?;
                    for &v in &scratch[..n] {
                        acc = combiner(acc, v);
                    }
                    row += n;
                }
                Ok(acc)
            }
        })
        .collect();

    let partials = context.call(callables)?;
    Ok(partials.into_iter().fold(seed, |a, b| combiner(a, b)))
}

/// Builds a new object-valued column by applying `mapper` to every row of
/// `source` in parallel.
///
/// # Errors
///
/// [`Error::ContextInactive`] if `context` was shut down.
pub fn transform_object<F>(
    context: &Context,
    source: &Column,
    workload: Workload,
    mapper: F,
) -> Result<Vec<Value>>
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    if !context.is_active() {
        return Err(Error::ContextInactive);
    }
    let size = source.size();
    if size == 0 {
        return Ok(Vec::new());
    }

    let (worker_count, _) = plan(size, context.parallelism(), workload);
    let ranges = batch_ranges(size, worker_count);
    let mapper = &mapper;

    let callables: Vec<_> = ranges
        .into_iter()
        .map(|(start, end)| {
            move || -> Result<(usize, Vec<Value>)> {
                const CHUNK: usize = 128;
                let mut scratch = vec![Value::Null; CHUNK.min(end - start)];
                let mut out = Vec::with_capacity(end - start);
                let mut row = start;
                while row < end {
                    let n = CHUNK.min(end - row);
                    source.fill_objects(&mut scratch[..n], row)?;
                    out.extend(scratch[..n].iter().map(mapper));
                    row += n;
                }
                Ok((start, out))
            }
        })
        .collect();

    let mut batches = context.call(callables)?;
    batches.sort_by_key(|(start, _)| *start);
    if batches.len() > 1 {
        warn!(batch_count = batches.len(), "reassembling out-of-order parallel batches");
    }

    let mut result = vec![Value::Null; size];
    for (start, values) in batches {
        let len = values.len();
        result[start..start + len].clone_from_slice(&values);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::column::Column;

    #[test]
    fn call_returns_results_in_submission_order() {
        let context = Context::with_worker_count(4);
        let callables: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> =
            (0..20).map(|i| Box::new(move || Ok(i)) as Box<dyn FnOnce() -> Result<usize> + Send>).collect();
        let results = context.call(callables).unwrap();
        assert_eq!(results, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn call_on_empty_input_returns_empty_output() {
        let context = Context::with_worker_count(2);
        let callables: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> = Vec::new();
        assert_eq!(context.call(callables).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn call_on_inactive_context_fails() {
        let context = Context::with_worker_count(2);
        context.shutdown();
        let callables: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> =
            vec![Box::new(|| Ok(1))];
        assert!(matches!(context.call(callables), Err(Error::ContextInactive)));
    }

    #[test]
    fn nested_call_terminates_with_one_worker() {
        let context = Context::with_worker_count(1);
        let inner = context.clone();
        let callables: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> = vec![Box::new(move || {
            let nested: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> = vec![Box::new(|| Ok(7))];
            let out = inner.call(nested)?;
            Ok(out[0])
        })];
        let results = context.call(callables).unwrap();
        assert_eq!(results, vec![7]);
    }

    #[test]
    fn small_and_huge_workload_produce_identical_output() {
        let context = Context::with_worker_count(4);
        let data: Arc<[f64]> = (0..5000).map(|i| i as f64).collect();
        let column = Column::dense_real(data);
        let small = transform_numeric(&context, &column, Workload::Small, None, |v| v * 2.0).unwrap();
        let huge = transform_numeric(&context, &column, Workload::Huge, None, |v| v * 2.0).unwrap();
        assert_eq!(small, huge);
    }

    #[test]
    fn reduce_numeric_matches_sequential_sum() {
        let context = Context::with_worker_count(4);
        let data: Arc<[f64]> = (0..2000).map(|i| i as f64).collect();
        let column = Column::dense_real(data.clone());
        let reduced = reduce_numeric(&context, &column, Workload::Huge, 0.0, |a, b| a + b).unwrap();
        let expected: f64 = data.iter().sum();
        assert!((reduced - expected).abs() < 1e-6);
    }
}
