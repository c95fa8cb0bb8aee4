//! # Weighted map-reduce
//!
//! Table of Contents:
//! 1. split_in_blocks: weight-balanced, key-homogeneous partitions
//! 2. TaskProgress / TaskHandle: completion signalling
//! 3. TaskExecutor: backend trait, InlineExecutor, RayonExecutor
//! 4. apply_reduce: partition, run, fold per-item partials in input order
//!
//! Partitions share their inputs read-only through `Arc`; only the caller's
//! accumulator is written, on the calling thread. Partials are folded by
//! input position, so the sequence of additions does not depend on how the
//! items were partitioned.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use tracing::{debug, info, warn};

use crate::error::{Result, ScenarioError};
use crate::metrics::ScenarioMetrics;

// ─────────────────────────────────────────────
// 1. split_in_blocks
// ─────────────────────────────────────────────

/// Sort items by (key, weight) and cut them into blocks. A block never mixes
/// keys and closes before its weight would exceed `ceil(total / hint)`; an
/// item heavier than that gets a block of its own.
pub fn split_in_blocks<T, K, KF, WF>(items: Vec<T>, hint: usize, key: KF, weight: WF) -> Result<Vec<Vec<T>>>
where
    K: Ord,
    KF: Fn(&T) -> K,
    WF: Fn(&T) -> f64,
{
    if hint == 0 {
        return Err(ScenarioError::config("number of blocks must be at least 1"));
    }

    let mut keyed = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let w = weight(&item);
        if !(w.is_finite() && w >= 0.0) {
            return Err(ScenarioError::InvalidWeight {
                item: format!("item #{}", i),
                weight: w,
            });
        }
        keyed.push((key(&item), w, item));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let total: f64 = keyed.iter().map(|(_, w, _)| w).sum();
    let max_weight = (total / hint as f64).ceil();

    let mut blocks = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_key: Option<K> = None;
    let mut current_weight = 0.0;

    for (k, w, item) in keyed {
        let key_changed = current_key.as_ref().is_some_and(|ck| *ck != k);
        if !current.is_empty() && (key_changed || current_weight + w > max_weight) {
            blocks.push(std::mem::take(&mut current));
            current_weight = 0.0;
        }
        current_weight += w;
        current_key = Some(k);
        current.push(item);
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    Ok(blocks)
}

// ─────────────────────────────────────────────
// 2. TaskProgress / TaskHandle
// ─────────────────────────────────────────────

/// Submitted / completed task counters shared with running tasks
#[derive(Default)]
pub struct TaskProgress {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    metrics: Option<Arc<ScenarioMetrics>>,
}

impl TaskProgress {
    /// Counters that also feed the partition metrics
    pub fn with_metrics(metrics: Arc<ScenarioMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    /// Tasks submitted so far
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Tasks that signalled completion so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark a task as finished
    pub fn signal_complete(&self, task_no: usize, ok: bool) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            task_no,
            ok,
            completed,
            submitted = self.submitted(),
            "Task complete"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_partition(ok);
        }
    }
}

impl fmt::Debug for TaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProgress")
            .field("submitted", &self.submitted())
            .field("completed", &self.completed())
            .finish()
    }
}

/// Pending result of a submitted task
#[derive(Debug)]
pub struct TaskHandle<R> {
    task_no: usize,
    receiver: Receiver<Result<R>>,
}

impl<R> TaskHandle<R> {
    /// Submission index
    pub fn task_no(&self) -> usize {
        self.task_no
    }

    /// Block until the task reports
    pub fn wait(self) -> Result<R> {
        self.receiver
            .recv()
            .map_err(|_| ScenarioError::partition(self.task_no, "task ended without reporting a result"))?
    }
}

// ─────────────────────────────────────────────
// 3. TaskExecutor
// ─────────────────────────────────────────────

/// A unit of work handed to a backend
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Backend running submitted jobs
pub trait TaskExecutor: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Run a job, now or later
    fn spawn(&self, job: Job);

    /// Shared progress counters
    fn progress(&self) -> Arc<TaskProgress>;

    /// Jobs that can run at the same time; the default block count
    fn num_workers(&self) -> usize {
        1
    }

    /// Mark a task as finished
    fn signal_complete(&self, task_no: usize, ok: bool) {
        self.progress().signal_complete(task_no, ok);
    }
}

/// Typed submission on top of [`TaskExecutor::spawn`]
pub trait TaskExecutorExt: TaskExecutor {
    /// Submit a fallible task; panics become partition failures
    fn submit<R, F>(&self, task_no: usize, task: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let (sender, receiver) = channel::bounded(1);
        let progress = self.progress();
        progress.record_submitted();

        self.spawn(Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(ScenarioError::Partition { message, .. })) => Err(ScenarioError::partition(task_no, message)),
                Ok(Err(err)) => Err(ScenarioError::partition(task_no, err.to_string())),
                Err(payload) => Err(ScenarioError::partition(task_no, panic_message(payload.as_ref()))),
            };
            progress.signal_complete(task_no, result.is_ok());
            // the caller stops listening after an earlier failure
            let _ = sender.send(result);
        }));

        TaskHandle { task_no, receiver }
    }
}

impl<E: TaskExecutor + ?Sized> TaskExecutorExt for E {}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Runs every job on the submitting thread
#[derive(Debug, Default)]
pub struct InlineExecutor {
    progress: Arc<TaskProgress>,
}

impl InlineExecutor {
    /// Create an inline executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline executor feeding partition metrics
    pub fn with_metrics(metrics: Arc<ScenarioMetrics>) -> Self {
        Self::sharing(Arc::new(TaskProgress::with_metrics(metrics)))
    }

    /// Inline executor reporting to existing counters
    pub fn sharing(progress: Arc<TaskProgress>) -> Self {
        Self { progress }
    }
}

impl TaskExecutor for InlineExecutor {
    fn name(&self) -> &str {
        "inline"
    }

    fn spawn(&self, job: Job) {
        job()
    }

    fn progress(&self) -> Arc<TaskProgress> {
        Arc::clone(&self.progress)
    }
}

/// Runs jobs on a dedicated rayon thread pool
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
    progress: Arc<TaskProgress>,
}

impl RayonExecutor {
    /// Pool with `num_threads` workers; 0 lets rayon decide
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::build(num_threads, TaskProgress::default())
    }

    /// Pool feeding partition metrics
    pub fn with_metrics(num_threads: usize, metrics: Arc<ScenarioMetrics>) -> Result<Self> {
        Self::build(num_threads, TaskProgress::with_metrics(metrics))
    }

    fn build(num_threads: usize, progress: TaskProgress) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("scenario-worker-{}", i))
            .build()
            .map_err(|e| ScenarioError::internal(format!("failed to build thread pool: {}", e)))?;
        Ok(Self {
            pool,
            progress: Arc::new(progress),
        })
    }

    /// Number of worker threads
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for RayonExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonExecutor")
            .field("num_threads", &self.num_threads())
            .field("progress", &self.progress)
            .finish()
    }
}

impl TaskExecutor for RayonExecutor {
    fn name(&self) -> &str {
        "rayon"
    }

    fn spawn(&self, job: Job) {
        self.pool.spawn(job)
    }

    fn progress(&self) -> Arc<TaskProgress> {
        Arc::clone(&self.progress)
    }

    fn num_workers(&self) -> usize {
        self.num_threads()
    }
}

// ─────────────────────────────────────────────
// 4. apply_reduce
// ─────────────────────────────────────────────

/// Split `items` into weight-balanced blocks, run `task` on every item of
/// each block with the shared `args`, and fold the partial results into `acc`
/// with `agg`.
///
/// Each block returns its partials tagged with the items' input positions.
/// The partials are folded in ascending input position, so the result is
/// bit-identical for every `concurrent_tasks` and completion order.
///
/// A single block runs on the calling thread, still reporting to the
/// executor's progress counters. Otherwise the blocks go to `executor`. The
/// first failing block in submission order aborts the reduction and the
/// accumulator is discarded.
#[allow(clippy::too_many_arguments)]
pub fn apply_reduce<T, A, R, K, F, G, KF, WF, E>(
    task: F,
    items: Vec<T>,
    args: Arc<A>,
    mut agg: G,
    acc: R,
    key: KF,
    weight: WF,
    concurrent_tasks: usize,
    executor: &E,
) -> Result<R>
where
    T: Send + Sync + 'static,
    A: Send + Sync + ?Sized + 'static,
    R: Send + 'static,
    K: Ord,
    F: Fn(&[T], &A) -> Result<R> + Send + Sync + 'static,
    G: FnMut(R, R) -> Result<R>,
    KF: Fn(&T) -> K,
    WF: Fn(&T) -> f64,
    E: TaskExecutor + ?Sized,
{
    if items.is_empty() {
        return Ok(acc);
    }

    let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
    let mut blocks = split_in_blocks(indexed, concurrent_tasks, |(_, it)| key(it), |(_, it)| weight(it))?;
    let task = Arc::new(task);

    let mut partials: Vec<(usize, R)> = if blocks.len() == 1 {
        let block = blocks.remove(0);
        debug!(items = block.len(), "Single block, running inline");
        InlineExecutor::sharing(executor.progress())
            .submit(0, move || run_block(task.as_ref(), &block, args.as_ref()))
            .wait()?
    } else {
        info!(
            blocks = blocks.len(),
            executor = executor.name(),
            "Submitting {} tasks",
            blocks.len()
        );

        let handles: Vec<TaskHandle<Vec<(usize, R)>>> = blocks
            .into_iter()
            .enumerate()
            .map(|(task_no, block)| {
                let task = Arc::clone(&task);
                let args = Arc::clone(&args);
                executor.submit(task_no, move || run_block(task.as_ref(), &block, args.as_ref()))
            })
            .collect();

        let mut partials = Vec::new();
        for handle in handles {
            let task_no = handle.task_no();
            match handle.wait() {
                Ok(block_partials) => partials.extend(block_partials),
                Err(err) => {
                    warn!(task_no, error = %err, "Partition failed, aborting reduction");
                    return Err(err);
                }
            }
        }
        partials
    };

    partials.sort_unstable_by_key(|(index, _)| *index);
    partials
        .into_iter()
        .try_fold(acc, |acc, (_, partial)| agg(acc, partial))
}

/// Partial result of every item of a block, tagged with its input position
fn run_block<T, A, R, F>(task: &F, block: &[(usize, T)], args: &A) -> Result<Vec<(usize, R)>>
where
    A: ?Sized,
    F: Fn(&[T], &A) -> Result<R>,
{
    block
        .iter()
        .map(|(index, item)| Ok((*index, task(std::slice::from_ref(item), args)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: &'static str,
        weight: f64,
        value: i64,
    }

    fn items() -> Vec<Item> {
        (0..20)
            .map(|i| Item {
                key: if i % 3 == 0 { "b" } else { "a" },
                weight: (i % 4 + 1) as f64,
                value: i,
            })
            .collect()
    }

    fn sum_values(block: &[Item], offset: &i64) -> Result<i64> {
        Ok(block.iter().map(|it| it.value + offset).sum())
    }

    fn add(a: i64, b: i64) -> Result<i64> {
        Ok(a + b)
    }

    #[test]
    fn test_split_conserves_items_and_weight() {
        let blocks = split_in_blocks(items(), 4, |it| it.key, |it| it.weight).unwrap();
        let total: f64 = blocks.iter().flatten().map(|it| it.weight).sum();
        let count: usize = blocks.iter().map(Vec::len).sum();
        assert_eq!(count, 20);
        assert_eq!(total, items().iter().map(|it| it.weight).sum::<f64>());
    }

    #[test]
    fn test_split_respects_keys_and_max_weight() {
        let blocks = split_in_blocks(items(), 4, |it| it.key, |it| it.weight).unwrap();
        // total weight 50 -> max 13 per block
        for block in &blocks {
            assert!(block.iter().all(|it| it.key == block[0].key));
            assert!(block.iter().map(|it| it.weight).sum::<f64>() <= 13.0);
        }
    }

    #[test]
    fn test_split_oversized_item_alone() {
        let items = vec![1.0, 10.0, 1.0];
        let blocks = split_in_blocks(items, 3, |_| 0, |w| *w).unwrap();
        // max weight ceil(12 / 3) = 4
        assert_eq!(blocks, vec![vec![1.0, 1.0], vec![10.0]]);
    }

    #[test]
    fn test_split_rejects_negative_weight() {
        let err = split_in_blocks(vec![1.0, -2.0], 2, |_| 0, |w| *w).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidWeight { .. }));
    }

    #[test]
    fn test_partition_invariance() {
        let expected: i64 = (0..20).map(|v| v + 1).sum();
        let pool = RayonExecutor::new(4).unwrap();
        for hint in [1, 2, 5, 20] {
            let inline = apply_reduce(sum_values, items(), Arc::new(1), add, 0, |it| it.key, |it| it.weight, hint, &InlineExecutor::new())
                .unwrap();
            let rayon = apply_reduce(sum_values, items(), Arc::new(1), add, 0, |it| it.key, |it| it.weight, hint, &pool)
                .unwrap();
            assert_eq!(inline, expected, "hint {}", hint);
            assert_eq!(rayon, expected, "hint {}", hint);
        }
    }

    fn sum_floats(block: &[f64], _: &()) -> Result<f64> {
        Ok(block.iter().sum())
    }

    #[test]
    fn test_float_sums_identical_for_any_partitioning() {
        // magnitudes far apart, so regrouping the sum changes the last bits
        let values: Vec<f64> = (0..200).map(|i| 0.1 * i as f64 + 1e6 * ((i % 7) as f64) + 1e-7).collect();
        let run = |hint: usize, executor: &dyn TaskExecutor| {
            apply_reduce(sum_floats, values.clone(), Arc::new(()), add_floats, 0.0, |_| 0, |_| 1.0, hint, executor)
                .unwrap()
        };
        let reference = run(1, &InlineExecutor::new());
        let pool = RayonExecutor::new(4).unwrap();
        for hint in [2, 3, 7, 64] {
            assert_eq!(run(hint, &InlineExecutor::new()).to_bits(), reference.to_bits(), "hint {}", hint);
            assert_eq!(run(hint, &pool).to_bits(), reference.to_bits(), "hint {}", hint);
        }
    }

    fn add_floats(a: f64, b: f64) -> Result<f64> {
        Ok(a + b)
    }

    #[test]
    fn test_single_block_reports_progress() {
        let metrics = Arc::new(ScenarioMetrics::new().unwrap());
        let executor = InlineExecutor::with_metrics(metrics.clone());
        let out = apply_reduce(sum_values, items(), Arc::new(0), add, 0, |_| 0, |it| it.weight, 1, &executor).unwrap();
        assert_eq!(out, (0..20).sum::<i64>());
        assert_eq!(executor.progress().submitted(), 1);
        assert_eq!(executor.progress().completed(), 1);
        assert_eq!(metrics.partitions.with_label_values(&["ok"]).get(), 1.0);
    }

    #[test]
    fn test_num_workers() {
        assert_eq!(InlineExecutor::new().num_workers(), 1);
        assert_eq!(RayonExecutor::new(3).unwrap().num_workers(), 3);
    }

    #[test]
    fn test_empty_items_return_accumulator() {
        let out = apply_reduce(sum_values, Vec::new(), Arc::new(0), add, 7, |it| it.key, |it| it.weight, 4, &InlineExecutor::new())
            .unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn test_panic_becomes_partition_failure() {
        let pool = RayonExecutor::new(2).unwrap();
        let err = apply_reduce(
            |block: &[Item], _: &()| -> Result<i64> {
                if block.iter().any(|it| it.value == 7) {
                    panic!("bad block");
                }
                Ok(0)
            },
            items(),
            Arc::new(()),
            add,
            0,
            |it| it.key,
            |it| it.weight,
            5,
            &pool,
        )
        .unwrap_err();
        match err {
            ScenarioError::Partition { message, .. } => assert!(message.contains("bad block")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_aborts_reduction() {
        let err = apply_reduce(
            |_: &[Item], _: &()| -> Result<i64> { Err(ScenarioError::model("no function")) },
            items(),
            Arc::new(()),
            add,
            0,
            |it| it.key,
            |it| it.weight,
            3,
            &InlineExecutor::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Partition { index: 0, .. }));
    }

    #[test]
    fn test_progress_counts_tasks() {
        let executor = InlineExecutor::new();
        let handles: Vec<_> = (0..3).map(|i| executor.submit(i, move || Ok(i))).collect();
        let results: Vec<usize> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![0, 1, 2]);
        assert_eq!(executor.progress().submitted(), 3);
        assert_eq!(executor.progress().completed(), 3);
    }

    #[test]
    fn test_partition_metrics() {
        let metrics = Arc::new(ScenarioMetrics::new().unwrap());
        let executor = InlineExecutor::with_metrics(metrics.clone());
        let _ = executor.submit(0, || Ok(1)).wait();
        let _ = executor.submit(1, || -> Result<i32> { Err(ScenarioError::internal("x")) }).wait();
        assert_eq!(metrics.partitions.with_label_values(&["ok"]).get(), 1.0);
        assert_eq!(metrics.partitions.with_label_values(&["failed"]).get(), 1.0);
    }
}
