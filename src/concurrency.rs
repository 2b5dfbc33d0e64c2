//! ConcurrencyCore: bounded parallel fan-out, combined cancellation, and
//! work-queue traversal.
//!
//! Grounded directly on `ReviewExecutor::execute`'s `JoinSet` + cancellation
//! race: a `JoinSet` tracks in-flight tasks, a `CancellationToken` is handed
//! to each, and `tokio::select! { biased; ... }` races task completion
//! against a deadline timer. What was model-id tagging there (`task_model_map`)
//! becomes input-index tagging here, since fan-out items are generic.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, FsError};

pub const PARALLEL_CONCURRENCY: usize = 8;

/// Races `fut` against `signal`; if the signal fires first, the future is
/// dropped (closing whatever it held open) and a normalized abort error is
/// returned instead of the future's own result. The closed `ErrorCode` set
/// has no dedicated abort code, so a caller-initiated abort and a deadline
/// both surface as `ETimeout` — the operation didn't complete in the scope
/// it was given, one way or another.
pub async fn with_abort<T>(
    fut: impl Future<Output = Result<T, FsError>>,
    signal: CancellationToken,
) -> Result<T, FsError> {
    tokio::select! {
        biased;
        result = fut => result,
        _ = signal.cancelled() => Err(FsError::new(ErrorCode::ETimeout, "operation aborted by cancellation signal")),
    }
}

/// A token triggered by either a caller signal or a deadline timer. Fires
/// once; `cleanup` (dropping the guard) is always safe to call, including
/// more than once, matching the idempotence requirement.
pub struct CombinedCancellation {
    pub token: CancellationToken,
    deadline_task: Option<tokio::task::JoinHandle<()>>,
}

impl CombinedCancellation {
    pub fn new(caller_signal: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        let token = CancellationToken::new();
        if let Some(signal) = caller_signal {
            let child = token.clone();
            tokio::spawn(async move {
                signal.cancelled().await;
                child.cancel();
            });
        }
        let deadline_task = timeout.map(|dur| {
            let child = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(dur).await;
                child.cancel();
            })
        });
        Self {
            token,
            deadline_task,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CombinedCancellation {
    fn drop(&mut self) {
        if let Some(handle) = self.deadline_task.take() {
            handle.abort();
        }
    }
}

/// Result of one `process_in_parallel` fan-out: each output is tagged with
/// its input index so order can be reconstructed even though in-flight tasks
/// complete in arbitrary order.
pub struct ParallelResults<T> {
    pub results: Vec<(usize, T)>,
    pub errors: Vec<(usize, String)>,
}

/// Fan out `f(item)` across at most `concurrency` in-flight tasks. Errors are
/// collected per-index rather than aborting the batch; cancellation via
/// `signal` stops scheduling new work and causes in-flight tasks to wind
/// down without further mutation once they observe it.
pub async fn process_in_parallel<T, I, F, Fut>(
    items: Vec<I>,
    f: F,
    concurrency: usize,
    signal: CancellationToken,
) -> ParallelResults<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut set: JoinSet<(usize, Result<T, String>)> = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
        if signal.is_cancelled() {
            break;
        }
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let f = f.clone();
        let child_signal = signal.clone();
        set.spawn(async move {
            let _permit = permit;
            let result = f(item, child_signal).await;
            (idx, result)
        });
    }

    let mut results = Vec::new();
    let mut errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(value))) => results.push((idx, value)),
            Ok((idx, Err(msg))) => errors.push((idx, msg)),
            Err(join_err) => errors.push((usize::MAX, format!("task panicked: {join_err}"))),
        }
    }
    results.sort_by_key(|(idx, _)| *idx);
    ParallelResults { results, errors }
}

/// Like `process_in_parallel`, but `f` may enqueue new items as it discovers
/// them (used for directory traversal, where each directory read can yield
/// more directories to read).
pub async fn run_work_queue<T, I, F, Fut>(
    initial_items: Vec<I>,
    f: F,
    concurrency: usize,
    signal: CancellationToken,
) -> ParallelResults<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(T, Vec<I>), String>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut set: JoinSet<(usize, Result<(T, Vec<I>), String>)> = JoinSet::new();
    let mut next_idx = 0usize;
    let mut queue: Vec<I> = initial_items;
    let mut results = Vec::new();
    let mut errors = Vec::new();

    loop {
        while !queue.is_empty() && !signal.is_cancelled() {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let item = queue.remove(0);
            let idx = next_idx;
            next_idx += 1;
            let f = f.clone();
            let child_signal = signal.clone();
            set.spawn(async move {
                let _permit = permit;
                let result = f(item, child_signal).await;
                (idx, result)
            });
        }

        if set.is_empty() {
            break;
        }

        match set.join_next().await {
            Some(Ok((idx, Ok((value, mut more))))) => {
                results.push((idx, value));
                queue.append(&mut more);
            }
            Some(Ok((idx, Err(msg)))) => errors.push((idx, msg)),
            Some(Err(join_err)) => errors.push((usize::MAX, format!("task panicked: {join_err}"))),
            None => break,
        }
    }

    results.sort_by_key(|(idx, _)| *idx);
    ParallelResults { results, errors }
}
