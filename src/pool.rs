use super::{
    config::{Config, ExecutionMode},
    errors::{Error, Result, TaskResult},
    handle::{TaskHandle, TaskState, TaskStatus},
    logger::{lock, Logger},
    model::{GroupMetrics, PoolMetrics},
    panic_handler::run_task,
    trace,
};
use crossbeam::deque::{Injector, Steal};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    convert::Infallible,
    fmt::{self, Display},
    sync::{
        atomic::{fence, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    runtime::{Builder, Runtime},
    sync::{oneshot, Notify},
};
use tokio_util::sync::CancellationToken;

/// Group used when the caller does not name one. Always exists.
pub const DEFAULT_GROUP: &str = "default";

/// Sleep between two completion checks in [`TaskPool::wait`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Captured by a job's closure. If the closure is dropped before it ran to the
/// end (abandoned in the queue, cancelled on the blocking pool at shutdown),
/// the task still reaches `Failed`.
struct FinishGuard {
    status: Arc<TaskStatus>,
    shared: Arc<Shared>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.status.finish(false) {
            self.shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// State shared between the pool and its worker loops.
struct Shared {
    inject: Injector<Job>,
    global_notify: Notify,
    cancellation_token: CancellationToken,
    idle_workers: AtomicUsize,
    queued_tasks: AtomicUsize,
    active_tasks: AtomicUsize,
    total_spawned: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            inject: Injector::new(),
            global_notify: Notify::new(),
            cancellation_token: CancellationToken::new(),
            idle_workers: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            total_spawned: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn push_job(&self, job: Job) {
        self.queued_tasks.fetch_add(1, Ordering::Relaxed);
        self.inject.push(job);

        fence(Ordering::SeqCst);
        if self.idle_workers.load(Ordering::SeqCst) > 0 {
            self.global_notify.notify_one();
        }
    }

    fn pop_job(&self) -> Option<Job> {
        loop {
            match self.inject.steal() {
                Steal::Success(job) => {
                    self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Drop every job that has not started. Their handles resolve to
    /// [`TaskError::Abandoned`](crate::errors::TaskError::Abandoned).
    fn abandon_queued(&self) -> usize {
        let mut abandoned = 0;
        while let Some(job) = self.pop_job() {
            drop(job);
            abandoned += 1;
        }
        abandoned
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        'outer: loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Some(job) = self.pop_job() {
                self.active_tasks.fetch_add(1, Ordering::Relaxed);
                // Задача блокирующая: выполняем вне потоков рантайма
                if let Err(join_err) = tokio::task::spawn_blocking(job).await {
                    tracing::error!(worker = id, error = %join_err, "task runner did not finish");
                }
                self.active_tasks.fetch_sub(1, Ordering::Relaxed);
                continue;
            }

            self.idle_workers.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);

            for _ in 0..2 {
                if !self.inject.is_empty() {
                    self.idle_workers.fetch_sub(1, Ordering::SeqCst);
                    continue 'outer;
                }
                std::hint::spin_loop();
            }

            tokio::select! {
                _ = self.global_notify.notified() => {
                    self.idle_workers.fetch_sub(1, Ordering::SeqCst);
                }
                _ = self.cancellation_token.cancelled() => {
                    self.idle_workers.fetch_sub(1, Ordering::SeqCst);
                    break 'outer;
                }
            }
        }
        tracing::debug!(worker = id, "worker stopped");
    }
}

/// Fixed-size pool that runs submitted work in the background and tracks it
/// under named groups.
///
/// Work runs on threads or, in [`ExecutionMode::Process`], in forked child
/// processes. A failed task is reported once on the logger's critical channel
/// and its error stays available through its [`TaskHandle`].
pub struct TaskPool {
    shared: Arc<Shared>,
    groups: Mutex<HashMap<String, Vec<Arc<TaskStatus>>>>,
    runtime: Mutex<Option<Runtime>>,
    logger: Arc<Logger>,
    mode: ExecutionMode,
    workers: usize,
}

impl TaskPool {
    pub fn new(config: &Config, logger: Arc<Logger>) -> Result<Self> {
        config.validate()?;
        let workers = config.max_workers;

        // Worker loops only dispatch; jobs run on the blocking pool, at most
        // one per loop.
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("logpool-worker")
            .enable_all()
            .build()?;

        let shared = Arc::new(Shared::new());

        // Запускаем воркеры
        for id in 0..workers {
            runtime.spawn(shared.clone().worker_loop(id));
        }

        let mut groups = HashMap::new();
        groups.insert(DEFAULT_GROUP.to_string(), Vec::new());

        tracing::debug!(workers, mode = ?config.mode, "task pool started");

        Ok(Self {
            shared,
            groups: Mutex::new(groups),
            runtime: Mutex::new(Some(runtime)),
            logger,
            mode: config.mode,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Schedule fallible work under `group` and return without blocking.
    ///
    /// `Err(e)` from `f`, or a panic, marks the task failed. `T` must be
    /// serializable because in process mode the result crosses a process
    /// boundary; a value that fails to encode surfaces as
    /// [`TaskError::Serialization`](crate::errors::TaskError::Serialization).
    pub fn submit<F, T, E>(&self, group: &str, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + 'static,
    {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let status = Arc::new(TaskStatus::new());
        let (tx, rx) = oneshot::channel::<TaskResult<T>>();

        let mode = self.mode;
        let logger = self.logger.clone();
        let guard = FinishGuard {
            status: status.clone(),
            shared: self.shared.clone(),
        };

        let job: Job = Box::new(move || {
            let guard = guard;
            guard.status.start();
            let outcome = match mode {
                ExecutionMode::Thread => run_task(f),
                #[cfg(unix)]
                ExecutionMode::Process => crate::process::run_forked(f),
                #[cfg(not(unix))]
                ExecutionMode::Process => Err(crate::errors::TaskError::Process(
                    "process mode requires a unix host".to_string(),
                )),
            };

            let ok = match &outcome {
                Ok(_) => {
                    guard.shared.completed_tasks.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(err) => {
                    guard.shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
                    logger.critical(trace::render_failure(err));
                    false
                }
            };

            let _ = tx.send(outcome);
            guard.status.finish(ok);
        });

        // Группа пополняется до постановки в очередь: wait() видит задачу сразу
        lock(&self.groups)
            .entry(group.to_string())
            .or_default()
            .push(status.clone());
        self.shared.total_spawned.fetch_add(1, Ordering::Relaxed);
        self.shared.push_job(job);

        // Shut down between the check above and the push.
        if self.is_shut_down() {
            self.shared.abandon_queued();
        }

        Ok(TaskHandle::new(status, rx))
    }

    /// Schedule infallible work; only a panic fails it.
    pub fn execute<F, T>(&self, group: &str, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.submit(group, move || Ok::<T, Infallible>(f()))
    }

    /// Block until every task that is in `group` right now has finished.
    ///
    /// Polls every [`POLL_INTERVAL`]. Tasks submitted to the group after the
    /// call are not awaited. An unknown group returns immediately. Calling
    /// this from a task of the same group never returns.
    pub fn wait(&self, group: &str) {
        if let Some(snapshot) = self.snapshot(group) {
            poll_until_done(&snapshot);
        }
    }

    /// Block until every task present in any group has finished.
    pub fn wait_all(&self) {
        let snapshot: Vec<_> = lock(&self.groups).values().flatten().cloned().collect();
        poll_until_done(&snapshot);
    }

    /// Done flags of the tasks in `group`, in submission order.
    pub fn get_queue(&self, group: &str) -> Result<Vec<bool>> {
        let snapshot = self
            .snapshot(group)
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        Ok(snapshot.iter().map(|s| s.get().is_done()).collect())
    }

    /// Names of all groups, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.groups).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn group_metrics(&self, group: &str) -> Result<GroupMetrics> {
        let snapshot = self
            .snapshot(group)
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let mut metrics = GroupMetrics {
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
        };
        for status in &snapshot {
            match status.get() {
                TaskState::Pending => metrics.pending += 1,
                TaskState::Running => metrics.running += 1,
                TaskState::Completed => metrics.completed += 1,
                TaskState::Failed => metrics.failed += 1,
            }
        }
        Ok(metrics)
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.workers,
            active_tasks: self.shared.active_tasks.load(Ordering::Relaxed),
            idle_workers: self.shared.idle_workers.load(Ordering::Relaxed),
            queued_tasks: self.shared.queued_tasks.load(Ordering::Relaxed),
            total_spawned: self.shared.total_spawned.load(Ordering::Relaxed),
            completed_tasks: self.shared.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(Ordering::Relaxed),
        }
    }

    /// Мониторинг метрик с callback
    /// Вызовите token.cancel() для остановки мониторинга
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> Result<CancellationToken>
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let guard = lock(&self.runtime);
        let runtime = guard.as_ref().ok_or(Error::ShutDown)?;

        let shared = self.shared.clone();
        let workers = self.workers;
        let token = self.shared.cancellation_token.child_token();
        let token_clone = token.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(PoolMetrics {
                            workers,
                            active_tasks: shared.active_tasks.load(Ordering::Relaxed),
                            idle_workers: shared.idle_workers.load(Ordering::Relaxed),
                            queued_tasks: shared.queued_tasks.load(Ordering::Relaxed),
                            total_spawned: shared.total_spawned.load(Ordering::Relaxed),
                            completed_tasks: shared.completed_tasks.load(Ordering::Relaxed),
                            failed_tasks: shared.failed_tasks.load(Ordering::Relaxed),
                        });
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        Ok(token)
    }

    /// Stop accepting work and release the workers without waiting.
    ///
    /// Queued tasks that have not started are abandoned. Running tasks finish
    /// on their own threads and still deliver their results.
    pub fn shutdown(&self) {
        self.shared.cancellation_token.cancel();
        let abandoned = self.shared.abandon_queued();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
            tracing::debug!(abandoned, "task pool shut down");
        }
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shared.cancellation_token.is_cancelled()
    }

    fn snapshot(&self, group: &str) -> Option<Vec<Arc<TaskStatus>>> {
        lock(&self.groups).get(group).cloned()
    }
}

fn poll_until_done(snapshot: &[Arc<TaskStatus>]) {
    while snapshot.iter().any(|s| !s.get().is_done()) {
        std::thread::sleep(POLL_INTERVAL);
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers)
            .field("mode", &self.mode)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
