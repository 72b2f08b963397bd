use super::errors::{TaskError, TaskResult};
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU8, Ordering},
    task::{Context, Poll},
};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Lifecycle of one task. `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl TaskState {
    #[inline]
    pub fn is_done(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            _ => TaskState::Failed,
        }
    }
}

/// Status cell shared by the pool's group table, the running job and the handle.
#[derive(Debug)]
pub(crate) struct TaskStatus(AtomicU8);

impl TaskStatus {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TaskState::Pending as u8))
    }

    #[inline]
    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn start(&self) {
        let _ = self.0.compare_exchange(
            TaskState::Pending as u8,
            TaskState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Set a final state. A task that is already done keeps its state;
    /// returns `false` in that case.
    pub(crate) fn finish(&self, ok: bool) -> bool {
        let target = if ok {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (!TaskState::from_u8(cur).is_done()).then_some(target as u8)
            })
            .is_ok()
    }
}

/// Handle на задачу: состояние и результат
///
/// The handle can be joined from blocking code or awaited from async code.
pub struct TaskHandle<T> {
    status: std::sync::Arc<TaskStatus>,
    receiver: oneshot::Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        status: std::sync::Arc<TaskStatus>,
        receiver: oneshot::Receiver<TaskResult<T>>,
    ) -> Self {
        Self { status, receiver }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.status.get()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Block until the task finishes and return its outcome.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async context; `.await` the handle
    /// there instead.
    pub fn join(self) -> TaskResult<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(TaskError::Abandoned))
    }

    /// Take the outcome if the task has finished. The outcome can be taken
    /// once; later calls return `Some(Err(TaskError::Abandoned))`.
    pub fn try_join(&mut self) -> Option<TaskResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(TaskError::Abandoned)),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(TaskError::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}
