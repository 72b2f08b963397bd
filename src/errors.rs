use crate::trace::TraceFrame;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Результат одной задачи пула.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Failures of pool and logger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no log file configured")]
    NoLogFile,

    #[error("unknown task group `{0}`")]
    UnknownGroup(String),

    #[error("task pool has been shut down")]
    ShutDown,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Outcome of a task that did not complete normally.
///
/// Serializable so that a task run in a child process can report its failure
/// back to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TaskError {
    /// The task returned `Err(e)`; `type_name` is the short type name of `e`.
    #[error("{type_name}: {message}")]
    Failed { type_name: String, message: String },

    #[error("panic: {message}")]
    Panicked {
        message: String,
        location: Option<String>,
        trace: Vec<TraceFrame>,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("worker process failed: {0}")]
    Process(String),

    /// The pool was shut down before the task produced a result.
    #[error("task abandoned before completion")]
    Abandoned,
}

impl TaskError {
    pub fn failed<E: std::fmt::Display>(err: &E) -> Self {
        TaskError::Failed {
            type_name: crate::record::short_type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }

    /// Name of the failure kind, as shown on the critical channel.
    pub fn type_name(&self) -> &str {
        match self {
            TaskError::Failed { type_name, .. } => type_name,
            TaskError::Panicked { .. } => "panic",
            TaskError::Serialization(_) => "SerializationError",
            TaskError::Process(_) => "ProcessError",
            TaskError::Abandoned => "Abandoned",
        }
    }

    pub fn message(&self) -> String {
        match self {
            TaskError::Failed { message, .. } | TaskError::Panicked { message, .. } => {
                message.clone()
            }
            TaskError::Serialization(m) | TaskError::Process(m) => m.clone(),
            TaskError::Abandoned => "task abandoned before completion".to_string(),
        }
    }

    pub fn trace(&self) -> &[TraceFrame] {
        match self {
            TaskError::Panicked { trace, .. } => trace,
            _ => &[],
        }
    }
}
