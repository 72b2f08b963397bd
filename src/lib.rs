//! Пул задач с группами и структурный логгер
//!
//! # Features
//! - Задачи в фоне на потоках или в дочерних процессах
//! - Именованные группы и ожидание группы целиком
//! - Логгер с уровнями info/warn/critical/debug/time
//! - Вывод в консоль, файл, память и callback
//! - Ошибки и паники задач уходят в critical-лог с трассой
//!
//! ```no_run
//! use logpool::{control, info};
//!
//! fn add(x: u64, y: u64) -> u64 {
//!     info!("inside add: {x} + {y}");
//!     x + y
//! }
//!
//! let ctl = control();
//! for i in 0..100u64 {
//!     ctl.execute("sum", move || add(i * i, i * 3)).unwrap();
//! }
//! ctl.wait("sum");
//! info!("finished");
//! ```

pub mod config;
mod console;
pub mod control;
pub mod errors;
pub mod fmt;
pub mod handle;
pub mod logger;
pub mod model;
pub mod panic_handler;
pub mod pool;
#[cfg(unix)]
pub mod process;
pub mod record;
mod thread;
pub mod trace;

pub use config::{Config, ExecutionMode, LogCallback};
pub use control::{control, init, reconfigure, Control};
pub use errors::{Error, Result, TaskError, TaskResult};
pub use handle::{TaskHandle, TaskState};
pub use logger::Logger;
pub use pool::{TaskPool, DEFAULT_GROUP};
pub use record::{Level, Location};

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, logger: $logger:expr, $($arg:tt)+) => {
        $logger.log($level, Some(&$crate::location!()), format_args!($($arg)+))
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::control().logger().log($level, Some(&$crate::location!()), format_args!($($arg)+))
    };
}

/// Log at `info` level with the caller's file and function.
///
/// `info!("x = {x}")` goes to the process-wide logger,
/// `info!(logger: &my_logger, "x = {x}")` to an explicit one.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Debug, $($arg)+) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_bare {
    ($level:expr, logger: $logger:expr, $($arg:tt)+) => {
        $logger.log($level, None, format_args!($($arg)+))
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::control().logger().log($level, None, format_args!($($arg)+))
    };
}

/// Log at `critical` level. The line carries the OS thread id.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => { $crate::__log_bare!($crate::Level::Critical, $($arg)+) };
}

/// Log an elapsed-time report.
#[macro_export]
macro_rules! time {
    ($($arg:tt)+) => { $crate::__log_bare!($crate::Level::Time, $($arg)+) };
}
