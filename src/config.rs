use crate::errors::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

const ENV_LOG_FILE: &str = "LOGPOOL_LOG_FILE";
const ENV_DEBUG: &str = "LOGPOOL_DEBUG";
const ENV_WORKERS: &str = "LOGPOOL_WORKERS";
const ENV_MODE: &str = "LOGPOOL_MODE";

/// Где выполняются задачи пула.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Worker threads inside this process.
    #[default]
    Thread,
    /// Every task runs in a forked child process. Results cross the process
    /// boundary through `bincode`, so they must be serializable.
    Process,
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" | "threads" => Ok(ExecutionMode::Thread),
            "process" | "processes" => Ok(ExecutionMode::Process),
            other => Err(Error::config(format!("unknown execution mode `{other}`"))),
        }
    }
}

/// External sink invoked with every emitted line.
#[derive(Clone)]
pub struct LogCallback(Arc<dyn Fn(&str) + Send + Sync>);

impl LogCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[inline]
    pub(crate) fn call(&self, line: &str) {
        (self.0)(line)
    }
}

impl fmt::Debug for LogCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogCallback(..)")
    }
}

/// Конфигурация логгера и пула
#[derive(Debug, Clone)]
pub struct Config {
    pub log_file: Option<PathBuf>,
    pub print_log: bool,
    pub debug: bool,
    pub max_workers: usize,
    pub mode: ExecutionMode,
    pub keep_in_memory: bool,
    pub simple_log: bool,
    pub callback: Option<LogCallback>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: None,
            print_log: true,
            debug: false,
            max_workers: default_workers(),
            mode: ExecutionMode::Thread,
            keep_in_memory: false,
            simple_log: false,
            callback: None,
        }
    }
}

/// Logical CPUs minus two, but never less than one worker.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

impl Config {
    /// Settings of the process-wide instance: console echo and debug output on.
    pub fn global_default() -> Self {
        Self {
            debug: true,
            ..Default::default()
        }
    }

    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn print_log(mut self, enabled: bool) -> Self {
        self.print_log = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn keep_in_memory(mut self, enabled: bool) -> Self {
        self.keep_in_memory = enabled;
        self
    }

    pub fn simple_log(mut self, enabled: bool) -> Self {
        self.simple_log = enabled;
        self
    }

    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callback = Some(LogCallback::new(f));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("need at least 1 worker"));
        }
        if self.mode == ExecutionMode::Process && !cfg!(unix) {
            return Err(Error::config("process mode requires a unix host"));
        }
        Ok(())
    }

    /// Apply `LOGPOOL_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Values that do not parse are ignored.
    pub fn apply_env<L>(mut self, lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_LOG_FILE).filter(|p| !p.is_empty()) {
            self.log_file = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_DEBUG) {
            match parse_flag(&raw) {
                Some(flag) => self.debug = flag,
                None => tracing::warn!("ignoring {ENV_DEBUG}={raw}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_workers = n,
                _ => tracing::warn!("ignoring {ENV_WORKERS}={raw}: expected a positive integer"),
            }
        }
        if let Some(raw) = lookup(ENV_MODE) {
            match raw.parse::<ExecutionMode>() {
                Ok(mode) => self.mode = mode,
                Err(e) => tracing::warn!("ignoring {ENV_MODE}={raw}: {e}"),
            }
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.log_file.is_none());
        assert!(config.print_log);
        assert!(!config.debug);
        assert!(config.max_workers >= 1);
        assert_eq!(config.mode, ExecutionMode::Thread);
        assert!(!config.keep_in_memory);
        assert!(!config.simple_log);
        assert!(config.callback.is_none());
        assert!(Config::global_default().debug);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::default().max_workers(0).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LOGPOOL_LOG_FILE", "/tmp/app.log"),
            ("LOGPOOL_DEBUG", "on"),
            ("LOGPOOL_WORKERS", "3"),
            ("LOGPOOL_MODE", "Process"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/app.log")));
        assert!(config.debug);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.mode, ExecutionMode::Process);
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let config = Config::default()
            .max_workers(5)
            .apply_env(|k| match k {
                "LOGPOOL_WORKERS" => Some("0".into()),
                "LOGPOOL_DEBUG" => Some("maybe".into()),
                "LOGPOOL_MODE" => Some("fiber".into()),
                _ => None,
            });
        assert_eq!(config.max_workers, 5);
        assert!(!config.debug);
        assert_eq!(config.mode, ExecutionMode::Thread);
    }
}
