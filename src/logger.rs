use crate::config::{Config, LogCallback};
use crate::console::Console;
use crate::errors::{Error, Result};
use crate::fmt;
use crate::record::{short_type_name, Level, Location, Record};
use crate::thread;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Leveled logger with console, file, memory and callback sinks.
///
/// Appends to the log file are serialized by one lock, held for a single
/// line, so concurrent writers never interleave within a line.
#[derive(Debug)]
pub struct Logger {
    log_file: Option<PathBuf>,
    console: Option<Console>,
    debug: bool,
    keep_in_memory: bool,
    simple_log: bool,
    callback: Option<LogCallback>,
    file_lock: Mutex<()>,
    memory: Mutex<Vec<String>>,
}

impl Logger {
    /// Create a logger. A configured log file is created if it does not exist.
    pub fn new(config: &Config) -> Result<Self> {
        if let Some(path) = &config.log_file {
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(Self {
            log_file: config.log_file.clone(),
            console: config.print_log.then(Console::default),
            debug: config.debug,
            keep_in_memory: config.keep_in_memory,
            simple_log: config.simple_log,
            callback: config.callback.clone(),
            file_lock: Mutex::new(()),
            memory: Mutex::new(Vec::new()),
        })
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn info(&self, location: Location, content: impl Display) {
        self.log(Level::Info, Some(&location), content);
    }

    pub fn warn(&self, location: Location, content: impl Display) {
        self.log(Level::Warning, Some(&location), content);
    }

    /// No-op unless debug output is enabled.
    pub fn debug(&self, location: Location, content: impl Display) {
        self.log(Level::Debug, Some(&location), content);
    }

    /// Critical lines carry the OS thread id instead of a call site.
    pub fn critical(&self, content: impl Display) {
        self.log(Level::Critical, None, content);
    }

    pub fn time(&self, content: impl Display) {
        self.log(Level::Time, None, content);
    }

    /// Format one record and hand it to every enabled sink.
    pub fn log(&self, level: Level, location: Option<&Location>, content: impl Display) {
        if level == Level::Debug && !self.debug {
            return;
        }

        let message = content.to_string();
        let record = Record::new(level, location, thread::id(), &message);
        let line = fmt::format(&record, self.simple_log);

        if let Some(console) = &self.console {
            console.write(level, &line);
        }

        if self.keep_in_memory {
            lock(&self.memory).push(line.clone());
        }

        if let Some(path) = &self.log_file {
            if let Err(e) = self.append(path, &line) {
                tracing::warn!(path = %path.display(), error = %e, "failed to append log line");
            }
        }

        if let Some(callback) = &self.callback {
            callback.call(&line);
        }
    }

    fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        // One write per line: O_APPEND keeps lines whole even across processes.
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let _guard = lock(&self.file_lock);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(buf.as_bytes())
    }

    fn require_file(&self) -> Result<&Path> {
        self.log_file.as_deref().ok_or(Error::NoLogFile)
    }

    /// Lines of the log file, in file order, without line terminators.
    pub fn get_logs(&self) -> Result<Vec<String>> {
        let path = self.require_file()?;
        let _guard = lock(&self.file_lock);
        let file = File::open(path)?;
        let lines = BufReader::new(file).lines().collect::<std::io::Result<Vec<_>>>()?;
        Ok(lines)
    }

    /// Truncate the log file.
    pub fn clear_logs(&self) -> Result<()> {
        let path = self.require_file()?;
        let _guard = lock(&self.file_lock);
        File::create(path)?;
        Ok(())
    }

    /// Copy the log file to `destination`, then truncate it.
    ///
    /// Both steps run under the file lock, so no line is lost in between.
    pub fn finish_log<P: AsRef<Path>>(&self, destination: P) -> Result<()> {
        let path = self.require_file()?;
        let _guard = lock(&self.file_lock);
        fs::copy(path, destination.as_ref())?;
        File::create(path)?;
        Ok(())
    }

    /// Lines retained in memory, in emission order. Empty unless
    /// `keep_in_memory` is set.
    pub fn memory(&self) -> Vec<String> {
        lock(&self.memory).clone()
    }

    pub fn clear_memory(&self) {
        lock(&self.memory).clear();
    }

    /// Wrap `f` so that every call logs its wall-clock duration at `time` level.
    ///
    /// The name in the message is the short type name of `F`, which for a
    /// function item is the function's own name. Functions of several
    /// arguments take them as a tuple.
    pub fn timer<'a, F, A, R>(&'a self, mut f: F) -> impl FnMut(A) -> R + 'a
    where
        F: FnMut(A) -> R + 'a,
    {
        let name = short_type_name::<F>();
        move |args| {
            let start = Instant::now();
            let result = f(args);
            self.report_elapsed(name, start);
            result
        }
    }

    /// Run `f` once and log its duration under `name`.
    pub fn timed<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.report_elapsed(name, start);
        result
    }

    fn report_elapsed(&self, name: &str, start: Instant) {
        let secs = start.elapsed().as_secs_f64();
        self.time(format_args!("{name}() executed in {secs:.4}s"));
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location;
    use std::sync::Arc;

    fn quiet() -> Config {
        Config::default().print_log(false)
    }

    #[test]
    fn memory_keeps_emission_order() {
        let logger = Logger::new(&quiet().keep_in_memory(true).simple_log(true)).unwrap();
        logger.info(location!(), "one");
        logger.warn(location!(), "two");
        logger.debug(location!(), "hidden");
        assert_eq!(logger.memory(), vec!["[info] - one", "[warning] - two"]);

        logger.clear_memory();
        assert!(logger.memory().is_empty());
    }

    #[test]
    fn debug_only_when_enabled() {
        let logger = Logger::new(&quiet().keep_in_memory(true).debug(true)).unwrap();
        logger.debug(location!(), "visible");
        let lines = logger.memory();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[debug] - logger.rs - debug_only_when_enabled() - visible"));
    }

    #[test]
    fn callback_receives_final_line() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger = Logger::new(
            &quiet()
                .simple_log(true)
                .callback(move |line| sink.lock().unwrap().push(line.to_string())),
        )
        .unwrap();

        logger.info(location!(), 42);
        assert_eq!(*seen.lock().unwrap(), vec!["[info] - 42"]);
    }

    #[test]
    fn file_operations_need_a_file() {
        let logger = Logger::new(&quiet()).unwrap();
        assert!(matches!(logger.get_logs(), Err(Error::NoLogFile)));
        assert!(matches!(logger.clear_logs(), Err(Error::NoLogFile)));
        assert!(matches!(logger.finish_log("/tmp/never"), Err(Error::NoLogFile)));
    }

    fn compute(x: u64) -> u64 {
        x * 2
    }

    #[test]
    fn timer_reports_function_name() {
        let logger = Logger::new(&quiet().keep_in_memory(true)).unwrap();
        let mut timed_compute = logger.timer(compute);
        assert_eq!(timed_compute(21), 42);
        assert_eq!(timed_compute(1), 2);

        let lines = logger.memory();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[time] - compute() executed in "));
        assert!(lines[0].ends_with('s'));
    }

    #[test]
    fn timed_returns_result() {
        let logger = Logger::new(&quiet().keep_in_memory(true)).unwrap();
        let value = logger.timed("load", || "done");
        assert_eq!(value, "done");
        assert!(logger.memory()[0].contains("[time] - load() executed in 0.0"));
    }
}
