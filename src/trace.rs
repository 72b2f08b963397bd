use crate::errors::TaskError;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::fmt::Write;

/// Frames at and beyond the task runner belong to the pool, not to the task.
const RUNNER_FRAME: &str = "logpool::panic_handler::run_task";

const INTERNAL_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "__rust",
    "rust_begin_unwind",
    "rust_panic",
    "logpool::panic_handler::",
    "logpool::trace::",
    "logpool::pool::",
    "logpool::control::",
];

/// One resolved stack frame of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub file: String,
    pub function: String,
    pub line: u32,
}

/// Frames of the current call stack, innermost first, with runtime and
/// pool frames removed.
pub fn capture() -> Vec<TraceFrame> {
    parse(&Backtrace::force_capture().to_string())
}

/// Parse the textual form of a `std::backtrace::Backtrace`.
///
/// Frames without a source location (no debug info) are skipped.
pub fn parse(text: &str) -> Vec<TraceFrame> {
    let mut frames = Vec::new();
    let mut pending: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim_start();

        if let Some(at) = line.strip_prefix("at ") {
            let Some(function) = pending.take() else { continue };
            if function.contains(RUNNER_FRAME) {
                break;
            }
            if is_internal(function) {
                continue;
            }
            if let Some((file, line)) = split_location(at) {
                frames.push(TraceFrame {
                    file: file.to_string(),
                    function: short_function(function),
                    line,
                });
            }
            continue;
        }

        if let Some((index, name)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                if name.contains(RUNNER_FRAME) {
                    break;
                }
                pending = Some(name.trim());
            }
        }
    }
    frames
}

/// Line emitted on the critical channel for a failed task.
pub fn render_failure(err: &TaskError) -> String {
    let mut out = format!("{}: {}", err.type_name(), err.message());
    let trace = err.trace();
    if !trace.is_empty() {
        out.push_str(" -> ");
        for (i, frame) in trace.iter().enumerate() {
            let _ = write!(
                out,
                "[Trace {i}: {} - {}() - line {}]",
                frame.file, frame.function, frame.line
            );
        }
    }
    out
}

fn is_internal(function: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|p| function.starts_with(p))
}

/// `path/to/file.rs:12:5` -> (`path/to/file.rs`, 12)
fn split_location(at: &str) -> Option<(&str, u32)> {
    let mut parts = at.rsplitn(3, ':');
    let col_or_line = parts.next()?;
    let second = parts.next()?;
    match parts.next() {
        Some(file) => Some((file, second.parse().ok()?)),
        None => Some((second, col_or_line.parse().ok()?)),
    }
}

fn short_function(name: &str) -> String {
    let mut name = strip_hash(name);
    while let Some(outer) = name.strip_suffix("::{{closure}}") {
        name = outer;
    }
    name.rsplit("::").next().unwrap_or(name).to_string()
}

/// Drop a trailing `::h0123456789abcdef` symbol hash.
fn strip_hash(name: &str) -> &str {
    match name.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => {
            head
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: logpool::trace::capture
             at ./src/trace.rs:31:11
   2: core::panicking::panic_fmt
             at /rustc/abc/library/core/src/panicking.rs:72:14
   3: app::parse_header::h0123456789abcdef
             at ./src/app.rs:40:9
   4: app::load::{{closure}}
             at ./src/app.rs:12:20
   5: logpool::pool::TaskPool::execute::{{closure}}
             at ./src/pool.rs:297:28
   6: <unknown>
   7: logpool::panic_handler::run_task
             at ./src/panic_handler.rs:70:11
   8: app::main
             at ./src/main.rs:3:5
";

    #[test]
    fn parse_keeps_user_frames_innermost_first() {
        let frames = parse(SAMPLE);
        assert_eq!(
            frames,
            vec![
                TraceFrame {
                    file: "./src/app.rs".into(),
                    function: "parse_header".into(),
                    line: 40
                },
                TraceFrame {
                    file: "./src/app.rs".into(),
                    function: "load".into(),
                    line: 12
                },
            ]
        );
    }

    #[test]
    fn render_with_and_without_trace() {
        let err = TaskError::Panicked {
            message: "bad header".into(),
            location: Some("./src/app.rs:40".into()),
            trace: parse(SAMPLE),
        };
        assert_eq!(
            render_failure(&err),
            "panic: bad header -> [Trace 0: ./src/app.rs - parse_header() - line 40]\
             [Trace 1: ./src/app.rs - load() - line 12]"
        );

        let err = TaskError::Failed {
            type_name: "ParseIntError".into(),
            message: "invalid digit found in string".into(),
        };
        assert_eq!(render_failure(&err), "ParseIntError: invalid digit found in string");
    }

    #[test]
    fn location_without_column() {
        assert_eq!(split_location("src/a.rs:7"), Some(("src/a.rs", 7)));
        assert_eq!(split_location("src/a.rs:7:2"), Some(("src/a.rs", 7)));
        assert_eq!(split_location("nowhere"), None);
    }
}
