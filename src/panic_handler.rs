use crate::errors::{TaskError, TaskResult};
use crate::trace::{self, TraceFrame};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INSTALL: Once = Once::new();

/// Set in a forked child: the hook records only the panic location there.
static FORKED_CHILD: AtomicBool = AtomicBool::new(false);

thread_local! {
    static IN_TASK: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

struct Captured {
    location: Option<String>,
    trace: Vec<TraceFrame>,
}

/// Install the process-wide panic hook once.
///
/// Inside a pool task the hook records location and frames of the panic and
/// stays silent, the pool reports the failure on the critical channel. Any
/// other panic goes to the previously installed hook.
pub fn install() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_TASK.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}", l.file(), l.line()));
                let trace = if FORKED_CHILD.load(Ordering::Relaxed) {
                    Vec::new()
                } else {
                    trace::capture()
                };
                CAPTURED.with(|c| *c.borrow_mut() = Some(Captured { location, trace }));
            } else {
                previous(info);
            }
        }));
    });
}

/// Called right after fork in the child. Backtrace capture takes std's
/// global backtrace lock, which a parent thread may have held at fork time.
pub(crate) fn enter_forked_child() {
    FORKED_CHILD.store(true, Ordering::Relaxed);
}

/// Marks the current thread as running a task until dropped.
struct TaskScope {
    was_in_task: bool,
}

impl TaskScope {
    fn enter() -> Self {
        let was_in_task = IN_TASK.with(|flag| flag.replace(true));
        Self { was_in_task }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        IN_TASK.with(|flag| flag.set(self.was_in_task));
    }
}

/// Run one unit of work, turning `Err` and panics into a [`TaskError`].
#[inline(never)]
pub fn run_task<F, T, E>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    install();
    let outcome = {
        let _scope = TaskScope::enter();
        catch_unwind(AssertUnwindSafe(f))
    };
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::failed(&err)),
        Err(payload) => Err(panic_error(payload)),
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    };

    let captured = CAPTURED.with(|c| c.borrow_mut().take());
    let (location, mut trace) = match captured {
        Some(c) => (c.location, c.trace),
        None => (None, Vec::new()),
    };

    // Без debug info остается только место паники.
    if trace.is_empty() {
        if let Some((file, line)) = location.as_deref().and_then(|l| l.rsplit_once(':')) {
            trace.push(TraceFrame {
                file: file.to_string(),
                function: "<unknown>".to_string(),
                line: line.parse().unwrap_or_default(),
            });
        }
    }

    TaskError::Panicked {
        message,
        location,
        trace,
    }
}
