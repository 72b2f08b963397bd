//! Running a task in a forked child process.
//!
//! Captured arguments reach the child as part of the forked address space.
//! The outcome travels back through a pipe as one length-prefixed `bincode`
//! frame, so `T` must be serializable. The child never returns into the
//! caller's code: it exits with `_exit` right after writing its frame.
//!
//! Only the forking thread exists in the child. A task that takes a lock
//! held by another thread at fork time (stdout, the log file lock) will block
//! forever, so process-mode tasks should compute and return, not log. For the
//! same reason a panic in the child is reported with its location only: no
//! backtrace is taken there, std guards backtraces with a global lock.

use crate::errors::{TaskError, TaskResult};
use crate::panic_handler::run_task;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};

/// Run `f` in a child process and wait for its outcome.
pub fn run_forked<F, T, E>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> Result<T, E>,
    T: Serialize + DeserializeOwned,
    E: Display,
{
    // The hook must exist before fork: the child cannot wait on a lock
    // held by another thread of the parent.
    crate::panic_handler::install();
    let (read_fd, write_fd) = pipe().map_err(|e| TaskError::Process(format!("pipe: {e}")))?;

    // Safety: the child only runs the task, writes to its pipe and `_exit`s.
    match unsafe { libc::fork() } {
        -1 => {
            let err = io::Error::last_os_error();
            close(read_fd);
            close(write_fd);
            Err(TaskError::Process(format!("fork: {err}")))
        }
        0 => {
            crate::panic_handler::enter_forked_child();
            close(read_fd);
            let outcome = run_task(f);
            let frame = encode(&outcome);
            // Safety: write_fd is the open write end of our pipe, owned from here on.
            let mut out = unsafe { File::from_raw_fd(write_fd) };
            let code = match write_frame(&mut out, &frame) {
                Ok(()) => 0,
                Err(_) => 1,
            };
            drop(out);
            // Safety: terminates the child without running the parent's destructors.
            unsafe { libc::_exit(code) }
        }
        pid => {
            close(write_fd);
            // Safety: read_fd is the open read end of our pipe, owned from here on.
            let mut input = unsafe { File::from_raw_fd(read_fd) };
            let frame = read_frame(&mut input);
            drop(input);
            let status = wait_child(pid);

            match frame {
                Ok(bytes) => bincode::deserialize::<TaskResult<T>>(&bytes)
                    .unwrap_or_else(|e| Err(TaskError::Serialization(e.to_string()))),
                Err(e) => Err(TaskError::Process(format!(
                    "worker process {pid} {status} without a result: {e}"
                ))),
            }
        }
    }
}

fn encode<T: Serialize>(outcome: &TaskResult<T>) -> Vec<u8> {
    bincode::serialize(outcome).unwrap_or_else(|e| {
        let failure: TaskResult<T> = Err(TaskError::Serialization(e.to_string()));
        // The error variant holds only strings and always encodes.
        bincode::serialize(&failure).unwrap_or_default()
    })
}

fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 8];
    r.read_exact(&mut len)?;
    let len = usize::try_from(u64::from_le_bytes(len))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // Safety: fds points to two writable ints.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn close(fd: RawFd) {
    // Safety: fd is a descriptor we own and close exactly once.
    unsafe {
        libc::close(fd);
    }
}

/// Reap the child and describe how it ended.
fn wait_child(pid: libc::pid_t) -> String {
    let mut status: libc::c_int = 0;
    loop {
        // Safety: status is a valid out pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return format!("could not be reaped ({err})");
        }
        break;
    }
    if libc::WIFEXITED(status) {
        format!("exited with code {}", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        format!("was killed by signal {}", libc::WTERMSIG(status))
    } else {
        format!("ended with status {status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_comes_back_from_child() {
        let base = vec![1u64, 2, 3];
        let result = run_forked(move || Ok::<_, String>(base.iter().sum::<u64>()));
        assert_eq!(result, Ok(6));
    }

    #[test]
    fn child_error_is_reported() {
        let result: TaskResult<u8> = run_forked(|| Err("no input".to_string()));
        assert_eq!(
            result,
            Err(TaskError::Failed {
                type_name: "String".into(),
                message: "no input".into()
            })
        );
    }

    #[test]
    fn child_panic_is_reported() {
        let result: TaskResult<()> = run_forked(|| -> Result<(), String> { panic!("child down") });
        match result {
            Err(TaskError::Panicked {
                message,
                location,
                trace,
            }) => {
                assert_eq!(message, "child down");
                assert!(location.unwrap().contains("process.rs"));
                // В дочернем процессе только место паники, без backtrace
                assert_eq!(trace.len(), 1);
                assert!(trace[0].file.ends_with("process.rs"));
                assert_eq!(trace[0].function, "<unknown>");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn child_exit_without_frame() {
        let result: TaskResult<()> = run_forked(|| -> Result<(), String> {
            // Safety: test child leaves immediately.
            unsafe { libc::_exit(3) }
        });
        match result {
            Err(TaskError::Process(msg)) => assert!(msg.contains("exited with code 3")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        assert_eq!(read_frame(&mut buf.as_slice()).unwrap(), b"abc");
    }
}
