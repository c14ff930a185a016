//! Bounded execution of external commands and injected collaborators.

use crossbeam_channel::RecvTimeoutError;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Run `command`, optionally feeding `input` on stdin, and return its stdout.
///
/// Returns `None` when the program cannot be started, exits unsuccessfully
/// or does not finish within `timeout`; a timed-out child is killed.
pub(crate) fn run_bounded(
    mut command: Command,
    input: Option<String>,
    timeout: Duration,
) -> Option<String> {
    command.stdout(Stdio::piped()).stderr(Stdio::null());
    command.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(program = %program, error = %e, "cannot start command");
            return None;
        }
    };

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe
            let _ = stdin.write_all(input.as_bytes());
        });
    }

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return None;
    };
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = stdout.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(buf)) => match child.wait() {
            Ok(status) if status.success() => Some(String::from_utf8_lossy(&buf).into_owned()),
            Ok(status) => {
                debug!(program = %program, %status, "command failed");
                None
            }
            Err(e) => {
                debug!(program = %program, error = %e, "cannot wait for command");
                None
            }
        },
        Ok(Err(e)) => {
            debug!(program = %program, error = %e, "cannot read command output");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
            warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "command timed out");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    }
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// A call that overruns is abandoned; its thread finishes in the background.
pub(crate) fn call_bounded<T, F>(label: &str, timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(collaborator = label, timeout_ms = timeout.as_millis() as u64, "call timed out");
            None
        }
    }
}
