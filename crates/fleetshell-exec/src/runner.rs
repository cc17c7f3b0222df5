//! Timeout-bounded command execution on a live connection
//!
//! The session is driven on its own tokio task that writes into shared
//! buffers, while the caller races the task against the deadline. On timeout
//! the task is told to close the channel, and whatever output arrived so far
//! is returned. Only the session is torn down; the connection stays usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at};
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandResult, STATUS_UNAVAILABLE, combine_output};
use crate::transport::{Connection, Session, SessionEvent};

/// How long a timed-out session task may take to close its channel
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Output accumulated while the command runs
#[derive(Debug, Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Capture {
    fn combined(&self) -> String {
        combine_output(&self.stdout, &self.stderr)
    }
}

/// How the remote process ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Status(u32),
    Signal { signal: String, message: String },
}

/// What the session task observed
#[derive(Debug)]
enum Completion {
    Exited(Exit),
    /// Channel closed without an exit report
    MissingStatus,
    /// Task was told to stop
    Terminated,
}

/// Run `command` on `conn`, bounded by `timeout`
///
/// The deadline covers opening the session and starting the command as well
/// as waiting for it to finish.
///
/// Never fails outright: every outcome, including transport problems, is
/// reported through the returned [`CommandResult`].
#[instrument(skip_all, fields(host = %host, timeout = ?timeout))]
pub async fn run<C: Connection>(
    conn: &mut C,
    host: &str,
    command: &str,
    timeout: Duration,
) -> CommandResult {
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    let opened = match timeout_at(deadline, conn.open_session()).await {
        Ok(opened) => opened,
        Err(_) => {
            error!(timeout = ?timeout, "timed out opening session");
            return timed_out(String::new(), timeout, start);
        }
    };
    let mut session = match opened {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "failed to open session");
            return CommandResult::unavailable(
                ExecError::Session {
                    host: host.to_string(),
                    reason: e.to_string(),
                },
                start.elapsed(),
            );
        }
    };

    debug!(command = %command, timeout = ?timeout, "executing remote command");

    match timeout_at(deadline, session.exec(command)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "failed to start command");
            return CommandResult::unavailable(
                ExecError::Transport {
                    host: host.to_string(),
                    reason: e.to_string(),
                },
                start.elapsed(),
            );
        }
        Err(_) => {
            error!(command = %command, timeout = ?timeout, "timed out starting command");
            if tokio::time::timeout(TERMINATE_GRACE, session.terminate()).await.is_err() {
                warn!("session did not close in time");
            }
            return timed_out(String::new(), timeout, start);
        }
    }

    let capture = Arc::new(Mutex::new(Capture::default()));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut task: JoinHandle<Completion> =
        tokio::spawn(drive(session, Arc::clone(&capture), cancel_rx));

    let joined = tokio::select! {
        joined = &mut task => Some(joined),
        () = sleep_until(deadline) => None,
    };

    let Some(joined) = joined else {
        // Deadline elapsed: close the channel, keep what was captured
        let _ = cancel_tx.send(());
        if tokio::time::timeout(TERMINATE_GRACE, &mut task).await.is_err() {
            warn!("session did not close in time, aborting");
            task.abort();
        }
        let output = capture.lock().await.combined();
        error!(
            command = %command,
            timeout = ?timeout,
            elapsed = ?start.elapsed(),
            "command timed out"
        );
        return timed_out(output, timeout, start);
    };

    let duration = start.elapsed();
    let completion = match joined {
        Ok(completion) => completion,
        Err(e) => {
            error!(error = %e, "session task failed");
            return CommandResult::unavailable(
                ExecError::Transport {
                    host: host.to_string(),
                    reason: format!("session task failed: {e}"),
                },
                duration,
            );
        }
    };

    let output = capture.lock().await.combined();
    let result = match completion {
        Completion::Exited(Exit::Status(0)) => CommandResult::success(output, duration),
        Completion::Exited(Exit::Status(code)) => {
            let status = code.cast_signed();
            CommandResult::exited(
                output,
                status,
                ExecError::RemoteExit {
                    status,
                    signal: None,
                },
                duration,
            )
        }
        Completion::Exited(Exit::Signal { signal, message }) => {
            let status = signal_status(&signal);
            if !message.is_empty() {
                debug!(signal = %signal, message = %message, "remote process killed by signal");
            }
            CommandResult::exited(
                output,
                status,
                ExecError::RemoteExit {
                    status,
                    signal: Some(signal),
                },
                duration,
            )
        }
        Completion::MissingStatus | Completion::Terminated => CommandResult::unavailable(
            ExecError::Transport {
                host: host.to_string(),
                reason: "remote command exited without exit status or exit signal".to_string(),
            },
            duration,
        ),
    };

    debug!(
        command = %command,
        status = result.status,
        duration = ?duration,
        "remote command completed"
    );
    result
}

fn timed_out(output: String, timeout: Duration, start: Instant) -> CommandResult {
    CommandResult::exited(
        output,
        STATUS_UNAVAILABLE,
        ExecError::Timeout { timeout },
        start.elapsed(),
    )
}

/// Pump session events into `capture` until the channel closes or `cancel` fires
async fn drive<S: Session>(
    mut session: S,
    capture: Arc<Mutex<Capture>>,
    mut cancel: oneshot::Receiver<()>,
) -> Completion {
    let mut exit = None;

    loop {
        let event = tokio::select! {
            _ = &mut cancel => None,
            event = session.next_event() => Some(event),
        };

        let Some(event) = event else {
            if let Err(e) = session.terminate().await {
                warn!(error = %e, "failed to close timed-out session");
            }
            return Completion::Terminated;
        };

        match event {
            Some(SessionEvent::Stdout(data)) => capture.lock().await.stdout.extend_from_slice(&data),
            Some(SessionEvent::Stderr(data)) => capture.lock().await.stderr.extend_from_slice(&data),
            Some(SessionEvent::ExitStatus(code)) => exit = Some(Exit::Status(code)),
            Some(SessionEvent::ExitSignal { signal, message }) => {
                exit = Some(Exit::Signal { signal, message });
            }
            // exit-status commonly arrives after EOF
            Some(SessionEvent::Eof) => {}
            Some(SessionEvent::Closed) | None => break,
        }
    }

    match exit {
        Some(exit) => Completion::Exited(exit),
        None => Completion::MissingStatus,
    }
}

/// Shell-style status for a process killed by `signal`: 128 + signal number
fn signal_status(signal: &str) -> i32 {
    let number = match signal.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => 0,
    };
    128 + number
}
