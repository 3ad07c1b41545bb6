// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Collecting a pseudo process and classifying how it ended

use std::future::pending;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::PseudoError;
use crate::launcher::PseudoProcess;
use crate::settings::OutcomeChecks;

/// Immutable record of a finished process that passed its checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedOutcome {
    args: Vec<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl CompletedOutcome {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Exit code, or the negated signal number for a signalled process
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }
}

/// Collect `process` to completion and apply `checks`.
///
/// Dropping the returned future kills the process, so external cancellation
/// propagates unchanged without leaking the child.
pub async fn collect_outcome(
    mut process: PseudoProcess,
    checks: &OutcomeChecks,
) -> Result<CompletedOutcome, PseudoError> {
    let args = process.args_string();
    let stdout_pipe = process.child.stdout.take();
    let stderr_pipe = process.child.stderr.take();
    let mut stop_rx = process.stop_rx.take();

    let collected = tokio::time::timeout(checks.timeout, async {
        let (status, stdout, stderr) = tokio::join!(
            wait_until_exit(&mut process.child, &mut stop_rx),
            read_stream(stdout_pipe),
            read_stream(stderr_pipe),
        );
        Ok::<_, io::Error>((status?, stdout?, stderr?))
    })
    .await;

    let (status, stdout, stderr) = match collected {
        Err(_elapsed) => {
            warn!(
                operation = "pseudo_collect_timeout",
                args = %args,
                timeout_s = checks.timeout.as_secs_f64(),
                "Killing pseudo process after timeout"
            );
            kill_and_reap(&mut process.child, &args).await;
            return Err(PseudoError::Timeout {
                args,
                timeout: checks.timeout,
            });
        }
        Ok(Err(source)) => {
            warn!(
                operation = "pseudo_collect_io",
                args = %args,
                error = %source,
                "Killing pseudo process after I/O error"
            );
            kill_and_reap(&mut process.child, &args).await;
            return Err(PseudoError::Io { args, source });
        }
        Ok(Ok(collected)) => collected,
    };

    let exit_code = exit_code(status);
    debug!(
        operation = "pseudo_collect",
        args = %args,
        exit_code,
        "Collected pseudo process"
    );
    classify(process.args, exit_code, stdout, stderr, checks)
}

fn classify(
    args: Vec<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
    checks: &OutcomeChecks,
) -> Result<CompletedOutcome, PseudoError> {
    if let Some(allowed) = &checks.allowed_exit_codes {
        if !allowed.contains(&exit_code) {
            return Err(PseudoError::Process {
                args: args.join(" "),
                code: exit_code,
                allowed: allowed.clone(),
                stderr,
            });
        }
    }

    if checks.require_empty_stderr && !stderr.is_empty() {
        return Err(PseudoError::NonEmptyStderr {
            args: args.join(" "),
            stderr,
        });
    }

    if checks.require_empty_stdout && !stdout.is_empty() {
        return Err(PseudoError::NonEmptyStdout {
            args: args.join(" "),
            stdout,
        });
    }

    Ok(CompletedOutcome {
        args,
        exit_code,
        stdout,
        stderr,
    })
}

/// Wait for exit, forwarding a stop request as `SIGTERM` when one arrives
async fn wait_until_exit(
    child: &mut Child,
    stop_rx: &mut Option<oneshot::Receiver<()>>,
) -> io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = stop_requested(stop_rx) => {
                *stop_rx = None;
                terminate(child);
            }
        }
    }
}

async fn stop_requested(stop_rx: &mut Option<oneshot::Receiver<()>>) {
    match stop_rx {
        // A dropped sender counts as a request
        Some(rx) => {
            let _ = rx.await;
        }
        None => pending::<()>().await,
    }
}

fn terminate(child: &Child) {
    // id() is None once the child has been reaped, so a stale pid is never signalled
    let Some(pid) = child.id() else {
        return;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!(operation = "pseudo_terminate", pid, "Sent SIGTERM"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(operation = "pseudo_terminate", pid, error = %e, "Failed to send SIGTERM"),
    }
}

/// SIGKILL `child` and wait for it so no zombie is left behind
async fn kill_and_reap(child: &mut Child, args: &str) {
    if let Err(e) = child.kill().await {
        warn!(operation = "pseudo_kill", args = %args, error = %e, "Failed to kill pseudo process");
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Exit code with signal terminations mapped to the negated signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status.signal().map(|sig| -sig).unwrap_or(-1),
    }
}
