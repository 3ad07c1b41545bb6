// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Spawning pseudo invocations as owned, scoped child processes

use std::ffi::{OsStr, OsString};
use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::debug;

use crate::env::PseudoEnv;
use crate::error::PseudoError;

/// A running pseudo invocation with captured stdout and stderr.
///
/// The child is killed when this value is dropped, so every exit path of the
/// owning scope (including cancellation of an enclosing future) tears it down.
#[derive(Debug)]
pub struct PseudoProcess {
    pub(crate) child: Child,
    pub(crate) args: Vec<String>,
    pub(crate) stop_rx: Option<oneshot::Receiver<()>>,
}

/// Requests termination of a process whose collection happens elsewhere.
///
/// Sending or dropping the handle both deliver the request.
#[derive(Debug)]
pub struct StopHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl StopHandle {
    /// Ask the collector to send `SIGTERM` to the process
    pub fn request_stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The collector may already be gone when the process exited first
            let _ = tx.send(());
        }
    }
}

impl PseudoProcess {
    /// Start `<tool> args...` with `env` layered over the caller's environment
    pub fn spawn<I, S>(env: &PseudoEnv, args: I) -> Result<Self, PseudoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();

        let mut recorded = vec![env.command().to_string()];
        recorded.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));

        let mut cmd = Command::new(env.tool_path());
        cmd.args(&args)
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => PseudoError::Install {
                command: env.command().to_string(),
                reason: e.to_string(),
            },
            _ => PseudoError::Io {
                args: recorded.join(" "),
                source: e,
            },
        })?;

        debug!(
            operation = "pseudo_spawn",
            pid = child.id(),
            args = %recorded.join(" "),
            "Spawned pseudo process"
        );

        Ok(Self {
            child,
            args: recorded,
            stop_rx: None,
        })
    }

    /// Argument vector as launched, starting with the command name
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Detach a handle through which another task can request termination
    pub fn stop_handle(&mut self) -> StopHandle {
        let (tx, rx) = oneshot::channel();
        self.stop_rx = Some(rx);
        StopHandle { tx: Some(tx) }
    }

    pub(crate) fn args_string(&self) -> String {
        self.args.join(" ")
    }
}
