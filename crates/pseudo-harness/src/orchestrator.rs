// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Running a command under pseudo alongside its foreground server

use std::ffi::OsStr;
use std::path::Path;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::env::PseudoEnv;
use crate::error::{PseudoError, PseudoRunError};
use crate::launcher::{PseudoProcess, StopHandle};
use crate::outcome::{collect_outcome, CompletedOutcome};
use crate::settings::{OutcomeChecks, PairedChecks, PseudoSettings};

/// Argument that keeps the pseudo server in the foreground
pub const SERVER_FOREGROUND_ARG: &str = "-f";

/// Client and server outcomes of one paired run
#[derive(Debug, Clone)]
pub struct PairedOutcome {
    pub client: CompletedOutcome,
    pub server: CompletedOutcome,
}

/// Run `cmd args...` as a pseudo client without a dedicated server
pub async fn run_pseudo_client(
    settings: &PseudoSettings,
    cmd: &Path,
    args: &[&str],
    checks: &OutcomeChecks,
) -> Result<CompletedOutcome, PseudoError> {
    let env = PseudoEnv::build(settings)?;
    run_client_with_env(&env, cmd, args, checks).await
}

/// Run `cmd args...` under pseudo with a foreground server.
///
/// The server is launched and its collection started before the client. Once
/// the client finishes, successfully or not, the server is asked to stop and
/// its outcome joined before this returns.
pub async fn run_pseudo(
    settings: &PseudoSettings,
    cmd: &Path,
    args: &[&str],
    checks: &PairedChecks,
) -> Result<PairedOutcome, PseudoRunError> {
    let env = PseudoEnv::build(settings).map_err(PseudoRunError::Setup)?;
    run_pseudo_with_env(&env, cmd, args, checks).await
}

/// [`run_pseudo`] against an already built environment, for callers that
/// inspect the state directory afterwards.
pub async fn run_pseudo_with_env(
    env: &PseudoEnv,
    cmd: &Path,
    args: &[&str],
    checks: &PairedChecks,
) -> Result<PairedOutcome, PseudoRunError> {
    let server =
        PseudoProcess::spawn(env, [SERVER_FOREGROUND_ARG]).map_err(PseudoRunError::Setup)?;
    let server_task = ServerTask::start(server, checks.server.clone());

    let client = run_client_with_env(env, cmd, args, &checks.client).await;

    let server = server_task.stop_and_join().await;

    match (client, server) {
        (Ok(client), Ok(server)) => {
            info!(
                operation = "pseudo_run_complete",
                client_exit = client.exit_code(),
                server_exit = server.exit_code(),
                "Paired pseudo run complete"
            );
            Ok(PairedOutcome { client, server })
        }
        (Err(error), server) => Err(PseudoRunError::Client { error, server }),
        (Ok(client), Err(error)) => Err(PseudoRunError::Server { client, error }),
    }
}

async fn run_client_with_env(
    env: &PseudoEnv,
    cmd: &Path,
    args: &[&str],
    checks: &OutcomeChecks,
) -> Result<CompletedOutcome, PseudoError> {
    let client_args = std::iter::once(cmd.as_os_str()).chain(args.iter().map(OsStr::new));
    let process = PseudoProcess::spawn(env, client_args)?;
    collect_outcome(process, checks).await
}

/// The single background task collecting the server.
///
/// Dropping it without joining still delivers the stop request, and the
/// task's own process handle kills the server if the task is torn down.
struct ServerTask {
    stop: StopHandle,
    handle: JoinHandle<Result<CompletedOutcome, PseudoError>>,
}

impl ServerTask {
    fn start(mut process: PseudoProcess, checks: OutcomeChecks) -> Self {
        let stop = process.stop_handle();
        debug!(operation = "pseudo_server_start", pid = process.id(), "Collecting pseudo server");
        let handle = tokio::spawn(async move { collect_outcome(process, &checks).await });
        Self { stop, handle }
    }

    async fn stop_and_join(mut self) -> Result<CompletedOutcome, PseudoError> {
        self.stop.request_stop();
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(PseudoError::Join(e)),
        }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.stop.request_stop();
    }
}
