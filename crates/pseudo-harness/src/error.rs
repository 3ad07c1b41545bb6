// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for driving pseudo and reading its state

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::files_db::FilesDbError;
use crate::outcome::CompletedOutcome;

/// Failures raised while configuring, launching or collecting pseudo processes
#[derive(Error, Debug)]
pub enum PseudoError {
    #[error("Missing *{what}*.")]
    Context { what: &'static str },

    #[error("Pseudo executable '{command}' cannot be found: {reason}")]
    Install { command: String, reason: String },

    #[error("Failed to prepare pseudo directory '{}': {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "'{args}' failed with unexpected error code '{code}'. Expected one of the following \
         error code: {{{}}}. Process stderr: ''\n{stderr}''",
        join_codes(allowed)
    )]
    Process {
        args: String,
        code: i32,
        allowed: Vec<i32>,
        stderr: String,
    },

    #[error("'{args}' timeouted after '{}' seconds.", timeout.as_secs_f64())]
    Timeout { args: String, timeout: Duration },

    #[error("'{args}' with unexpected non empty stdout of: ''\n{stdout}''")]
    NonEmptyStdout { args: String, stdout: String },

    #[error("'{args}' with unexpected non empty stderr of: ''\n{stderr}''")]
    NonEmptyStderr { args: String, stderr: String },

    #[error("I/O error while collecting '{args}': {source}")]
    Io {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pseudo server task did not complete: {0}")]
    Join(#[source] tokio::task::JoinError),

    #[error(transparent)]
    FilesDb(#[from] FilesDbError),
}

impl PseudoError {
    /// The process could not be started, ran too long, or exited with a rejected code
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            Self::Process { .. } | Self::Install { .. } | Self::Timeout { .. }
        )
    }

    /// An output cleanliness check requested by the caller was violated
    pub fn is_check_error(&self) -> bool {
        matches!(self, Self::NonEmptyStdout { .. } | Self::NonEmptyStderr { .. })
    }
}

fn join_codes(codes: &[i32]) -> String {
    codes.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

/// Failure of a paired client/server run
///
/// The server side is always accounted for: either its completed outcome or
/// the error its collection produced travels with the client failure.
#[derive(Error, Debug)]
pub enum PseudoRunError {
    /// Nothing was launched; environment construction failed
    #[error("failed to prepare pseudo run: {0}")]
    Setup(#[source] PseudoError),

    /// The client failed; the server was still stopped and collected
    #[error("pseudo client failed: {error}")]
    Client {
        #[source]
        error: PseudoError,
        server: Result<CompletedOutcome, PseudoError>,
    },

    /// The client succeeded but the server outcome was rejected
    #[error("pseudo server failed: {error}")]
    Server {
        client: CompletedOutcome,
        #[source]
        error: PseudoError,
    },
}

impl PseudoRunError {
    /// The error that occurred first
    pub fn error(&self) -> &PseudoError {
        match self {
            Self::Setup(error) => error,
            Self::Client { error, .. } => error,
            Self::Server { error, .. } => error,
        }
    }

    /// The collected server outcome, when the server itself passed its checks
    pub fn server_outcome(&self) -> Option<&CompletedOutcome> {
        match self {
            Self::Client {
                server: Ok(server), ..
            } => Some(server),
            _ => None,
        }
    }
}
