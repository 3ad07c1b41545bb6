// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pseudo Harness: drive pseudo around a test command and inspect its state
//!
//! pseudo simulates privileged filesystem operations (ownership, device
//! nodes, permissions) for unprivileged processes and records file identity
//! in `files.db`. This crate:
//!
//! - builds the environment pseudo expects ([`PseudoEnv`]),
//! - runs a command as a pseudo client next to a foreground server and
//!   classifies both outcomes ([`run_pseudo`], [`run_pseudo_client`]),
//! - parses the tracking database strictly ([`FilesDb`]) and cross-checks it
//!   against the real filesystem ([`verify_rows_against_fs`]).
//!
//! # Example
//!
//! ```no_run
//! use pseudo_harness::{run_pseudo, read_files_db_rows, PairedChecks, PseudoSettings};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let work = tempfile::tempdir()?;
//!     let settings = PseudoSettings::new(work.path());
//!     let outcome = run_pseudo(
//!         &settings,
//!         Path::new("/path/to/case.sh"),
//!         &[],
//!         &PairedChecks::default(),
//!     )
//!     .await?;
//!     assert_eq!(outcome.client.exit_code(), 0);
//!
//!     let db = work.path().join("pseudo_state").join("files.db");
//!     let rows = read_files_db_rows(&db, pseudo_harness::DEFAULT_DB_TIMEOUT)?;
//!     println!("{} tracked paths", rows.len());
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod files_db;
pub mod launcher;
pub mod orchestrator;
pub mod outcome;
pub mod settings;
pub mod verify;

pub use env::PseudoEnv;
pub use error::{PseudoError, PseudoRunError};
pub use files_db::{
    read_files_db_rows, FilesDb, FilesDbError, FilesDbRow, FilesDbRows, DEFAULT_DB_TIMEOUT,
};
pub use launcher::{PseudoProcess, StopHandle};
pub use orchestrator::{run_pseudo, run_pseudo_client, run_pseudo_with_env, PairedOutcome};
pub use outcome::{collect_outcome, CompletedOutcome};
pub use settings::{
    IgnorePaths, OutcomeChecks, PairedChecks, PseudoSettings, DEFAULT_PROCESS_TIMEOUT,
};
pub use verify::{verify_rows_against_fs, Mismatch, VerifyReport};
