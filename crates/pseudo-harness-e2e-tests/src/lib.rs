// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end pseudo scenarios
//!
//! Each cmd case is a shell script under `data/cmd_cases/` that manipulates
//! files below `$IMAGE_ROOTFS`. Running one drives the real pseudo client and
//! server, then loads the resulting `files.db` so tests can compare it with
//! what is actually on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context};
use pseudo_harness::env::{ROOTFS_DIR_NAME, STATE_DIR_NAME};
use pseudo_harness::settings::DEFAULT_PSEUDO_COMMAND;
use pseudo_harness::{
    run_pseudo_with_env, FilesDbRow, OutcomeChecks, PairedChecks, PairedOutcome, PseudoEnv,
    PseudoSettings,
};
use tempfile::TempDir;
use tracing::info;

/// pseudo may still be flushing when the server exits, so wait generously
pub const FILES_DB_READ_TIMEOUT: Duration = Duration::from_secs(45);

/// Root of the test data shipped with this crate
pub fn data_root_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
}

/// Path of a cmd case script relative to `data/cmd_cases`
pub fn cmd_case_path(rel: &str) -> PathBuf {
    data_root_dir().join("cmd_cases").join(rel)
}

/// Whether a real pseudo is available on `PATH`
pub fn pseudo_installed() -> bool {
    which::which(DEFAULT_PSEUDO_COMMAND).is_ok()
}

/// Everything left behind by one cmd case run
pub struct CmdCaseRun {
    pub work: TempDir,
    pub state_dir: PathBuf,
    pub rootfs_dir: PathBuf,
    pub outcome: PairedOutcome,
    pub rows: Vec<FilesDbRow>,
}

/// Run a cmd case under pseudo and load its tracking rows.
///
/// The client must stay silent on both streams; the server may log freely.
pub async fn run_cmd_case(rel: &str) -> anyhow::Result<CmdCaseRun> {
    let script = cmd_case_path(rel);
    ensure!(script.is_file(), "cmd case '{}' not found", script.display());

    let work = tempfile::Builder::new()
        .prefix("cmd_case")
        .tempdir()
        .context("failed to create cmd case work dir")?;
    let state_dir = create_dir(work.path(), STATE_DIR_NAME)?;
    let rootfs_dir = create_dir(work.path(), ROOTFS_DIR_NAME)?;

    let settings = PseudoSettings::new(work.path())
        .with_state_dir(&state_dir)
        .with_rootfs_dir(&rootfs_dir);
    let env = PseudoEnv::build(&settings).context("failed to build pseudo environment")?;
    let checks = PairedChecks {
        client: OutcomeChecks::client().with_empty_output(true, true),
        server: OutcomeChecks::server(),
    };

    let outcome = run_pseudo_with_env(&env, &script, &[], &checks)
        .await
        .with_context(|| format!("cmd case '{rel}' failed"))?;

    let db_path = env.files_db_path();
    info!(operation = "cmd_case_state", files_db = %db_path.display(), "Reading files db");
    ensure!(db_path.exists(), "pseudo did not create '{}'", db_path.display());
    let rows = env
        .read_files_db(FILES_DB_READ_TIMEOUT)
        .with_context(|| format!("failed to read '{}'", db_path.display()))?;
    info!(operation = "cmd_case_rows", rows = rows.len(), "Loaded files db rows");

    Ok(CmdCaseRun {
        work,
        state_dir,
        rootfs_dir,
        outcome,
        rows,
    })
}

fn create_dir(parent: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create '{}'", dir.display()))?;
    Ok(dir)
}
