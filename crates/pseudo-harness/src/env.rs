// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Environment construction for pseudo client and server processes
//!
//! Mirrors the `FAKEROOTENV` + `FAKEROOTBASEENV` environment a BitBake build
//! hands to pseudo, with every temp directory alias pointed at the work
//! directory so the test run stays self-contained.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::PseudoError;
use crate::files_db::{read_files_db_rows, FilesDbRow};
use crate::settings::PseudoSettings;

pub const STATE_DIR_NAME: &str = "pseudo_state";
pub const ROOTFS_DIR_NAME: &str = "pseudo_rootfs";
pub const FILES_DB_NAME: &str = "files.db";

pub const PSEUDO_BINDIR: &str = "PSEUDO_BINDIR";
pub const PSEUDO_PREFIX: &str = "PSEUDO_PREFIX";
pub const PSEUDO_LIBDIR: &str = "PSEUDO_LIBDIR";
pub const PSEUDO_IGNORE_PATHS: &str = "PSEUDO_IGNORE_PATHS";
pub const PSEUDO_DISABLED: &str = "PSEUDO_DISABLED";
pub const PSEUDO_LOCALSTATEDIR: &str = "PSEUDO_LOCALSTATEDIR";
pub const PSEUDO_PASSWD: &str = "PSEUDO_PASSWD";
pub const PSEUDO_NOSYMLINKEXP: &str = "PSEUDO_NOSYMLINKEXP";
/// Consumed by the cmd-case scripts rather than by pseudo itself
pub const IMAGE_ROOTFS: &str = "IMAGE_ROOTFS";
pub const TMP_DIR_ALIASES: [&str; 5] = ["TMP", "TEMP", "TEMPDIR", "TMPDIR", "XDG_RUNTIME_DIR"];

/// Fully resolved environment shared by the pseudo processes of one run
#[derive(Debug, Clone)]
pub struct PseudoEnv {
    command: String,
    tool_path: PathBuf,
    state_dir: PathBuf,
    rootfs_dir: PathBuf,
    vars: BTreeMap<String, String>,
}

impl PseudoEnv {
    /// Resolve the tool, create defaulted state/rootfs directories and derive
    /// the variable mapping.
    ///
    /// Explicit directories must already exist. A failed build leaves no
    /// directory behind that it created itself.
    pub fn build(settings: &PseudoSettings) -> Result<Self, PseudoError> {
        let tmp_dir = settings
            .tmp_dir
            .as_deref()
            .ok_or(PseudoError::Context { what: "tmp dir" })?;

        let tool_path = resolve_tool(&settings.command, settings, tmp_dir)?;

        for dir in [&settings.state_dir, &settings.rootfs_dir].into_iter().flatten() {
            require_existing_dir(dir)?;
        }

        let state_dir = match &settings.state_dir {
            Some(dir) => dir.clone(),
            None => create_fresh_dir(&tmp_dir.join(STATE_DIR_NAME))?,
        };
        let rootfs_dir = match &settings.rootfs_dir {
            Some(dir) => dir.clone(),
            None => match create_fresh_dir(&tmp_dir.join(ROOTFS_DIR_NAME)) {
                Ok(dir) => dir,
                Err(e) => {
                    if settings.state_dir.is_none() {
                        remove_created_dir(&state_dir);
                    }
                    return Err(e);
                }
            },
        };

        let bin_dir = tool_path.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();
        let prefix_dir = bin_dir.parent().unwrap_or(&bin_dir).to_path_buf();
        let lib_dir = prefix_dir.join("lib/pseudo/lib");

        let ignore_paths = settings.ignore_paths.render(&state_dir);
        info!(
            operation = "pseudo_env_ignore_paths",
            ignore_paths = %ignore_paths,
            "Using pseudo ignore paths"
        );

        let tmp = tmp_dir.display().to_string();
        let mut vars = BTreeMap::new();
        vars.insert(PSEUDO_BINDIR.to_string(), bin_dir.display().to_string());
        vars.insert(PSEUDO_PREFIX.to_string(), prefix_dir.display().to_string());
        vars.insert(PSEUDO_LIBDIR.to_string(), lib_dir.display().to_string());
        vars.insert(PSEUDO_IGNORE_PATHS.to_string(), ignore_paths);
        vars.insert(
            PSEUDO_DISABLED.to_string(),
            if settings.enabled { "0" } else { "1" }.to_string(),
        );
        vars.insert(PSEUDO_LOCALSTATEDIR.to_string(), state_dir.display().to_string());
        vars.insert(PSEUDO_PASSWD.to_string(), rootfs_dir.display().to_string());
        vars.insert(PSEUDO_NOSYMLINKEXP.to_string(), "1".to_string());
        vars.insert(IMAGE_ROOTFS.to_string(), rootfs_dir.display().to_string());
        for alias in TMP_DIR_ALIASES {
            vars.insert(alias.to_string(), tmp.clone());
        }

        Ok(Self {
            command: settings.command.clone(),
            tool_path,
            state_dir,
            rootfs_dir,
            vars,
        })
    }

    /// Command name as configured, used as the first recorded argument
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Absolute location the tool was resolved to
    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    /// Location of the tracking database pseudo maintains in its state directory
    pub fn files_db_path(&self) -> PathBuf {
        self.state_dir.join(FILES_DB_NAME)
    }

    /// Load every row of this run's tracking database
    pub fn read_files_db(&self, timeout: Duration) -> Result<Vec<FilesDbRow>, PseudoError> {
        Ok(read_files_db_rows(&self.files_db_path(), timeout)?)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn resolve_tool(
    command: &str,
    settings: &PseudoSettings,
    cwd: &Path,
) -> Result<PathBuf, PseudoError> {
    let found = match &settings.search_path {
        Some(paths) => which::which_in(command, Some(paths), cwd),
        None => which::which(command),
    };
    let path = found.map_err(|e| PseudoError::Install {
        command: command.to_string(),
        reason: e.to_string(),
    })?;
    debug!(operation = "pseudo_env_resolve", tool = %path.display(), "Resolved pseudo executable");
    Ok(path)
}

/// Create `dir` and any missing parents; an already existing `dir` is an error.
fn create_fresh_dir(dir: &Path) -> Result<PathBuf, PseudoError> {
    let setup_err = |source: io::Error| PseudoError::Setup {
        path: dir.to_path_buf(),
        source,
    };
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent).map_err(setup_err)?;
    }
    fs::create_dir(dir).map_err(setup_err)?;
    Ok(dir.to_path_buf())
}

fn require_existing_dir(dir: &Path) -> Result<(), PseudoError> {
    if dir.is_dir() {
        return Ok(());
    }
    Err(PseudoError::Setup {
        path: dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "not an existing directory"),
    })
}

/// Undo a `create_fresh_dir` whose directory is still empty
fn remove_created_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir(dir) {
        warn!(
            operation = "pseudo_env_rollback",
            path = %dir.display(),
            error = %e,
            "Failed to remove pseudo directory after setup error"
        );
    }
}
