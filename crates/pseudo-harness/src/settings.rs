// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for pseudo runs

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command name of the interposition tool
pub const DEFAULT_PSEUDO_COMMAND: &str = "pseudo";

/// Default bound on collecting a single pseudo process
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Exit code reported for a process stopped by `SIGTERM`
pub const TERMINATED_EXIT_CODE: i32 = -15;

/// Broad system prefixes an earlier revision excluded from interception.
///
/// pseudo interprets these relative to the simulated root, so they are only
/// emitted on explicit opt-in.
pub const SYSTEM_IGNORE_PREFIXES: [&str; 4] = ["/usr/", "/etc/", "/lib", "/dev/"];

/// Paths pseudo must not intercept, in addition to its own state directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnorePaths {
    /// Also ignore [`SYSTEM_IGNORE_PREFIXES`]
    pub system_prefixes: bool,
    /// Extra prefixes, emitted before the state directory
    pub extra: Vec<PathBuf>,
}

impl IgnorePaths {
    /// Render the comma separated `PSEUDO_IGNORE_PATHS` value
    pub fn render(&self, state_dir: &Path) -> String {
        let mut paths: Vec<String> = Vec::new();
        if self.system_prefixes {
            paths.extend(SYSTEM_IGNORE_PREFIXES.iter().map(|p| p.to_string()));
        }
        paths.extend(self.extra.iter().map(|p| p.display().to_string()));
        paths.push(state_dir.display().to_string());
        paths.join(",")
    }
}

/// Everything needed to build the pseudo environment
#[derive(Debug, Clone)]
pub struct PseudoSettings {
    /// Command name looked up on the search path
    pub command: String,
    /// Search path for `command`; the caller's `PATH` when unset
    pub search_path: Option<OsString>,
    /// Whether pseudo actively intercepts (`PSEUDO_DISABLED=0`)
    pub enabled: bool,
    /// Work directory all derived paths anchor to
    pub tmp_dir: Option<PathBuf>,
    /// Defaults to `<tmp_dir>/pseudo_state`
    pub state_dir: Option<PathBuf>,
    /// Defaults to `<tmp_dir>/pseudo_rootfs`
    pub rootfs_dir: Option<PathBuf>,
    pub ignore_paths: IgnorePaths,
}

impl Default for PseudoSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_PSEUDO_COMMAND.to_string(),
            search_path: None,
            enabled: true,
            tmp_dir: None,
            state_dir: None,
            rootfs_dir: None,
            ignore_paths: IgnorePaths::default(),
        }
    }
}

impl PseudoSettings {
    /// Settings anchored at `tmp_dir` with every other field defaulted
    pub fn new<P: Into<PathBuf>>(tmp_dir: P) -> Self {
        Self {
            tmp_dir: Some(tmp_dir.into()),
            ..Self::default()
        }
    }

    pub fn with_state_dir<P: Into<PathBuf>>(mut self, state_dir: P) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn with_rootfs_dir<P: Into<PathBuf>>(mut self, rootfs_dir: P) -> Self {
        self.rootfs_dir = Some(rootfs_dir.into());
        self
    }

    pub fn with_search_path<S: Into<OsString>>(mut self, search_path: S) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Invariants checked on a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeChecks {
    /// Accepted exit codes; `None` skips the check
    pub allowed_exit_codes: Option<Vec<i32>>,
    pub require_empty_stdout: bool,
    pub require_empty_stderr: bool,
    pub timeout: Duration,
}

impl Default for OutcomeChecks {
    fn default() -> Self {
        Self {
            allowed_exit_codes: None,
            require_empty_stdout: false,
            require_empty_stderr: false,
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }
}

impl OutcomeChecks {
    /// A client must exit cleanly
    pub fn client() -> Self {
        Self {
            allowed_exit_codes: Some(vec![0]),
            ..Self::default()
        }
    }

    /// A server ends either on its own or by being asked to stop
    pub fn server() -> Self {
        Self {
            allowed_exit_codes: Some(vec![0, TERMINATED_EXIT_CODE]),
            ..Self::default()
        }
    }

    pub fn with_empty_output(mut self, stdout: bool, stderr: bool) -> Self {
        self.require_empty_stdout = stdout;
        self.require_empty_stderr = stderr;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Checks for both halves of a paired run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedChecks {
    pub client: OutcomeChecks,
    pub server: OutcomeChecks,
}

impl Default for PairedChecks {
    fn default() -> Self {
        Self {
            client: OutcomeChecks::client(),
            server: OutcomeChecks::server(),
        }
    }
}
