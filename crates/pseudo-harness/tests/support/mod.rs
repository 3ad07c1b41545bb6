// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stub pseudo installations for exercising the harness without the real tool

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use pseudo_harness::PseudoSettings;
use tempfile::TempDir;

/// Server that records its pid in `$TMPDIR` and serves until signalled
pub const SERVING_SERVER: &str = r#"echo $$ > "$TMPDIR/server.pid"
exec sleep 30"#;

/// Server that ignores SIGTERM, so only a timeout ends it
pub const STUBBORN_SERVER: &str = r#"trap '' TERM
exec sleep 30"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stub install plus a work directory
pub struct StubPseudo {
    pub install: TempDir,
    pub work: TempDir,
}

impl StubPseudo {
    /// `pseudo -f` runs `server_body`; any other invocation runs the client
    /// script through `/bin/sh`.
    pub fn new(server_body: &str) -> Self {
        let install = TempDir::new().unwrap();
        let bin = install.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let stub = format!(
            r#"if [ "$1" = "-f" ]; then
{server_body}
fi
exec /bin/sh "$@""#
        );
        write_script(&bin, "pseudo", &stub);
        Self {
            install,
            work: TempDir::new().unwrap(),
        }
    }

    pub fn serving() -> Self {
        Self::new(SERVING_SERVER)
    }

    pub fn settings(&self) -> PseudoSettings {
        PseudoSettings::new(self.work.path()).with_search_path(self.install.path().join("bin"))
    }

    /// Write a client script next to the stub install
    pub fn client(&self, name: &str, body: &str) -> PathBuf {
        write_script(self.install.path(), name, body)
    }

    pub fn work_file(&self, name: &str) -> PathBuf {
        self.work.path().join(name)
    }
}

pub fn read_pid(path: &Path) -> Pid {
    let text = fs::read_to_string(path).unwrap();
    Pid::from_raw(text.trim().parse().unwrap())
}

pub fn is_running(pid: Pid) -> bool {
    !matches!(kill(pid, None), Err(Errno::ESRCH))
}

/// Poll until `pid` is gone or `limit` elapses
pub async fn wait_until_gone(pid: Pid, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !is_running(pid)
}
