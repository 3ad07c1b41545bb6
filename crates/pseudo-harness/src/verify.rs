// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Cross-checking tracking rows against the live filesystem

use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::files_db::FilesDbRow;

/// One disagreement between the database and the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// A live row names a path that does not exist
    MissingPath { id: i64, path: PathBuf },
    /// A live row records a different inode than `lstat` reports
    InodeMismatch {
        id: i64,
        path: PathBuf,
        tracked: u64,
        actual: u64,
    },
    /// A filesystem entry without any row
    Untracked { path: PathBuf, ino: u64 },
    /// More than one live row for the same path
    Duplicate { path: PathBuf, ids: Vec<i64> },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingPath { id, path } => {
                write!(f, "row {id}: '{}' does not exist", path.display())
            }
            Mismatch::InodeMismatch {
                id,
                path,
                tracked,
                actual,
            } => write!(
                f,
                "row {id}: '{}' tracked as inode {tracked} but is inode {actual}",
                path.display()
            ),
            Mismatch::Untracked { path, ino } => {
                write!(f, "'{}' (inode {ino}) has no row", path.display())
            }
            Mismatch::Duplicate { path, ids } => {
                write!(f, "'{}' has rows {ids:?}", path.display())
            }
        }
    }
}

/// Result of [`verify_rows_against_fs`]
#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    /// Live rows under the checked root
    pub checked_rows: usize,
    /// Filesystem entries found under the root
    pub checked_entries: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows, {} entries, {} mismatches",
            self.checked_rows,
            self.checked_entries,
            self.mismatches.len()
        )?;
        for m in &self.mismatches {
            write!(f, "\n  {m}")?;
        }
        Ok(())
    }
}

/// Check that every live row under `root` names an existing path with the
/// recorded inode, and every entry under `root` has exactly one such row.
///
/// Rows flagged for deletion and `root` itself are not considered. Symlinks
/// are inspected, not followed.
pub fn verify_rows_against_fs(rows: &[FilesDbRow], root: &Path) -> std::io::Result<VerifyReport> {
    let mut report = VerifyReport::default();

    let mut by_path: BTreeMap<&Path, Vec<&FilesDbRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.is_deleting()) {
        if row.path.starts_with(root) && row.path != root {
            by_path.entry(row.path.as_path()).or_default().push(row);
        }
    }

    for (path, tracked) in &by_path {
        report.checked_rows += tracked.len();
        if tracked.len() > 1 {
            report.mismatches.push(Mismatch::Duplicate {
                path: path.to_path_buf(),
                ids: tracked.iter().map(|r| r.id).collect(),
            });
        }
        for row in tracked {
            match std::fs::symlink_metadata(path) {
                Ok(meta) if meta.ino() != row.inode() => {
                    report.mismatches.push(Mismatch::InodeMismatch {
                        id: row.id,
                        path: path.to_path_buf(),
                        tracked: row.inode(),
                        actual: meta.ino(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.mismatches.push(Mismatch::MissingPath {
                        id: row.id,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        report.checked_entries += 1;
        if !by_path.contains_key(entry.path()) {
            report.mismatches.push(Mismatch::Untracked {
                path: entry.path().to_path_buf(),
                ino: entry.metadata()?.ino(),
            });
        }
    }

    Ok(report)
}
