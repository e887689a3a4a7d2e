/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Exclusive process lock (spec §5: "Two scheduler instances must not run
//! concurrently — enforce with an exclusive process-level lock file").

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Held for the lifetime of the process. Dropping it removes the lock
/// file so a subsequent launch does not need manual cleanup.
pub struct ProcessLock {
    path: PathBuf,
}

#[derive(Debug)]
pub enum LockError {
    AlreadyRunning(PathBuf),
    Io(io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::AlreadyRunning(path) => {
                write!(f, "another scheduler instance holds {}", path.display())
            }
            LockError::Io(err) => write!(f, "lock file I/O error: {err}"),
        }
    }
}

impl std::error::Error for LockError {}

impl ProcessLock {
    /// Acquires the lock, failing if the file already exists. This only
    /// protects against a second instance started by the same operator
    /// on the same host; it does not survive a hard crash that leaves a
    /// stale file behind — operators are expected to clear it manually,
    /// the same tradeoff the teacher's own single-writer assumptions make
    /// for its queue directories.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => LockError::AlreadyRunning(path.clone()),
                _ => LockError::Io(err),
            })?;
        write!(file, "{}", std::process::id()).map_err(LockError::Io)?;
        Ok(ProcessLock { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
