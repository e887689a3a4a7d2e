/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Queue directory operations (spec §4.1). One hidden subdirectory per
//! peer domain (`.{domain}`); files named `<MESSAGE_PREFIX><unique>
//! <MESSAGE_SUFFIX>`, selected in lexicographic order which, given
//! monotonic unique names, approximates FIFO.

use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use common::addresses::peer_domain;

use crate::packet::Packet;

pub const MESSAGE_PREFIX: &str = "pkt-";
pub const MESSAGE_SUFFIX: &str = ".packet";
const TEMP_SUFFIX: &str = ".tmp";

static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub enum PacketizeError {
    /// The recipient address carries no extractable domain.
    NoPeerDomain,
    Io(std::io::Error),
}

impl fmt::Display for PacketizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketizeError::NoPeerDomain => write!(f, "recipient has no extractable domain"),
            PacketizeError::Io(err) => write!(f, "packetize I/O error: {err}"),
        }
    }
}

impl std::error::Error for PacketizeError {}

impl From<std::io::Error> for PacketizeError {
    fn from(err: std::io::Error) -> Self {
        PacketizeError::Io(err)
    }
}

/// Owns the queue root directory. Exclusively responsible for packet
/// file creation and deletion — the bundler only reads and requests
/// deletion after a successful send (spec §4.1 "Ownership").
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        QueueStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(format!(".{domain}"))
    }

    /// Writes a finalized packet for `recipient`, deriving the peer
    /// domain from its envelope address. Returns the final path only
    /// once the file has been fully written and renamed into place —
    /// callers must not assume the packet is queued unless this
    /// returns `Ok`.
    pub fn packetize(&self, packet: &Packet) -> Result<PathBuf, PacketizeError> {
        let domain =
            peer_domain(&packet.addendum.smtp_recipient).ok_or(PacketizeError::NoPeerDomain)?;
        let dir = self.domain_dir(&domain);
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir)?;

        let name = unique_name();
        let temp_path = dir.join(format!("{name}{TEMP_SUFFIX}"));
        let final_path = dir.join(format!("{MESSAGE_PREFIX}{name}{MESSAGE_SUFFIX}"));

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&packet.serialize())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;
        Ok(final_path)
    }

    /// Peer domain names with the leading dot stripped; ignores entries
    /// that are not hidden directories.
    pub fn list_domains(&self) -> std::io::Result<Vec<String>> {
        let mut domains = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(domains),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(domain) = name.strip_prefix('.') {
                if !domain.is_empty() {
                    domains.push(domain.to_string());
                }
            }
        }
        domains.sort();
        Ok(domains)
    }

    /// Packet paths for `domain`, sorted ascending — selection order for
    /// the bundler (spec §4.3 "Enumerate packets in sorted order").
    pub fn list_packets(&self, domain: &str) -> std::io::Result<Vec<PathBuf>> {
        let dir = self.domain_dir(domain);
        let mut paths = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(MESSAGE_PREFIX) && name.ends_with(MESSAGE_SUFFIX) {
                paths.push(dir.join(name));
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Best-effort delete: a missing file is logged, not fatal (spec
    /// §4.1).
    pub fn remove(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove packet");
            } else {
                tracing::debug!(path = %path.display(), "packet already removed");
            }
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn unique_name() -> String {
    let now = chrono::Utc::now();
    let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:08}", now.format("%Y%m%dT%H%M%S%.6f"), counter)
}
