/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The History recorder (spec §4.7): after a successful send,
//! reconstructs one accounting record per original user-visible message
//! from its packet's addendum, persists it, and only then deletes the
//! packet file.

use std::{
    fmt,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use store::{Addendum, Packet};

/// One persisted outbound-record (spec §4.7 step 4).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutboundRecord {
    pub sender: String,
    pub recipient: String,
    pub encrypted: bool,
    pub encrypted_with: Vec<String>,
    pub private_signed: bool,
    pub clear_signed: bool,
    pub dkim_signed: bool,
    pub verification_code: Option<String>,
    /// Algorithms the Wrapper/encryptor used for the *outer* bundle
    /// (spec §4.7 step 2: "plus the metadata layer's algorithms").
    pub metadata_crypted_with: Vec<String>,
    /// Spec §4.7 step 3: the two-layer signing model. A signed inner
    /// message records both the real sender and the metadata address;
    /// an unsigned-but-clear-signed message records only the metadata
    /// address.
    pub signers: Vec<String>,
}

impl OutboundRecord {
    /// Reconstructs the record for one packet (spec §4.7 steps 1-3).
    pub fn reconstruct(addendum: &Addendum, metadata_crypted_with: &[String], local_metadata_addr: &str) -> Self {
        let signed = addendum.private_signed;
        let signers = if signed {
            vec![addendum.smtp_sender.clone(), local_metadata_addr.to_string()]
        } else if addendum.clear_signed {
            vec![local_metadata_addr.to_string()]
        } else {
            Vec::new()
        };

        OutboundRecord {
            sender: addendum.smtp_sender.clone(),
            recipient: addendum.smtp_recipient.clone(),
            encrypted: addendum.encrypted,
            encrypted_with: addendum.encrypted_with.clone(),
            private_signed: addendum.private_signed,
            clear_signed: addendum.clear_signed,
            dkim_signed: addendum.dkim_signed,
            verification_code: addendum.verification_code.clone(),
            metadata_crypted_with: metadata_crypted_with.to_vec(),
            signers,
        }
    }
}

#[derive(Debug)]
pub enum HistoryError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::Io(err) => write!(f, "history I/O error: {err}"),
            HistoryError::Serialize(err) => write!(f, "history serialization error: {err}"),
        }
    }
}

impl std::error::Error for HistoryError {}

/// Appends one JSON-lines record per successfully sent packet (spec
/// §4.7). A flat append-only file mirrors the packet store's own
/// durability model (spec §9 "queue as directory of files") without
/// requiring a database, which is explicitly out of scope (spec §1
/// "ORM-backed configuration").
pub struct HistoryRecorder {
    path: PathBuf,
}

impl HistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HistoryRecorder { path: path.into() }
    }

    /// Reparses `packet_bytes` into `(original, addendum)` and persists
    /// the reconstructed record (spec §4.7 steps 1-4). Does not delete
    /// the packet file — the caller does that only after this returns
    /// `Ok`, preserving "no file is sent and no packet is deleted" on
    /// failure (spec §4.7 invariant mirrors §8 property 7).
    pub fn record(
        &self,
        packet: &Packet,
        metadata_crypted_with: &[String],
        local_metadata_addr: &str,
    ) -> Result<OutboundRecord, HistoryError> {
        let record = OutboundRecord::reconstruct(&packet.addendum, metadata_crypted_with, local_metadata_addr);
        self.append(&record)?;
        Ok(record)
    }

    fn append(&self, record: &OutboundRecord) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(HistoryError::Io)?;
        }
        let line = serde_json::to_string(record).map_err(HistoryError::Serialize)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(HistoryError::Io)?;
        writeln!(file, "{line}").map_err(HistoryError::Io)?;
        Ok(())
    }

    /// Reads every persisted record back, in append order. Used by
    /// tests and by operators auditing what was actually sent.
    pub fn read_all(&self) -> Result<Vec<OutboundRecord>, HistoryError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HistoryError::Io(err)),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(HistoryError::Serialize))
            .collect()
    }
}

pub fn path_for(store_root: &Path) -> PathBuf {
    store_root.join("history.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::Addendum;

    fn sample_addendum(signed: bool, clear_signed: bool) -> Addendum {
        Addendum {
            smtp_sender: "alice@local.example".to_string(),
            smtp_recipient: "bob@peer.example".to_string(),
            encrypted: true,
            encrypted_with: vec!["openpgp".to_string()],
            private_signed: signed,
            clear_signed,
            dkim_signed: false,
            verification_code: Some("abc123".to_string()),
        }
    }

    #[test]
    fn signed_message_records_both_signers() {
        let record = OutboundRecord::reconstruct(&sample_addendum(true, false), &[], "metadata-key@local.example");
        assert_eq!(
            record.signers,
            vec!["alice@local.example".to_string(), "metadata-key@local.example".to_string()]
        );
    }

    #[test]
    fn clear_signed_only_records_metadata_address() {
        let record = OutboundRecord::reconstruct(&sample_addendum(false, true), &[], "metadata-key@local.example");
        assert_eq!(record.signers, vec!["metadata-key@local.example".to_string()]);
    }

    #[test]
    fn unsigned_has_no_signers() {
        let record = OutboundRecord::reconstruct(&sample_addendum(false, false), &[], "metadata-key@local.example");
        assert!(record.signers.is_empty());
    }

    #[test]
    fn record_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(path_for(dir.path()));
        let packet = Packet {
            original_rfc5322_bytes: b"Subject: hi".to_vec(),
            addendum: sample_addendum(true, false),
        };
        recorder
            .record(&packet, &["openpgp".to_string()], "metadata-key@local.example")
            .unwrap();
        let all = recorder.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].sender, "alice@local.example");
        assert_eq!(all[0].metadata_crypted_with, vec!["openpgp".to_string()]);
    }
}
