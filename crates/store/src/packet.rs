/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Packet file format (spec §3, §6):
//!
//! ```text
//! <original RFC-5322 message bytes>
//! START_ADDENDUM
//! From: <sender>
//! To: <recipient>
//! Crypted: <True|False>
//! CryptedWith: <algo1, algo2, ...>
//! PrivateSigned: <True|False>
//! ClearSigned: <True|False>
//! DkimSigned: <True|False>
//! Verification: <code>
//! END_ADDENDUM
//! ```
//!
//! Header names are case-sensitive; booleans are the literal strings
//! `True`/`False`; list fields are comma-space separated. Unknown headers
//! are skipped; missing ones fall back to the documented defaults
//! (`False`, empty list, `None`).

use std::fmt;

pub const START_ADDENDUM: &str = "START_ADDENDUM";
pub const END_ADDENDUM: &str = "END_ADDENDUM";

/// Bookkeeping trailer appended after the original message in a packet
/// file (spec GLOSSARY: "Addendum").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addendum {
    pub smtp_sender: String,
    pub smtp_recipient: String,
    pub encrypted: bool,
    pub encrypted_with: Vec<String>,
    pub private_signed: bool,
    pub clear_signed: bool,
    pub dkim_signed: bool,
    pub verification_code: Option<String>,
}

impl Addendum {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(START_ADDENDUM.as_bytes());
        out.push(b'\n');
        write_header(out, "From", &self.smtp_sender);
        write_header(out, "To", &self.smtp_recipient);
        write_header(out, "Crypted", bool_str(self.encrypted));
        write_header(out, "CryptedWith", &self.encrypted_with.join(", "));
        write_header(out, "PrivateSigned", bool_str(self.private_signed));
        write_header(out, "ClearSigned", bool_str(self.clear_signed));
        write_header(out, "DkimSigned", bool_str(self.dkim_signed));
        write_header(
            out,
            "Verification",
            self.verification_code.as_deref().unwrap_or(""),
        );
        out.extend_from_slice(END_ADDENDUM.as_bytes());
        out.push(b'\n');
    }

    fn parse(block: &str) -> Self {
        let mut sender = String::new();
        let mut recipient = String::new();
        let mut encrypted = false;
        let mut encrypted_with = Vec::new();
        let mut private_signed = false;
        let mut clear_signed = false;
        let mut dkim_signed = false;
        let mut verification_code = None;

        for line in block.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name {
                "From" => sender = value.to_string(),
                "To" => recipient = value.to_string(),
                "Crypted" => encrypted = parse_bool(value),
                "CryptedWith" => encrypted_with = parse_list(value),
                "PrivateSigned" => private_signed = parse_bool(value),
                "ClearSigned" => clear_signed = parse_bool(value),
                "DkimSigned" => dkim_signed = parse_bool(value),
                "Verification" => {
                    verification_code = (!value.is_empty()).then(|| value.to_string())
                }
                // Unknown headers are skipped (spec §6).
                _ => {}
            }
        }

        Addendum {
            smtp_sender: sender,
            smtp_recipient: recipient,
            encrypted,
            encrypted_with,
            private_signed,
            clear_signed,
            dkim_signed,
            verification_code,
        }
    }
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.push(b'\n');
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim() == "True"
}

fn parse_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(", ").map(|s| s.trim().to_string()).collect()
}

/// A packet: the finalized original message plus its addendum, as stored
/// on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub original_rfc5322_bytes: Vec<u8>,
    pub addendum: Addendum,
}

#[derive(Debug)]
pub enum PacketReadError {
    /// No `END_ADDENDUM` marker found — the writer has not finished
    /// (spec §3: "a file without `END_ADDENDUM` is either in-progress or
    /// corrupt"). Never delete the file on this error.
    Unfinished,
    /// `END_ADDENDUM` is present but the bytes between the two markers
    /// are not valid UTF-8 (SPEC_FULL.md §B.1: treated as corrupt, not
    /// bounced, not deleted).
    Corrupt,
    Io(std::io::Error),
}

impl fmt::Display for PacketReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketReadError::Unfinished => write!(f, "packet is not yet finalized"),
            PacketReadError::Corrupt => write!(f, "packet addendum is corrupt"),
            PacketReadError::Io(err) => write!(f, "packet I/O error: {err}"),
        }
    }
}

impl std::error::Error for PacketReadError {}

impl From<std::io::Error> for PacketReadError {
    fn from(err: std::io::Error) -> Self {
        PacketReadError::Io(err)
    }
}

impl Packet {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.original_rfc5322_bytes.clone();
        // Exactly one separator newline so START_ADDENDUM always starts
        // its own line; parse() strips exactly one newline back off.
        out.push(b'\n');
        self.addendum.write(&mut out);
        out
    }

    /// Parses a full packet file's bytes. Returns
    /// [`PacketReadError::Unfinished`] if `END_ADDENDUM` is absent — the
    /// bundler must treat that as "still queued", never as an error to
    /// surface to an operator.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketReadError> {
        let start = find_subslice(bytes, START_ADDENDUM.as_bytes())
            .ok_or(PacketReadError::Unfinished)?;
        let end_marker_pos = find_subslice(&bytes[start..], END_ADDENDUM.as_bytes())
            .ok_or(PacketReadError::Unfinished)?
            + start;

        // The original message is arbitrary, possibly non-UTF-8 (binary
        // or 8bit-encoded) RFC 5322 bytes and is never decoded — only
        // the addendum trailer between the markers is ever UTF-8.
        let original = bytes[..start].strip_suffix(b"\n").unwrap_or(&bytes[..start]);
        let addendum_bytes = &bytes[start + START_ADDENDUM.len()..end_marker_pos];
        let addendum_block =
            std::str::from_utf8(addendum_bytes).map_err(|_| PacketReadError::Corrupt)?;

        Ok(Packet {
            original_rfc5322_bytes: original.to_vec(),
            addendum: Addendum::parse(addendum_block),
        })
    }

    /// `true` once `END_ADDENDUM` has been written — the "finalized"
    /// flag of spec §3.
    pub fn is_finalized(bytes: &[u8]) -> bool {
        find_subslice(bytes, END_ADDENDUM.as_bytes()).is_some()
    }
}

/// Plain byte search for `needle` within `haystack`, used so marker
/// lookup never requires the whole packet — including the original
/// message, which may be arbitrary binary or 8bit-encoded bytes — to
/// be valid UTF-8.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
