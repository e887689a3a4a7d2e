/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Bundler (spec §4.3), grounded step-for-step on
//! `original_source/goodcrypto/mail/message/bundle.py::get_mime_part`
//! and `bundle_and_pad`.

use std::path::{Path, PathBuf};

use common::config::GatewayConfig;
use mail_builder::mime::{BodyPart, MimePart};
use store::{Packet, PacketReadError, QueueStore};

use crate::notice::{build_bounce_message, emit_operator_notice, NoticeKind};
use crate::relay::RelayAdapter;

/// One selected packet's contribution to a bundle: its MIME part plus
/// the original file path, kept so the History recorder (§4.7) can
/// reparse it after a successful send.
pub struct SelectedPacket {
    pub path: PathBuf,
    pub packet: Packet,
}

/// A transient carrier under construction for one peer domain
/// (spec §3 "Bundle").
pub struct Bundle {
    pub peer_domain: String,
    pub parts: Vec<MimePart<'static>>,
    pub accumulated_size: u64,
    pub included: Vec<SelectedPacket>,
    pub metadata_crypted_with: Vec<String>,
}

impl Bundle {
    fn new(peer_domain: String) -> Self {
        Bundle {
            peer_domain,
            parts: Vec::new(),
            accumulated_size: 0,
            included: Vec::new(),
            metadata_crypted_with: Vec::new(),
        }
    }
}

/// Outcome of attempting to bundle one peer domain this cycle.
pub enum BundleOutcome {
    /// Nothing to send: the queue was empty, or every file present was
    /// unfinished or corrupt.
    Empty,
    Ready(Bundle),
}

pub struct Bundler<'a> {
    config: &'a GatewayConfig,
}

impl<'a> Bundler<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        Bundler { config }
    }

    /// Runs the selection loop for one domain subdirectory (spec §4.3
    /// steps 1-4). Oversize packets are bounced and removed as a side
    /// effect before this function returns.
    pub fn bundle_domain(
        &self,
        store: &QueueStore,
        relay: &dyn RelayAdapter,
        domain: &str,
    ) -> std::io::Result<BundleOutcome> {
        let max_size = self.config.bundled_message_max_size;
        let mut bundle = Bundle::new(domain.to_string());

        for path in store.list_packets(domain)? {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to read packet");
                    continue;
                }
            };

            let size = bytes.len() as u64;

            if size > max_size {
                self.bounce_oversize(store, relay, &path, &bytes);
                continue;
            }

            match Packet::parse(&bytes) {
                Ok(packet) => {
                    let encoded_size = mime_part_serialized_len(bytes.len());
                    if bundle.accumulated_size + encoded_size < max_size {
                        bundle.parts.push(wrap_as_mime_part(&bytes));
                        bundle.accumulated_size += encoded_size;
                        bundle.included.push(SelectedPacket { path, packet });
                    } else {
                        // Would overflow: stop selecting. Remaining
                        // packets, including this one, wait for the next
                        // cycle (spec §4.3 step 4, ordering guarantee b).
                        break;
                    }
                }
                Err(PacketReadError::Unfinished) => {
                    // Still being written; leave it alone (spec §4.1
                    // invariant, S5).
                    continue;
                }
                Err(PacketReadError::Corrupt) => {
                    // SPEC_FULL §B.1: present END_ADDENDUM marker but an
                    // unparseable trailer. Logged, left in place, never
                    // counted as bounced or sent.
                    tracing::warn!(path = %path.display(), "corrupt packet trailer, skipping");
                    continue;
                }
                Err(PacketReadError::Io(err)) => {
                    tracing::warn!(path = %path.display(), %err, "io error reading packet");
                    continue;
                }
            }
        }

        if bundle.parts.is_empty() {
            Ok(BundleOutcome::Empty)
        } else {
            Ok(BundleOutcome::Ready(bundle))
        }
    }

    fn bounce_oversize(
        &self,
        store: &QueueStore,
        relay: &dyn RelayAdapter,
        path: &Path,
        bytes: &[u8],
    ) {
        // Even an unparseable addendum must still produce a bounce (spec
        // §4.3/§6: every oversize packet is bounced). Without a sender
        // address to recover, the best-effort notice goes to the local
        // postmaster instead of being silently dropped.
        let sender = match Packet::parse(bytes) {
            Ok(packet) => packet.addendum.smtp_sender,
            Err(_) => {
                tracing::warn!(path = %path.display(), "oversize packet has unparseable addendum, bouncing to postmaster instead");
                format!("postmaster@{}", self.config.local_domain)
            }
        };

        let notice = build_bounce_message(
            &self.config.local_domain,
            &self.config.error_tag,
            &sender,
            self.config.bundle_message_kb(),
        );
        let from = format!("mailer-daemon@{}", self.config.local_domain);
        match relay.send(&notice, &from, &sender) {
            Ok(()) => emit_operator_notice(
                NoticeKind::Bounce,
                &self.config.local_domain,
                &format!("bounced oversize packet to {sender}"),
            ),
            Err(err) => tracing::warn!(%err, "failed to deliver bounce notice"),
        }
        store.remove(path);
    }
}

fn wrap_as_mime_part(bytes: &[u8]) -> MimePart<'static> {
    MimePart::new("application/alternative", BodyPart::Binary(bytes.to_vec().into()))
        .transfer_encoding(mail_builder::encoders::encode::Encoding::Base64)
}

/// Header/boundary overhead budgeted per MIME part, on top of its
/// base64 body (spec §4.3/§4.4: `bundled_message_max_size` bounds the
/// assembled message, not the sum of raw packet files).
pub(crate) const MIME_PART_HEADER_OVERHEAD: u64 = 96;

/// Estimates the size a packet's raw bytes occupy once base64-encoded
/// and wrapped as a MIME part: base64 expands every 3 input bytes to 4,
/// RFC 2045 wraps encoded output at 76 characters per line with a CRLF
/// after each line, and the part itself carries MIME headers and a
/// boundary line. Used so `accumulated_size` reflects what actually
/// lands in the assembled message instead of the pre-encoding byte
/// count.
pub(crate) fn mime_part_serialized_len(raw_len: usize) -> u64 {
    let raw_len = raw_len as u64;
    let encoded = (raw_len + 2) / 3 * 4;
    let line_breaks = encoded / 76 + 1;
    encoded + line_breaks * 2 + MIME_PART_HEADER_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_double::RecordingRelay;
    use common::config::GatewayConfig;
    use store::{Addendum, Packet};
    use tempfile::tempdir;

    fn packet(sender: &str, recipient: &str, body: &[u8]) -> Packet {
        Packet {
            original_rfc5322_bytes: body.to_vec(),
            addendum: Addendum {
                smtp_sender: sender.to_string(),
                smtp_recipient: recipient.to_string(),
                encrypted: true,
                encrypted_with: vec!["openpgp".to_string()],
                private_signed: false,
                clear_signed: false,
                dkim_signed: false,
                verification_code: None,
            },
        }
    }

    #[test]
    fn empty_queue_yields_empty_outcome() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        let config = GatewayConfig::for_test(dir.path().to_path_buf(), 64 * 1024);
        let relay = RecordingRelay::new();
        let bundler = Bundler::new(&config);
        let outcome = bundler.bundle_domain(&store, &relay, "peer.example").unwrap();
        assert!(matches!(outcome, BundleOutcome::Empty));
    }

    #[test]
    fn single_small_packet_is_selected() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        let config = GatewayConfig::for_test(dir.path().to_path_buf(), 64 * 1024);
        let relay = RecordingRelay::new();
        let p = packet("alice@local.example", "bob@peer.example", b"hello world");
        store.packetize(&p).unwrap();

        let bundler = Bundler::new(&config);
        match bundler.bundle_domain(&store, &relay, "peer.example").unwrap() {
            BundleOutcome::Ready(bundle) => {
                assert_eq!(bundle.included.len(), 1);
                assert_eq!(bundle.parts.len(), 1);
            }
            BundleOutcome::Empty => panic!("expected a bundle"),
        }
    }

    #[test]
    fn oversize_packet_is_bounced_and_removed() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        let config = GatewayConfig::for_test(dir.path().to_path_buf(), 10);
        let relay = RecordingRelay::new();
        let p = packet(
            "alice@local.example",
            "bob@peer.example",
            b"this body is much larger than ten bytes",
        );
        store.packetize(&p).unwrap();

        let bundler = Bundler::new(&config);
        let outcome = bundler.bundle_domain(&store, &relay, "peer.example").unwrap();
        assert!(matches!(outcome, BundleOutcome::Empty));
        assert_eq!(relay.sent().len(), 1);
        assert_eq!(store.list_packets("peer.example").unwrap().len(), 0);
    }

    #[test]
    fn overflow_holds_second_packet_for_next_cycle() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        // Large enough that neither packet is individually oversize, but
        // too small for both encoded MIME parts to fit together.
        let config = GatewayConfig::for_test(dir.path().to_path_buf(), 500);
        let relay = RecordingRelay::new();
        let a = packet("alice@local.example", "bob@peer.example", &[b'a'; 30]);
        let b = packet("alice@local.example", "bob@peer.example", &[b'b'; 40]);
        store.packetize(&a).unwrap();
        store.packetize(&b).unwrap();

        let bundler = Bundler::new(&config);
        let outcome = bundler.bundle_domain(&store, &relay, "peer.example").unwrap();
        match outcome {
            BundleOutcome::Ready(bundle) => {
                assert_eq!(bundle.included.len(), 1);
                assert_eq!(bundle.included[0].packet.original_rfc5322_bytes, vec![b'a'; 30]);
            }
            BundleOutcome::Empty => panic!("expected a bundle"),
        }
        assert_eq!(store.list_packets("peer.example").unwrap().len(), 1);
    }
}
