/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Key-exchange coordinator (spec §4.9). When the resolver reports a
//! peer domain as **unknown** or **no-fingerprint**, a bare bootstrap
//! message carrying the local metadata public key is sent directly —
//! this message is never bundled or padded, breaking the chicken-and-
//! egg problem of needing a key to send the first bundle.

use directory::{KeyRequest, KeyRequestKind, KeyRequestQueue};
use mail_builder::MessageBuilder;

use crate::{
    notice::{emit_operator_notice, NoticeKind},
    relay::RelayAdapter,
};

/// Supported metadata-encryption algorithms advertised in the
/// `Accepted-Crypto-Software` header (spec §6 "Key-exchange message").
pub const ACCEPTED_CRYPTO_SOFTWARE: &str = "openpgp";

pub struct KeyExchangeCoordinator<'a> {
    relay: &'a dyn RelayAdapter,
    local_domain: &'a str,
}

impl<'a> KeyExchangeCoordinator<'a> {
    pub fn new(relay: &'a dyn RelayAdapter, local_domain: &'a str) -> Self {
        KeyExchangeCoordinator { relay, local_domain }
    }

    /// Drains `queue` and, for each `KeyExchange` request, sends a
    /// bootstrap message to the peer's metadata address (spec §4.9).
    /// `FingerprintSync` and `PrivateKeyCreation` requests name external
    /// key-management work (a Non-goal, spec §1) and are only
    /// acknowledged here so they do not pile up every cycle — the
    /// external collaborator that actually fetches or creates the key
    /// is expected to drive its own retry via the directory crate's
    /// contact records.
    pub fn run(&self, queue: &KeyRequestQueue, local_metadata_addr: &str, local_public_key_armored: &[u8]) {
        for request in queue.drain() {
            match request.kind {
                KeyRequestKind::KeyExchange => {
                    self.send_bootstrap(&request, local_metadata_addr, local_public_key_armored);
                }
                KeyRequestKind::FingerprintSync | KeyRequestKind::PrivateKeyCreation => {
                    tracing::debug!(
                        domain = %request.domain,
                        kind = ?request.kind,
                        "key request handed to external key-management collaborator"
                    );
                }
            }
            queue.acknowledge(request.kind, &request.domain);
        }
    }

    fn send_bootstrap(&self, request: &KeyRequest, local_metadata_addr: &str, local_public_key_armored: &[u8]) {
        let peer_metadata_addr =
            common::addresses::metadata_address(domain_user_of(local_metadata_addr), &request.domain);

        let message = build_bootstrap_message(local_metadata_addr, &peer_metadata_addr, local_public_key_armored);

        match self.relay.send(&message, local_metadata_addr, &peer_metadata_addr) {
            Ok(()) => {
                tracing::info!(domain = %request.domain, "sent metadata key-exchange bootstrap message");
            }
            Err(err) => {
                emit_operator_notice(
                    NoticeKind::KeyExchangeFailure,
                    self.local_domain,
                    &format!("failed to send key exchange to {}: {err}", request.domain),
                );
            }
        }
    }
}

fn domain_user_of(address: &str) -> &str {
    address.split_once('@').map(|(user, _)| user).unwrap_or(address)
}

/// Builds the zero-body bootstrap message (spec §4.9, §6 "Key-exchange
/// message"): headers carry the armored public key block as `Name:
/// value` pairs plus `Accepted-Crypto-Software`, matching
/// `original_source/goodcrypto/mail/message/metadata.py`'s
/// `line.partition(': ')` approach — one header per armor line rather
/// than the whole multi-line block crammed into a single header.
fn build_bootstrap_message(local_metadata_addr: &str, peer_metadata_addr: &str, armored_key: &[u8]) -> Vec<u8> {
    let key_text = String::from_utf8_lossy(armored_key);
    let mut builder = MessageBuilder::new()
        .from(local_metadata_addr)
        .to(peer_metadata_addr)
        .subject("Metadata key exchange")
        .header("Accepted-Crypto-Software", ACCEPTED_CRYPTO_SOFTWARE);

    for line in key_text.lines() {
        let (name, value) = match line.split_once(": ") {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => ("Public-Key".to_string(), line.to_string()),
        };
        builder = builder.header(name, value);
    }

    builder.text_body("").write_to_vec().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_double::RecordingRelay;
    use directory::{KeyRequestKind, KeyRequestQueue};

    #[test]
    fn key_exchange_request_sends_bootstrap_to_peer_metadata_address() {
        let relay = RecordingRelay::new();
        let queue = KeyRequestQueue::new();
        queue.enqueue(KeyRequestKind::KeyExchange, "peer.example");

        let coordinator = KeyExchangeCoordinator::new(&relay, "local.example");
        coordinator.run(&queue, "metadata-key@local.example", b"-----BEGIN PGP PUBLIC KEY-----");

        let sent = relay.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "metadata-key@peer.example");
        assert_eq!(sent[0].from, "metadata-key@local.example");
    }

    #[test]
    fn armored_key_is_split_into_header_lines() {
        let armored = b"-----BEGIN PGP PUBLIC KEY BLOCK-----\nVersion: 1\nmQENBF==\n-----END PGP PUBLIC KEY BLOCK-----\n";
        let message = build_bootstrap_message("metadata-key@local.example", "metadata-key@peer.example", armored);
        let text = String::from_utf8(message).unwrap();

        // One armor line became its own `Name: value` header...
        assert!(text.contains("Version: 1"));
        // ...and a colon-less armor line falls back to a `Public-Key` header.
        assert!(text.contains("Public-Key:"));
        assert!(text.contains("mQENBF=="));
    }

    #[test]
    fn fingerprint_sync_request_is_acknowledged_without_sending() {
        let relay = RecordingRelay::new();
        let queue = KeyRequestQueue::new();
        queue.enqueue(KeyRequestKind::FingerprintSync, "peer.example");

        let coordinator = KeyExchangeCoordinator::new(&relay, "local.example");
        coordinator.run(&queue, "metadata-key@local.example", b"key");

        assert!(relay.sent().is_empty());
        assert!(queue.enqueue(KeyRequestKind::FingerprintSync, "peer.example"));
    }
}
