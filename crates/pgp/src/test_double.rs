/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! A `MetadataCrypto` double that tags bytes instead of actually
//! encrypting them, so unit and integration tests can assert on
//! plaintext leakage without paying for real OpenPGP key generation.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{error::CryptoError, engine::MetadataCrypto};

pub struct FakeMetadataCrypto {
    fingerprints: RwLock<HashMap<String, String>>,
}

impl FakeMetadataCrypto {
    pub fn new() -> Self {
        FakeMetadataCrypto {
            fingerprints: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, domain: &str, fingerprint: &str) {
        self.fingerprints
            .write()
            .insert(domain.to_string(), fingerprint.to_string());
    }
}

impl Default for FakeMetadataCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCrypto for FakeMetadataCrypto {
    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_fingerprint: &str,
        _local_domain: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut out = format!("FAKE-PGP:{recipient_fingerprint}:").into_bytes();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    fn import_public_key(&self, domain: &str, armored: &[u8]) -> Result<String, CryptoError> {
        let fingerprint = format!("FAKEFPR-{}", armored.len());
        self.register(domain, &fingerprint);
        Ok(fingerprint)
    }

    fn fingerprint(&self, domain: &str) -> Option<String> {
        self.fingerprints.read().get(domain).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_encrypt_tags_ciphertext_with_fingerprint() {
        let crypto = FakeMetadataCrypto::new();
        let out = crypto.encrypt(b"hello", "ABCD1234", "local.example").unwrap();
        assert!(out.starts_with(b"FAKE-PGP:ABCD1234:"));
        assert!(out.ends_with(b"hello"));
    }

    #[test]
    fn import_then_fingerprint_round_trips() {
        let crypto = FakeMetadataCrypto::new();
        let fpr = crypto.import_public_key("peer.example", b"armored-key-bytes").unwrap();
        assert_eq!(crypto.fingerprint("peer.example"), Some(fpr));
    }
}
