/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::collections::HashMap;

use parking_lot::RwLock;
use sequoia_openpgp::{parse::Parse, Cert};

use crate::error::CryptoError;

/// A loaded private key for one of our own metadata identities, kept
/// around for the lifetime of the process (spec §4.2 "has a private
/// passcode").
pub struct LocalKeyMaterial {
    pub domain: String,
    pub cert: Cert,
}

impl LocalKeyMaterial {
    pub fn from_bytes(domain: impl Into<String>, armored: &[u8]) -> Result<Self, CryptoError> {
        let cert = Cert::from_bytes(armored)
            .map_err(|err| CryptoError::MalformedKey(err.to_string()))?;
        Ok(LocalKeyMaterial {
            domain: domain.into(),
            cert,
        })
    }
}

/// In-memory cache of resolved peer certificates, keyed by domain.
/// Fetching and verifying a successor certificate is a Non-goal (spec
/// §1) left to an external collaborator; this keyring only holds
/// whatever certificate `directory` has already decided is usable.
#[derive(Default)]
pub struct Keyring {
    peers: RwLock<HashMap<String, Cert>>,
    local: RwLock<HashMap<String, Cert>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_peer_cert(&self, domain: &str, armored: &[u8]) -> Result<String, CryptoError> {
        let cert = Cert::from_bytes(armored)
            .map_err(|err| CryptoError::MalformedKey(err.to_string()))?;
        let fingerprint = cert.fingerprint().to_hex();
        self.peers.write().insert(domain.to_string(), cert);
        Ok(fingerprint)
    }

    pub fn peer_cert(&self, domain: &str) -> Option<Cert> {
        self.peers.read().get(domain).cloned()
    }

    /// Finds a peer certificate by an arbitrary predicate (used to look
    /// a cert up by fingerprint once `directory` has already resolved
    /// the domain-to-fingerprint mapping).
    pub fn peer_cert_by_predicate(&self, predicate: impl Fn(&Cert) -> bool) -> Option<Cert> {
        self.peers
            .read()
            .values()
            .find(|cert| predicate(cert))
            .cloned()
    }

    pub fn install_local(&self, key: LocalKeyMaterial) {
        self.local.write().insert(key.domain, key.cert);
    }

    pub fn local_cert(&self, domain: &str) -> Option<Cert> {
        self.local.read().get(domain).cloned()
    }
}
