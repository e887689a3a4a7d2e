/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    contact::{DomainMetadataIdentity, LocalIdentity, PeerContact},
    requests::{KeyRequestKind, KeyRequestQueue},
};

/// Outcome of resolving a peer domain's metadata key (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvePeerOutcome {
    /// Ready to bundle: `(address, fingerprint)`.
    Ready { address: String, fingerprint: String },
    /// No contact record at all — one was just created and a key
    /// exchange was requested.
    Unknown,
    /// Contact exists but the keyring has not synced a fingerprint yet.
    NoFingerprint,
    /// Fingerprint present but inactive, or unverified while
    /// `require_key_verified` is set.
    InactiveOrUnverified,
}

/// Outcome of resolving the local side's own metadata identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveLocalOutcome {
    Ready { address: String },
    MissingPrivateKey,
}

/// The metadata address/key resolver (spec §4.2). Caches resolved
/// identities for the duration of one `BundleAndPad()` pass
/// (SPEC_FULL.md §B.2, grounded on `original_source/goodcrypto/mail/
/// message/metadata.py`).
pub struct MetadataAddressBook {
    domain_user: String,
    local_domain: String,
    contacts: RwLock<AHashMap<String, PeerContact>>,
    local_identities: RwLock<AHashMap<String, LocalIdentity>>,
    cycle_cache: RwLock<AHashMap<String, DomainMetadataIdentity>>,
    pub requests: KeyRequestQueue,
}

impl MetadataAddressBook {
    pub fn new(domain_user: impl Into<String>, local_domain: impl Into<String>) -> Self {
        MetadataAddressBook {
            domain_user: domain_user.into(),
            local_domain: local_domain.into(),
            contacts: RwLock::new(AHashMap::new()),
            local_identities: RwLock::new(AHashMap::new()),
            cycle_cache: RwLock::new(AHashMap::new()),
            requests: KeyRequestQueue::new(),
        }
    }

    /// Clears the per-cycle identity cache; call once at the start of
    /// every `BundleAndPad()` pass.
    pub fn begin_cycle(&self) {
        self.cycle_cache.write().clear();
    }

    pub fn identity_for(&self, domain: &str) -> DomainMetadataIdentity {
        if let Some(identity) = self.cycle_cache.read().get(domain) {
            return identity.clone();
        }
        let identity = DomainMetadataIdentity::derive(&self.domain_user, domain);
        self.cycle_cache
            .write()
            .insert(domain.to_string(), identity.clone());
        identity
    }

    /// Resolves readiness for sending to `domain` (spec §4.2). The
    /// `algorithm` names the encryption algorithm the outer bundle would
    /// use; it selects which fingerprint family is consulted but this
    /// implementation tracks a single fingerprint per contact, matching
    /// the one-metadata-keypair-per-domain model of spec §3.
    pub fn resolve_peer(&self, domain: &str, require_verified: bool) -> ResolvePeerOutcome {
        {
            let contacts = self.contacts.read();
            match contacts.get(domain) {
                None => {}
                Some(contact) => match &contact.fingerprint {
                    None => {
                        self.requests
                            .enqueue(KeyRequestKind::FingerprintSync, domain);
                        return ResolvePeerOutcome::NoFingerprint;
                    }
                    Some(fingerprint) => {
                        if contact.usable(require_verified) {
                            return ResolvePeerOutcome::Ready {
                                address: self.identity_for(domain).address,
                                fingerprint: fingerprint.clone(),
                            };
                        }
                        return ResolvePeerOutcome::InactiveOrUnverified;
                    }
                },
            }
        }

        // Unknown: create a tagged contact record and request a key
        // exchange (spec §4.2 "unknown").
        self.contacts
            .write()
            .insert(domain.to_string(), PeerContact::unknown(domain));
        self.requests
            .enqueue(KeyRequestKind::KeyExchange, domain);
        ResolvePeerOutcome::Unknown
    }

    /// Resolves the local identity, requiring a private passcode to
    /// exist (spec §4.2 "Mirror resolver for the local side").
    pub fn resolve_local(&self) -> ResolveLocalOutcome {
        let domain = self.local_domain.clone();
        let exists = {
            let identities = self.local_identities.read();
            identities.get(&domain).cloned()
        };
        match exists {
            Some(identity) if identity.has_private_passcode => ResolveLocalOutcome::Ready {
                address: self.identity_for(&domain).address,
            },
            Some(_) => {
                self.requests
                    .enqueue(KeyRequestKind::PrivateKeyCreation, &domain);
                ResolveLocalOutcome::MissingPrivateKey
            }
            None => {
                self.local_identities
                    .write()
                    .insert(domain.clone(), LocalIdentity::new(&domain));
                self.requests
                    .enqueue(KeyRequestKind::PrivateKeyCreation, &domain);
                ResolveLocalOutcome::MissingPrivateKey
            }
        }
    }

    /// Test/bootstrap helper: installs or replaces a peer contact
    /// record directly, bypassing the unknown/key-exchange path.
    pub fn upsert_peer_contact(&self, contact: PeerContact) {
        self.contacts
            .write()
            .insert(contact.domain.clone(), contact);
    }

    /// Test/bootstrap helper: installs the local identity's private
    /// passcode directly.
    pub fn set_local_private_passcode(&self, has_passcode: bool) {
        let domain = self.local_domain.clone();
        let mut identities = self.local_identities.write();
        let identity = identities
            .entry(domain.clone())
            .or_insert_with(|| LocalIdentity::new(&domain));
        identity.has_private_passcode = has_passcode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_domain_triggers_key_exchange_request() {
        let book = MetadataAddressBook::new("metadata-key", "local.example");
        assert_eq!(
            book.resolve_peer("peer.example", false),
            ResolvePeerOutcome::Unknown
        );
        let requests = book.requests.drain();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, KeyRequestKind::KeyExchange);
    }

    #[test]
    fn contact_without_fingerprint_is_not_ready() {
        let book = MetadataAddressBook::new("metadata-key", "local.example");
        book.upsert_peer_contact(PeerContact {
            domain: "peer.example".to_string(),
            fingerprint: None,
            active: true,
            verified: true,
            auto_created: false,
        });
        assert_eq!(
            book.resolve_peer("peer.example", false),
            ResolvePeerOutcome::NoFingerprint
        );
    }

    #[test]
    fn inactive_contact_is_not_ready() {
        let book = MetadataAddressBook::new("metadata-key", "local.example");
        book.upsert_peer_contact(PeerContact {
            domain: "peer.example".to_string(),
            fingerprint: Some("FPR".to_string()),
            active: false,
            verified: true,
            auto_created: false,
        });
        assert_eq!(
            book.resolve_peer("peer.example", false),
            ResolvePeerOutcome::InactiveOrUnverified
        );
    }

    #[test]
    fn unverified_contact_rejected_when_required() {
        let book = MetadataAddressBook::new("metadata-key", "local.example");
        book.upsert_peer_contact(PeerContact {
            domain: "peer.example".to_string(),
            fingerprint: Some("FPR".to_string()),
            active: true,
            verified: false,
            auto_created: false,
        });
        assert_eq!(
            book.resolve_peer("peer.example", true),
            ResolvePeerOutcome::InactiveOrUnverified
        );
        assert_eq!(
            book.resolve_peer("peer.example", false),
            ResolvePeerOutcome::Ready {
                address: "metadata-key@peer.example".to_string(),
                fingerprint: "FPR".to_string(),
            }
        );
    }

    #[test]
    fn local_identity_requires_private_passcode() {
        let book = MetadataAddressBook::new("metadata-key", "local.example");
        assert_eq!(
            book.resolve_local(),
            ResolveLocalOutcome::MissingPrivateKey
        );
        book.set_local_private_passcode(true);
        assert_eq!(
            book.resolve_local(),
            ResolveLocalOutcome::Ready {
                address: "metadata-key@local.example".to_string(),
            }
        );
    }
}
