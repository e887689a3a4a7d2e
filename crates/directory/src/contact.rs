/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::addresses::{metadata_address, metadata_display_name};

/// Per-domain synthetic mailbox used solely as a bundle's visible
/// envelope (spec §3 "DomainMetadataIdentity").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMetadataIdentity {
    pub domain: String,
    pub address: String,
    pub display_name: String,
}

impl DomainMetadataIdentity {
    pub fn derive(domain_user: &str, domain: &str) -> Self {
        DomainMetadataIdentity {
            domain: domain.to_string(),
            address: metadata_address(domain_user, domain),
            display_name: metadata_display_name(domain),
        }
    }
}

/// A contact record for a peer domain's metadata key
/// (SPEC_FULL.md §B.3, grounded on `original_source/goodcrypto/mail/
/// contacts.py`). `active` and `verified` are tracked independently:
/// a key counts as usable only when active, and, if
/// `require_key_verified` is set, also verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerContact {
    pub domain: String,
    pub fingerprint: Option<String>,
    pub active: bool,
    pub verified: bool,
    /// Set when the contact was auto-created on first contact and
    /// tagged `MESSAGE_HEADER` (spec §4.2 "unknown").
    pub auto_created: bool,
}

impl PeerContact {
    pub fn unknown(domain: &str) -> Self {
        PeerContact {
            domain: domain.to_string(),
            fingerprint: None,
            active: false,
            verified: false,
            auto_created: true,
        }
    }

    pub fn usable(&self, require_verified: bool) -> bool {
        self.active && (!require_verified || self.verified)
    }
}

/// The local side's metadata identity: it additionally requires a
/// private passcode before it can sign/decrypt anything (spec §4.2
/// "Mirror resolver for the local side").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub domain: String,
    pub fingerprint: Option<String>,
    pub has_private_passcode: bool,
}

impl LocalIdentity {
    pub fn new(domain: &str) -> Self {
        LocalIdentity {
            domain: domain.to_string(),
            fingerprint: None,
            has_private_passcode: false,
        }
    }
}
