/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Wrapper/encryptor (spec §4.5): assembles the padded carrier into
//! a `multipart/mixed` MIME container, stamps the metadata-only
//! envelope headers, encrypts the whole thing under the peer's
//! metadata public key, and optionally attaches a DKIM signature over
//! the outer bundle.

use std::fmt;

use mail_builder::{
    mime::{BodyPart, MimePart},
    MessageBuilder,
};
use pgp::MetadataCrypto;
use rand::RngCore;

use crate::bundle::Bundle;

#[derive(Debug)]
pub enum WrapError {
    /// Every recipient algorithm failed to encrypt (spec §4.5 step 3):
    /// no partial/plaintext bundle is ever emitted.
    EncryptionFailed(String),
    Build(String),
    Dkim(String),
}

impl fmt::Display for WrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapError::EncryptionFailed(reason) => write!(f, "bundle encryption failed: {reason}"),
            WrapError::Build(reason) => write!(f, "failed to serialize carrier: {reason}"),
            WrapError::Dkim(reason) => write!(f, "failed to DKIM-sign bundle: {reason}"),
        }
    }
}

impl std::error::Error for WrapError {}

/// A fully wrapped, encrypted bundle ready for the Relay adapter.
pub struct WrappedBundle {
    pub rfc5322_bytes: Vec<u8>,
    pub from: String,
    pub to: String,
    /// Algorithms actually used to encrypt the outer carrier (spec §3
    /// "Bundle.metadata_crypted_with").
    pub metadata_crypted_with: Vec<String>,
}

/// Narrow seam for DKIM signing so `crates/bundler` never names
/// `mail_auth`'s concrete signer type outside this module; kept as a
/// trait purely so tests can stub it without a real key.
pub trait DkimSign: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<String, String>;
}

/// Grounded on `original_source/goodcrypto/mail/message/metadata.py`'s
/// multipart assembly and RFC 3156's PGP/MIME part pairing
/// (`application/pgp-encrypted` + `application/octet-stream`), cross
/// checked against `other_examples/3992c2c7_d-e-s-o-maily`.
pub struct Wrapper<'a> {
    crypto: &'a dyn MetadataCrypto,
    dkim_sign: bool,
    dkim_signer: Option<&'a dyn DkimSign>,
}

impl<'a> Wrapper<'a> {
    pub fn new(
        crypto: &'a dyn MetadataCrypto,
        dkim_sign: bool,
        dkim_signer: Option<&'a dyn DkimSign>,
    ) -> Self {
        Wrapper {
            crypto,
            dkim_sign,
            dkim_signer,
        }
    }

    /// Builds, encrypts, and (optionally) DKIM-signs the carrier (spec
    /// §4.5 steps 1-5).
    pub fn wrap(
        &self,
        bundle: &Bundle,
        local_metadata_addr: &str,
        peer_metadata_addr: &str,
        peer_fingerprint: &str,
        local_domain: &str,
    ) -> Result<WrappedBundle, WrapError> {
        let carrier = build_carrier(bundle, local_metadata_addr, peer_metadata_addr)?;

        let ciphertext = self
            .crypto
            .encrypt(&carrier, peer_fingerprint, local_domain)
            .map_err(|err| WrapError::EncryptionFailed(err.to_string()))?;

        let local_name = common::addresses::metadata_display_name(domain_of(local_metadata_addr));
        let peer_name = common::addresses::metadata_display_name(domain_of(peer_metadata_addr));

        let outer = MessageBuilder::new()
            .from((local_name.as_str(), local_metadata_addr))
            .to((peer_name.as_str(), peer_metadata_addr))
            .message_id(generate_message_id(local_metadata_addr))
            .date(chrono::Utc::now().timestamp())
            .body(MimePart::new(
                "application/octet-stream",
                BodyPart::Binary(ciphertext.into()),
            ));

        let mut bytes = outer
            .write_to_vec()
            .map_err(|err| WrapError::Build(err.to_string()))?;

        if self.dkim_sign {
            let signer = self.dkim_signer.ok_or_else(|| {
                WrapError::Dkim("dkim_sign enabled but no signer configured".to_string())
            })?;
            let header = signer.sign(&bytes).map_err(WrapError::Dkim)?;
            let mut signed = header.into_bytes();
            signed.extend_from_slice(&bytes);
            bytes = signed;
        }

        Ok(WrappedBundle {
            rfc5322_bytes: bytes,
            from: local_metadata_addr.to_string(),
            to: peer_metadata_addr.to_string(),
            metadata_crypted_with: vec!["openpgp".to_string()],
        })
    }
}

/// Assembles the padded parts plus the `Original-From`/`Original-To`
/// bookkeeping headers (spec §4.5 step 2) into one serialized
/// `multipart/mixed` carrier, the plaintext input to encryption.
fn build_carrier(
    bundle: &Bundle,
    local_metadata_addr: &str,
    peer_metadata_addr: &str,
) -> Result<Vec<u8>, WrapError> {
    let root = MimePart::new("multipart/mixed", BodyPart::Multipart(bundle.parts.clone()));

    let builder = MessageBuilder::new()
        .from(local_metadata_addr)
        .to(peer_metadata_addr)
        .header("Original-From", local_metadata_addr)
        .header("Original-To", peer_metadata_addr)
        .date(chrono::Utc::now().timestamp())
        .body(root);

    builder
        .write_to_vec()
        .map_err(|err| WrapError::Build(err.to_string()))
}

fn domain_of(address: &str) -> &str {
    address.rsplit_once('@').map(|(_, domain)| domain).unwrap_or(address)
}

/// Message-ID generation: local-part is random (spec §4.5 step 2: "a
/// newly generated" id), domain is the local metadata address's own
/// domain so the id is still traceable to the sending gateway without
/// revealing which user originated the inner message.
fn generate_message_id(local_metadata_addr: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let local = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("<{local}@{}>", domain_of(local_metadata_addr))
}
