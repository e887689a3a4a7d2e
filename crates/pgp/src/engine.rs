/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use sequoia_openpgp::{
    armor,
    cert::Cert,
    parse::{stream::DecryptorBuilder, Parse},
    policy::StandardPolicy,
    serialize::stream::{Armorer, Encryptor, LiteralWriter, Message, Signer},
};
use std::io::Write;

use crate::{error::CryptoError, keyring::Keyring};

/// The one cryptographic operation the Wrapper/encryptor (spec §4.5)
/// needs: take the already-assembled, already-padded bundle bytes and
/// return them encrypted under the peer's metadata public key.
///
/// Abstracted behind a trait so the bundler core never names a concrete
/// OpenPGP implementation directly — useful in tests (an identity
/// "crypto" double that just tags bytes) and in case the backend is
/// swapped without touching `crates/bundler`.
pub trait MetadataCrypto: Send + Sync {
    /// Encrypts `plaintext` to the certificate identified by
    /// `recipient_fingerprint`, signing with the local identity for
    /// `local_domain` when one has been loaded.
    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_fingerprint: &str,
        local_domain: &str,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Imports an armored OpenPGP certificate as the key for `domain`,
    /// returning its fingerprint.
    fn import_public_key(&self, domain: &str, armored: &[u8]) -> Result<String, CryptoError>;

    /// Fingerprint of the certificate currently on file for `domain`,
    /// if any.
    fn fingerprint(&self, domain: &str) -> Option<String>;
}

/// `MetadataCrypto` backed by `sequoia-openpgp`, RFC 3156 compliant
/// output (the outer bundle is ASCII-armored OpenPGP, matching the
/// `application/pgp-encrypted` + `application/octet-stream` MIME pair
/// the Wrapper assembles around it).
pub struct SequoiaMetadataCrypto {
    keyring: Keyring,
    policy: StandardPolicy<'static>,
}

impl SequoiaMetadataCrypto {
    pub fn new() -> Self {
        SequoiaMetadataCrypto {
            keyring: Keyring::new(),
            policy: StandardPolicy::new(),
        }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    fn peer_cert_by_fingerprint(&self, fingerprint: &str) -> Option<Cert> {
        // The keyring indexes by domain; `directory` hands us a
        // fingerprint it already matched against that domain's cert, so
        // a linear scan over the small number of peer domains resolved
        // in a cycle is cheap enough and avoids a second index.
        self.keyring
            .peer_cert_by_predicate(|cert| cert.fingerprint().to_hex() == fingerprint)
    }
}

impl Default for SequoiaMetadataCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCrypto for SequoiaMetadataCrypto {
    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_fingerprint: &str,
        local_domain: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let recipient_cert = self
            .peer_cert_by_fingerprint(recipient_fingerprint)
            .ok_or(CryptoError::NoEncryptionSubkey)?;
        let recipients = recipient_cert
            .keys()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_transport_encryption();

        let signer_cert = self
            .keyring
            .local_cert(local_domain)
            .ok_or(CryptoError::NoLocalIdentity)?;
        let signing_key = signer_cert
            .keys()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .secret()
            .next()
            .ok_or(CryptoError::NoLocalIdentity)?;
        let signing_keypair = signing_key
            .key()
            .clone()
            .into_keypair()
            .map_err(CryptoError::from)?;

        let mut sink = Vec::new();
        {
            let message = Message::new(&mut sink);
            let message = Armorer::new(message)
                .kind(armor::Kind::Message)
                .build()
                .map_err(anyhow::Error::from)?;
            let message = Encryptor::for_recipients(message, recipients)
                .build()
                .map_err(anyhow::Error::from)?;
            let message = Signer::new(message, signing_keypair)
                .build()
                .map_err(anyhow::Error::from)?;
            let mut message = LiteralWriter::new(message)
                .build()
                .map_err(anyhow::Error::from)?;
            message.write_all(plaintext)?;
            message.finalize().map_err(anyhow::Error::from)?;
        }

        Ok(sink)
    }

    fn import_public_key(&self, domain: &str, armored: &[u8]) -> Result<String, CryptoError> {
        self.keyring.import_peer_cert(domain, armored)
    }

    fn fingerprint(&self, domain: &str) -> Option<String> {
        self.keyring
            .peer_cert(domain)
            .map(|cert| cert.fingerprint().to_hex())
    }
}

/// Decrypts a previously-sealed bundle; used only by the test harness
/// and by operators verifying a relayed bundle out of band, never by
/// the bundler's own send path.
pub fn decrypt_with(
    local_cert: &Cert,
    policy: &StandardPolicy,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    use sequoia_openpgp::parse::stream::{
        DecryptionHelper, MessageStructure, VerificationHelper,
    };
    use sequoia_openpgp::{Fingerprint, KeyHandle};

    struct Helper<'a> {
        cert: &'a Cert,
    }

    impl<'a> VerificationHelper for Helper<'a> {
        fn get_certs(&mut self, _ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
            Ok(vec![self.cert.clone()])
        }
        fn check(&mut self, _structure: MessageStructure) -> sequoia_openpgp::Result<()> {
            Ok(())
        }
    }

    impl<'a> DecryptionHelper for Helper<'a> {
        fn decrypt<D>(
            &mut self,
            pkesks: &[sequoia_openpgp::packet::PKESK],
            _skesks: &[sequoia_openpgp::packet::SKESK],
            sym_algo: Option<sequoia_openpgp::types::SymmetricAlgorithm>,
            mut decrypt: D,
        ) -> sequoia_openpgp::Result<Option<Fingerprint>>
        where
            D: FnMut(
                sequoia_openpgp::types::SymmetricAlgorithm,
                &sequoia_openpgp::crypto::SessionKey,
            ) -> bool,
        {
            let policy = StandardPolicy::new();
            for key in self
                .cert
                .keys()
                .with_policy(&policy, None)
                .for_transport_encryption()
                .secret()
            {
                let mut keypair = match key.key().clone().into_keypair() {
                    Ok(keypair) => keypair,
                    Err(_) => continue,
                };
                for pkesk in pkesks {
                    if let Some((algo, session_key)) = pkesk.decrypt(&mut keypair, sym_algo) {
                        if decrypt(algo, &session_key) {
                            return Ok(Some(key.fingerprint()));
                        }
                    }
                }
            }
            Ok(None)
        }
    }

    let mut helper = Helper { cert: local_cert };
    let mut decryptor = DecryptorBuilder::from_bytes(ciphertext)
        .map_err(anyhow::Error::from)?
        .with_policy(policy, None, &mut helper)
        .map_err(anyhow::Error::from)?;
    let mut plaintext = Vec::new();
    std::io::copy(&mut decryptor, &mut plaintext)?;
    Ok(plaintext)
}
