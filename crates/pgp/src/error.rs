/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{fmt, io};

#[derive(Debug)]
pub enum CryptoError {
    /// The supplied key material did not parse as an OpenPGP certificate.
    MalformedKey(String),
    /// The certificate has no component usable for encryption (expired,
    /// revoked, or simply lacking an encryption-capable subkey).
    NoEncryptionSubkey,
    /// No local private key is available to sign or decrypt.
    NoLocalIdentity,
    Sequoia(String),
    Io(io::Error),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::MalformedKey(reason) => write!(f, "malformed key: {reason}"),
            CryptoError::NoEncryptionSubkey => {
                write!(f, "certificate has no usable encryption subkey")
            }
            CryptoError::NoLocalIdentity => write!(f, "no local metadata private key loaded"),
            CryptoError::Sequoia(reason) => write!(f, "openpgp error: {reason}"),
            CryptoError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<io::Error> for CryptoError {
    fn from(err: io::Error) -> Self {
        CryptoError::Io(err)
    }
}

impl From<anyhow::Error> for CryptoError {
    fn from(err: anyhow::Error) -> Self {
        CryptoError::Sequoia(err.to_string())
    }
}
