/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metadata encryption backend (spec §4.5). Key *management* — fetching,
//! verifying, or rotating a peer's metadata key — is a Non-goal (spec
//! §1); this crate only performs the encryption operation once a usable
//! public key has already been resolved by `directory`.

pub mod engine;
pub mod error;
pub mod keyring;

#[cfg(feature = "test_mode")]
pub mod test_double;

pub use engine::{decrypt_with, MetadataCrypto, SequoiaMetadataCrypto};
pub use error::CryptoError;
pub use keyring::{Keyring, LocalKeyMaterial};

#[cfg(feature = "test_mode")]
pub use test_double::FakeMetadataCrypto;
