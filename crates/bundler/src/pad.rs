/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Padder (spec §4.4): pads a carrier's parts to exactly
//! `bundled_message_max_size`, using a cryptographically unpredictable,
//! non-blocking byte source so the padding is indistinguishable from
//! genuine ciphertext without the decryption key (spec §9 design note).

use mail_builder::mime::{BodyPart, MimePart};
use ring::rand::{SecureRandom, SystemRandom};

use crate::bundle::{mime_part_serialized_len, Bundle};

#[derive(Debug)]
pub enum PadError {
    Rng,
}

impl std::fmt::Display for PadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to draw padding bytes from the system RNG")
    }
}

impl std::error::Error for PadError {}

pub struct Padder {
    rng: SystemRandom,
}

impl Padder {
    pub fn new() -> Self {
        Padder {
            rng: SystemRandom::new(),
        }
    }

    /// Appends padding parts to `bundle` until its accumulated size is
    /// at least `target`. The contract is "at least `target`, within one
    /// part's base64/MIME envelope overhead" (spec §4.4) — the last draw
    /// may overshoot slightly, which is accepted rather than trimmed.
    pub fn pad(&self, bundle: &mut Bundle, target: u64) -> Result<(), PadError> {
        while bundle.accumulated_size < target {
            let missing = (target - bundle.accumulated_size).max(1) as usize;
            let mut raw = vec![0u8; missing];
            self.rng.fill(&mut raw).map_err(|_| PadError::Rng)?;

            let part = MimePart::new("application/alternative", BodyPart::Binary(raw.clone().into()))
                .transfer_encoding(mail_builder::encoders::encode::Encoding::Base64);

            bundle.accumulated_size += mime_part_serialized_len(raw.len());
            bundle.parts.push(part);
        }
        Ok(())
    }
}

impl Default for Padder {
    fn default() -> Self {
        Self::new()
    }
}
