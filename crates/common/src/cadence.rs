/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::time::Duration;

/// Bundle release cadence (spec §3: `bundle_frequency`).
///
/// Kept as a closed enum rather than the free-form string the original
/// Python system used, so an invalid configuration value is rejected at
/// load time instead of silently never becoming "ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    /// Minimum wall-clock gap between two successful bundle cycles.
    pub fn interval(&self) -> Duration {
        match self {
            Cadence::Hourly => Duration::from_secs(60 * 60),
            Cadence::Daily => Duration::from_secs(24 * 60 * 60),
            Cadence::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
