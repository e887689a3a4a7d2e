/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration loader.
//!
//! The teacher parses a flat key/value property table
//! (`utils::config::Config::property`, see
//! `crates/common/src/config/inner.rs` in the teacher repo). That crate
//! is not part of this workspace, so the same flat-table shape is backed
//! here by `serde` + `toml`, which every crate in the corpus already
//! depends on (see SPEC_FULL.md §A.3).

use std::{fmt, path::Path};

use crate::cadence::Cadence;

/// How the Relay adapter (spec §4.6) hands a finished message to the MTA.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelayMode {
    /// Direct SMTP submission to the local MTA.
    Smtp { host: String, port: u16 },
    /// Sendmail-compatible subprocess invocation (`-f from -- to`).
    Sendmail { path: String },
}

impl Default for RelayMode {
    fn default() -> Self {
        RelayMode::Sendmail {
            path: "/usr/sbin/sendmail".to_string(),
        }
    }
}

/// The configuration options enumerated in spec §3, plus the ambient
/// fields a standalone binary needs (store root, local domain, relay
/// mode, lock file, scheduler period).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GatewayConfig {
    /// Master enable for metadata encryption.
    #[serde(default)]
    pub encrypt_metadata: bool,

    /// Enables the bundling & padding subsystem.
    #[serde(default)]
    pub bundle_and_pad: bool,

    /// Cadence at which the scheduler releases a bundle per domain.
    pub bundle_frequency: Cadence,

    /// Fixed padded size every emitted bundle must reach (bytes).
    pub bundled_message_max_size: u64,

    /// Attach a DKIM signature to the outer bundle.
    #[serde(default)]
    pub dkim_sign: bool,

    /// Reject peer metadata keys that are not marked verified.
    #[serde(default)]
    pub require_key_verified: bool,

    /// Local domain this gateway protects metadata for.
    pub local_domain: String,

    /// Local part of every metadata address (spec §6: "a fixed
    /// well-known identifier shared by all deployments").
    #[serde(default = "default_domain_user")]
    pub metadata_domain_user: String,

    /// Root directory of the packet queue (spec §3 "Queue directory").
    pub queue_root: std::path::PathBuf,

    /// How finished carriers/bounces/key-exchange messages reach the MTA.
    #[serde(default)]
    pub relay: RelayMode,

    /// Path to the exclusive process lock file (spec §5: "Two scheduler
    /// instances must not run concurrently").
    pub lock_file: std::path::PathBuf,

    /// Overrides the scheduler's wake-up period; defaults to one tenth
    /// of the configured cadence, floored at 10 minutes as in the
    /// teacher's own test-mode/production split (spec §4.8).
    pub scheduler_period_secs: Option<u64>,

    /// Subject tag prepended to bounce notices (spec §6).
    #[serde(default = "default_error_tag")]
    pub error_tag: String,
}

fn default_domain_user() -> String {
    "metadata-key".to_string()
}

fn default_error_tag() -> String {
    "[undeliverable]".to_string()
}

impl GatewayConfig {
    /// `bundle_message_kb` (spec §3): the human-readable form of
    /// `bundled_message_max_size`, used only in bounce notice text.
    pub fn bundle_message_kb(&self) -> u64 {
        self.bundled_message_max_size / 1024
    }

    pub fn ready_to_bundle(&self) -> bool {
        self.encrypt_metadata && self.bundle_and_pad
    }

    pub fn local_metadata_address(&self) -> String {
        crate::addresses::metadata_address(&self.metadata_domain_user, &self.local_domain)
    }

    pub fn scheduler_period(&self) -> std::time::Duration {
        let secs = self.scheduler_period_secs.unwrap_or_else(|| {
            let tenth = self.bundle_frequency.interval().as_secs() / 10;
            tenth.max(600)
        });
        std::time::Duration::from_secs(secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "failed to read configuration file: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse configuration: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl GatewayConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

#[cfg(feature = "test_mode")]
impl GatewayConfig {
    /// Builds a minimal, ready-to-bundle configuration rooted at
    /// `queue_root`, for use by integration tests.
    pub fn for_test(queue_root: std::path::PathBuf, max_size: u64) -> Self {
        GatewayConfig {
            encrypt_metadata: true,
            bundle_and_pad: true,
            bundle_frequency: Cadence::Hourly,
            bundled_message_max_size: max_size,
            dkim_sign: false,
            require_key_verified: false,
            local_domain: "local.example".to_string(),
            metadata_domain_user: default_domain_user(),
            queue_root,
            relay: RelayMode::Sendmail {
                path: "/bin/true".to_string(),
            },
            lock_file: std::env::temp_dir().join("gateway-test.lock"),
            scheduler_period_secs: Some(1),
            error_tag: default_error_tag(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            encrypt_metadata = true
            bundle_and_pad = true
            bundle_frequency = "daily"
            bundled_message_max_size = 65536
            local_domain = "example.com"
            queue_root = "/var/lib/gateway/queue"
            lock_file = "/var/lib/gateway/gateway.lock"

            [relay]
            kind = "smtp"
            host = "127.0.0.1"
            port = 25
        "#;
        let cfg: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.bundle_message_kb(), 64);
        assert!(cfg.ready_to_bundle());
        assert_eq!(cfg.local_metadata_address(), "metadata-key@example.com");
    }
}
