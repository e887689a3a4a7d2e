/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Operator and end-user notices (spec §6 "Error/bounce notice", SPEC_FULL
//! §B.5, grounded on `original_source/goodcrypto/mail/utils/notices.py`).
//! The original formats a distinct subject per notice kind; kept here as
//! a closed enum rather than a free-form string.

use mail_builder::MessageBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A packet was permanently too large to ever fit a bundle.
    Bounce,
    /// A peer domain's metadata key is missing, unverified, or inactive.
    DomainFailure,
    /// The key-exchange bootstrap message itself failed to send.
    KeyExchangeFailure,
}

impl NoticeKind {
    fn subject(self, error_tag: &str) -> String {
        match self {
            NoticeKind::Bounce => format!("{error_tag} Message too large to send"),
            NoticeKind::DomainFailure => format!("{error_tag} Unable to reach metadata key for domain"),
            NoticeKind::KeyExchangeFailure => format!("{error_tag} Key exchange failed"),
        }
    }
}

/// Logs an operator-visible notice. Exception reporting/alerting is an
/// external collaborator (spec §1); this only emits the structured
/// `tracing` event the collaborator is expected to subscribe to.
pub fn emit_operator_notice(kind: NoticeKind, domain: &str, detail: &str) {
    match kind {
        NoticeKind::Bounce => tracing::warn!(domain, detail, "bounce notice"),
        NoticeKind::DomainFailure => tracing::warn!(domain, detail, "domain failure notice"),
        NoticeKind::KeyExchangeFailure => {
            tracing::error!(domain, detail, "key exchange failure notice")
        }
    }
}

/// Builds the bounce message sent back to the original sender of an
/// oversize packet (spec §6: `mailer-daemon@<local-domain>`, subject
/// begins with the configured error tag, human-readable body).
pub fn build_bounce_message(
    local_domain: &str,
    error_tag: &str,
    original_sender: &str,
    bundle_message_kb: u64,
) -> Vec<u8> {
    let from = format!("mailer-daemon@{local_domain}");
    let body = format!(
        "Message too large to send. It must be {bundle_message_kb} KB or smaller."
    );
    MessageBuilder::new()
        .from(from.as_str())
        .to(original_sender)
        .subject(NoticeKind::Bounce.subject(error_tag))
        .text_body(body)
        .write_to_vec()
        .unwrap_or_default()
}
