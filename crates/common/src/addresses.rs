/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metadata address construction and peer-domain extraction (spec §4.1,
//! §4.2, §6 "Metadata address").

/// Display name stamped on every metadata identity (spec §6).
pub fn metadata_display_name(domain: &str) -> String {
    format!("{domain} domain key (system use only)")
}

/// Builds the well-known local mailbox `<domain-user>@<domain>` for a
/// domain. Pure function — spec §4.2 requires this to be derivable for
/// any domain without I/O.
pub fn metadata_address(domain_user: &str, domain: &str) -> String {
    format!("{domain_user}@{domain}")
}

/// Splits an email address into (local part, domain), lower-casing the
/// domain. Returns `None` if there is no `@` or the local part is empty.
pub fn split_address(address: &str) -> Option<(&str, String)> {
    let (local, domain) = address.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain.to_lowercase()))
}

/// Derives the registrable peer domain from a recipient envelope address
/// (spec §4.1: "Derive `peer_domain` from the recipient envelope").
///
/// Uses the public suffix list so that `user@mail.example.co.uk` and
/// `other@example.co.uk` are bundled as the same peer, rather than
/// splitting naively on the last label.
pub fn peer_domain(recipient: &str) -> Option<String> {
    let (_, domain) = split_address(recipient)?;
    match psl::domain(domain.as_bytes()) {
        Some(d) => Some(String::from_utf8_lossy(d.as_bytes()).into_owned()),
        None => Some(domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_metadata_address() {
        assert_eq!(
            metadata_address("metadata", "example.com"),
            "metadata@example.com"
        );
    }

    #[test]
    fn display_name_matches_spec() {
        assert_eq!(
            metadata_display_name("example.com"),
            "example.com domain key (system use only)"
        );
    }

    #[test]
    fn peer_domain_strips_subdomain() {
        assert_eq!(
            peer_domain("user@mail.example.com").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn peer_domain_rejects_missing_at() {
        assert_eq!(peer_domain("not-an-address"), None);
    }
}
