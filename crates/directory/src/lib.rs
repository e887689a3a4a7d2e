/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metadata address/key resolver (spec §4.2). Produces the well-known
//! local mailbox for any domain, classifies peer-domain readiness, and
//! maintains the key-request queue the key-exchange coordinator (spec
//! §4.9) drains.

pub mod book;
pub mod contact;
pub mod requests;

pub use book::{MetadataAddressBook, ResolveLocalOutcome, ResolvePeerOutcome};
pub use contact::{DomainMetadataIdentity, LocalIdentity, PeerContact};
pub use requests::{KeyRequest, KeyRequestKind, KeyRequestQueue};
