/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Bundling and Padding Subsystem (spec §1-§4): the core that
//! collects encrypted outbound messages per peer domain, bundles and
//! pads them to a fixed size, re-encrypts the carrier under a per-
//! domain metadata key, and relays it on a fixed cadence.
//!
//! `GatewayCore` is the aggregate root every other piece hangs off,
//! grounded on the teacher's own `SMTP` struct
//! (`crates/smtp/src/core/mod.rs`) bundling `session`/`queue`/
//! `resolvers`/`report` fields behind one `Arc`.

pub mod bundle;
pub mod history;
pub mod keyexchange;
pub mod notice;
pub mod pad;
pub mod relay;
pub mod scheduler;
pub mod wrap;

pub use bundle::{Bundle, BundleOutcome, Bundler, SelectedPacket};
pub use history::{HistoryRecorder, OutboundRecord};
pub use keyexchange::KeyExchangeCoordinator;
pub use pad::{PadError, Padder};
pub use relay::{relay_for, RelayAdapter, RelayError};
pub use scheduler::{DomainCycleOutcome, GatewayCore, Scheduler};
pub use wrap::{DkimSign, WrapError, Wrapper, WrappedBundle};
