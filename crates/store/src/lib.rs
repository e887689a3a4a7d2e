/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The packet store (spec §4.1): a durable, per-peer-domain append queue
//! of finalized outbound messages. Producers (the per-message encrypt
//! pipeline, external to this crate) call [`QueueStore::packetize`]; the
//! bundler reads with [`QueueStore::list_domains`] /
//! [`QueueStore::list_packets`] and deletes with [`QueueStore::remove`]
//! only after a successful send.

pub mod packet;
pub mod queue;

pub use packet::{Addendum, Packet, PacketReadError};
pub use queue::{PacketizeError, QueueStore};
