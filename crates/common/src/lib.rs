/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Shared types for the metadata bundling & padding gateway: configuration,
//! domain/address helpers, the cadence enum and the single-instance lock
//! file. Everything in this crate is pure plumbing with no knowledge of the
//! packet queue or the bundler itself.

pub mod addresses;
pub mod cadence;
pub mod config;
pub mod lock;
pub mod tracing_init;

pub use addresses::metadata_address;
pub use cadence::Cadence;
pub use config::GatewayConfig;
