/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The Scheduler (spec §4.8) and `GatewayCore`, the aggregate struct
//! that owns every durable or long-lived piece of the subsystem: the
//! packet store, the metadata address book, the crypto backend, the
//! relay adapter, and the persisted `date_queue_last_active` timestamp.
//!
//! State machine per cycle (spec §4.8): `idle -> scanning -> (per-domain)
//! building -> padding -> wrapping -> relaying -> recording -> idle`. Any
//! fatal state aborts that domain only; subsequent domains are still
//! attempted within the same cycle.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use common::config::GatewayConfig;
use directory::MetadataAddressBook;
use pgp::MetadataCrypto;
use store::QueueStore;

use crate::{
    bundle::{Bundler, BundleOutcome},
    history::{self, HistoryRecorder},
    keyexchange::KeyExchangeCoordinator,
    notice::{emit_operator_notice, NoticeKind},
    pad::Padder,
    relay::RelayAdapter,
    wrap::{DkimSign, Wrapper},
};

/// Outcome of attempting one peer domain within a single
/// `BundleAndPad()` pass (spec §4.3-§4.9).
#[derive(Debug, PartialEq, Eq)]
pub enum DomainCycleOutcome {
    /// Nothing pending, or every pending packet was still unfinished.
    NothingToSend,
    /// A bundle was built, encrypted, relayed, and recorded.
    Sent { packets: usize },
    /// The peer domain's metadata key was not ready; a key-exchange
    /// bootstrap may have been triggered (spec §4.2/§4.9).
    PeerNotReady,
    /// The local metadata identity has no private passcode yet (spec
    /// §4.2 "Mirror resolver for the local side").
    LocalIdentityNotReady,
    /// Padding, wrapping, or relaying failed; packets remain queued for
    /// the next cycle (spec §4.3 "Fatal failure to encrypt... aborts
    /// this domain").
    Failed(String),
}

/// Aggregate root for the bundling & padding subsystem (spec §2 table),
/// analogous to the teacher's `SMTP` struct
/// (`crates/smtp/src/core/mod.rs`) bundling `session`/`queue`/
/// `resolvers` behind one long-lived value the scheduler task owns.
pub struct GatewayCore {
    pub config: GatewayConfig,
    pub store: QueueStore,
    pub address_book: MetadataAddressBook,
    pub crypto: Box<dyn MetadataCrypto>,
    pub relay: Box<dyn RelayAdapter>,
    pub dkim_signer: Option<Box<dyn DkimSign>>,
    pub history: HistoryRecorder,
    /// Armored local metadata public key, attached to every key-exchange
    /// bootstrap message (spec §4.9, §6).
    pub local_public_key_armored: Vec<u8>,
}

impl GatewayCore {
    pub fn new(
        config: GatewayConfig,
        crypto: Box<dyn MetadataCrypto>,
        relay: Box<dyn RelayAdapter>,
        dkim_signer: Option<Box<dyn DkimSign>>,
        local_public_key_armored: Vec<u8>,
    ) -> Self {
        let store = QueueStore::new(config.queue_root.clone());
        let address_book = MetadataAddressBook::new(
            config.metadata_domain_user.clone(),
            config.local_domain.clone(),
        );
        let history = HistoryRecorder::new(history::path_for(&config.queue_root));
        GatewayCore {
            config,
            store,
            address_book,
            crypto,
            relay,
            dkim_signer,
            history,
            local_public_key_armored,
        }
    }

    /// `BundleAndPad()` (spec §4.3): the single entry point. Scans every
    /// domain subdirectory and attempts to build, pad, encrypt, relay,
    /// and record a bundle for each. A fatal error in one domain never
    /// stops the others (spec §7 "Propagation policy").
    pub fn bundle_and_pad(&self) -> Vec<(String, DomainCycleOutcome)> {
        let _span = tracing::info_span!("bundle_cycle").entered();
        self.address_book.begin_cycle();

        let domains = match self.store.list_domains() {
            Ok(domains) => domains,
            Err(err) => {
                emit_operator_notice(
                    NoticeKind::DomainFailure,
                    &self.config.local_domain,
                    &format!("failed to enumerate packet store: {err}"),
                );
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            let _domain_span = tracing::info_span!("domain", peer = %domain).entered();
            let outcome = self.run_domain(&domain);
            if let DomainCycleOutcome::Failed(reason) = &outcome {
                emit_operator_notice(NoticeKind::DomainFailure, &domain, reason);
            }
            results.push((domain, outcome));
        }

        // Key-exchange bootstraps run once per cycle, after every domain
        // has had a chance to enqueue a request (spec §4.9).
        let local_metadata_addr = self.config.local_metadata_address();
        let coordinator = KeyExchangeCoordinator::new(self.relay.as_ref(), &self.config.local_domain);
        coordinator.run(
            &self.address_book.requests,
            &local_metadata_addr,
            &self.local_public_key_armored,
        );

        results
    }

    fn run_domain(&self, domain: &str) -> DomainCycleOutcome {
        let bundler = Bundler::new(&self.config);
        let mut bundle = match bundler.bundle_domain(&self.store, self.relay.as_ref(), domain) {
            Ok(BundleOutcome::Empty) => return DomainCycleOutcome::NothingToSend,
            Ok(BundleOutcome::Ready(bundle)) => bundle,
            Err(err) => return DomainCycleOutcome::Failed(format!("failed to scan queue: {err}")),
        };

        let peer = match self
            .address_book
            .resolve_peer(domain, self.config.require_key_verified)
        {
            directory::ResolvePeerOutcome::Ready { address, fingerprint } => (address, fingerprint),
            _ => return DomainCycleOutcome::PeerNotReady,
        };

        let local = match self.address_book.resolve_local() {
            directory::ResolveLocalOutcome::Ready { address } => address,
            directory::ResolveLocalOutcome::MissingPrivateKey => {
                return DomainCycleOutcome::LocalIdentityNotReady
            }
        };

        let padder = Padder::new();
        if let Err(err) = padder.pad(&mut bundle, self.config.bundled_message_max_size) {
            return DomainCycleOutcome::Failed(format!("padding failed: {err}"));
        }

        let wrapper = Wrapper::new(self.crypto.as_ref(), self.config.dkim_sign, self.dkim_signer.as_deref());
        let wrapped = match wrapper.wrap(&bundle, &local, &peer.0, &peer.1, &self.config.local_domain) {
            Ok(wrapped) => wrapped,
            Err(err) => return DomainCycleOutcome::Failed(format!("wrap/encrypt failed: {err}")),
        };

        if let Err(err) = self.relay.send(&wrapped.rfc5322_bytes, &wrapped.from, &wrapped.to) {
            return DomainCycleOutcome::Failed(format!("relay failed: {err}"));
        }

        let included = bundle.included.len();
        for selected in &bundle.included {
            if let Err(err) =
                self.history
                    .record(&selected.packet, &wrapped.metadata_crypted_with, &local)
            {
                // The bundle has already left; failing to log history is
                // an operator-visible defect, not a reason to re-send or
                // to leave the packet queued for a guaranteed duplicate.
                emit_operator_notice(
                    NoticeKind::DomainFailure,
                    domain,
                    &format!("failed to record history for sent packet: {err}"),
                );
            }
            self.store.remove(&selected.path);
        }

        DomainCycleOutcome::Sent { packets: included }
    }
}

#[derive(Debug)]
pub enum SchedulerStateError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for SchedulerStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerStateError::Io(err) => write!(f, "scheduler state I/O error: {err}"),
            SchedulerStateError::Serialize(err) => write!(f, "scheduler state serialization error: {err}"),
        }
    }
}

impl std::error::Error for SchedulerStateError {}

/// Persisted scheduler state (spec §3 "Scheduler state"): a single
/// timestamp, advanced only after a full `BundleAndPad()` pass
/// completes without a fatal (crate-level) error.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct PersistedState {
    date_queue_last_active: Option<DateTime<Utc>>,
}

pub struct SchedulerState {
    path: PathBuf,
    inner: PersistedState,
}

impl SchedulerState {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SchedulerStateError> {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(SchedulerStateError::Serialize)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(err) => return Err(SchedulerStateError::Io(err)),
        };
        Ok(SchedulerState { path, inner })
    }

    pub fn date_queue_last_active(&self) -> Option<DateTime<Utc>> {
        self.inner.date_queue_last_active
    }

    /// Advances the timestamp to `now` and persists it. Callers must
    /// only invoke this after a `BundleAndPad()` pass has completed
    /// without a fatal (scheduler-level) error (spec §3 invariant).
    pub fn mark_active(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerStateError> {
        self.inner.date_queue_last_active = Some(now);
        self.save()
    }

    fn save(&self) -> Result<(), SchedulerStateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(SchedulerStateError::Io)?;
        }
        let raw = serde_json::to_string(&self.inner).map_err(SchedulerStateError::Serialize)?;
        std::fs::write(&self.path, raw).map_err(SchedulerStateError::Io)
    }
}

/// Computes readiness per spec §4.8 step 2: `encrypt_metadata &&
/// bundle_and_pad && (date_queue_last_active + cadence_interval <=
/// now)`.
pub fn is_ready(config: &GatewayConfig, state: &SchedulerState, now: DateTime<Utc>) -> bool {
    if !config.ready_to_bundle() {
        return false;
    }
    match state.date_queue_last_active() {
        None => true,
        Some(last_active) => {
            let interval = chrono::Duration::from_std(config.bundle_frequency.interval())
                .unwrap_or_else(|_| chrono::Duration::zero());
            last_active + interval <= now
        }
    }
}

/// The single-threaded scheduler loop (spec §4.8, §5 "one logical
/// scheduler thread"). Wakes every `config.scheduler_period()`;
/// `BundleAndPad()` itself runs on a blocking task since it performs
/// CPU-bound encryption and synchronous file/process I/O (spec §5
/// "CPU-bound... relay call... none of these suspend the producer
/// side").
pub struct Scheduler {
    core: Arc<GatewayCore>,
    state_path: PathBuf,
}

impl Scheduler {
    pub fn new(core: Arc<GatewayCore>, state_path: impl Into<PathBuf>) -> Self {
        Scheduler {
            core,
            state_path: state_path.into(),
        }
    }

    /// Runs one scheduler check-and-maybe-bundle step. Exposed
    /// separately from `run` so tests can drive individual ticks
    /// without a real sleep (spec §8 S1 "empty queue... run one cycle").
    pub async fn tick(&self) -> Result<bool, SchedulerStateError> {
        let mut state = SchedulerState::load(&self.state_path)?;
        let now = Utc::now();
        if !is_ready(&self.core.config, &state, now) {
            return Ok(false);
        }

        let core = Arc::clone(&self.core);
        let results = tokio::task::spawn_blocking(move || core.bundle_and_pad())
            .await
            .map_err(|err| {
                SchedulerStateError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
            })?;

        for (domain, outcome) in &results {
            tracing::info!(domain = %domain, outcome = ?outcome, "domain cycle finished");
        }

        // The pass completed without a fatal *scheduler*-level error
        // (individual domain failures are already caught and reported
        // inside `bundle_and_pad`), so the timestamp advances (spec §4.8
        // step 4, §3 invariant).
        state.mark_active(now)?;
        Ok(true)
    }

    /// Runs forever until `shutdown` fires, sleeping
    /// `config.scheduler_period()` between checks.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let period = self.core.config.scheduler_period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("scheduler shutting down");
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(%err, "scheduler tick failed");
                    }
                }
            }
        }
    }
}

pub fn history_path(store_root: &Path) -> PathBuf {
    history::path_for(store_root)
}
