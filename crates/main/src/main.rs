/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Binary entry point for the metadata bundling & padding gateway.
//! There is no listener stack to bind here — inbound SMTP/IMAP/JMAP
//! handling belongs to the local MTA, an external collaborator (spec
//! §1) — so startup is just: load config, acquire the single-instance
//! lock, build `GatewayCore`, and run the scheduler until signalled to
//! stop.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::{path::PathBuf, sync::Arc};

use bundler::{relay_for, DkimSign, GatewayCore, Scheduler};
use clap::Parser;
use common::{config::GatewayConfig, lock::ProcessLock};
use pgp::{Keyring, LocalKeyMaterial, MetadataCrypto, SequoiaMetadataCrypto};

/// Command-line flags (spec §3's configuration knobs are all read from
/// the TOML file; only the file location and the local metadata key
/// material paths are given on the command line, matching the
/// teacher's own small-surface `cli` crate).
#[derive(Parser, Debug)]
#[command(name = "metadata-gateway", about = "Metadata bundling and padding gateway")]
struct Args {
    /// Path to the gateway's TOML configuration file.
    #[arg(long, default_value = "/etc/metadata-gateway/config.toml")]
    config: PathBuf,

    /// Armored OpenPGP public key for this gateway's local metadata
    /// identity, attached to every key-exchange bootstrap message.
    #[arg(long)]
    local_public_key: PathBuf,

    /// Armored OpenPGP private key for this gateway's local metadata
    /// identity. Optional: without one, resolving the local identity
    /// reports `MissingPrivateKey` and every domain is held for the
    /// next cycle (spec §4.2).
    #[arg(long)]
    local_private_key: Option<PathBuf>,

    /// PEM-encoded RSA private key used to DKIM-sign outer bundles.
    /// Required only when `dkim_sign = true` in the configuration.
    #[arg(long)]
    dkim_key: Option<PathBuf>,

    /// DKIM selector to publish the signature under.
    #[arg(long, default_value = "default")]
    dkim_selector: String,
}

struct RsaDkimSigner {
    pem: String,
    domain: String,
    selector: String,
}

impl DkimSign for RsaDkimSigner {
    fn sign(&self, message: &[u8]) -> Result<String, String> {
        use mail_auth::{
            common::crypto::{RsaKey, Sha256},
            dkim::DkimSigner,
        };

        let key = RsaKey::<Sha256>::from_pkcs1_pem(&self.pem).map_err(|err| err.to_string())?;
        DkimSigner::from_key(key)
            .domain(&self.domain)
            .selector(&self.selector)
            .headers(["From", "To", "Subject", "Date", "Message-ID"])
            .sign(message)
            .map(|signature| signature.to_header())
            .map_err(|err| err.to_string())
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    common::tracing_init::init();
    let args = Args::parse();

    let config = match GatewayConfig::from_path(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, path = %args.config.display(), "failed to load configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let _lock = match ProcessLock::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(err) => {
            tracing::error!(%err, "failed to acquire process lock");
            return std::process::ExitCode::FAILURE;
        }
    };

    let local_public_key_armored = match std::fs::read(&args.local_public_key) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(%err, path = %args.local_public_key.display(), "failed to read local public key");
            return std::process::ExitCode::FAILURE;
        }
    };

    let crypto: Box<dyn MetadataCrypto> = match build_crypto(&config, args.local_private_key.as_deref()) {
        Ok(crypto) => crypto,
        Err(err) => {
            tracing::error!(%err, "failed to initialize metadata crypto backend");
            return std::process::ExitCode::FAILURE;
        }
    };

    let dkim_signer: Option<Box<dyn DkimSign>> = match build_dkim_signer(&config, &args) {
        Ok(signer) => signer,
        Err(err) => {
            tracing::error!(%err, "failed to load DKIM signing key");
            return std::process::ExitCode::FAILURE;
        }
    };

    let relay = relay_for(&config.relay);
    let core = Arc::new(GatewayCore::new(
        config.clone(),
        crypto,
        relay,
        dkim_signer,
        local_public_key_armored,
    ));

    let state_path = config
        .queue_root
        .join("scheduler-state.json");
    let scheduler = Scheduler::new(Arc::clone(&core), state_path);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tracing::info!(domain = %config.local_domain, "metadata gateway started");
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
    tracing::info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    std::process::ExitCode::SUCCESS
}

fn build_crypto(
    config: &GatewayConfig,
    local_private_key_path: Option<&std::path::Path>,
) -> Result<Box<dyn MetadataCrypto>, pgp::CryptoError> {
    let crypto = SequoiaMetadataCrypto::new();
    if let Some(path) = local_private_key_path {
        let armored = std::fs::read(path)?;
        install_local_identity(crypto.keyring(), &config.local_domain, &armored)?;
    }
    Ok(Box::new(crypto))
}

fn install_local_identity(keyring: &Keyring, domain: &str, armored: &[u8]) -> Result<(), pgp::CryptoError> {
    let material = LocalKeyMaterial::from_bytes(domain, armored)?;
    keyring.install_local(material);
    Ok(())
}

fn build_dkim_signer(config: &GatewayConfig, args: &Args) -> Result<Option<Box<dyn DkimSign>>, std::io::Error> {
    if !config.dkim_sign {
        return Ok(None);
    }
    let Some(path) = &args.dkim_key else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "dkim_sign is enabled but --dkim-key was not provided",
        ));
    };
    let pem = std::fs::read_to_string(path)?;
    Ok(Some(Box::new(RsaDkimSigner {
        pem,
        domain: config.local_domain.clone(),
        selector: args.dkim_selector.clone(),
    })))
}
