//! Command-line client for heroes-sync.
//!
//! Saves, loads and watches tournament hero data on any configured backend:
//! - JSONBin bucket, GitHub Gist, Firebase Realtime Database
//! - local obfuscated key-value file
//! - shareable URL

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use heroes_sync_core::{Avatars, Credential, CredentialProvider, Hero, Payload, SaveOutcome};
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod backends;
mod config;

use backends::{create_backend, credential_provider, stored_credentials};
use config::{Command, Config};

/// Contents of a file passed to `save`. Extra fields such as `tournament` are ignored.
#[derive(Debug, Deserialize)]
struct PayloadFile {
    #[serde(default)]
    heroes: Vec<Hero>,
    #[serde(default)]
    avatars: Avatars,
    #[serde(default)]
    timestamp: i64,
}

fn read_payload_file(tournament: &str, path: &Path) -> anyhow::Result<Payload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: PayloadFile = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a heroes payload", path.display()))?;
    Ok(Payload::new(tournament, file.heroes, file.avatars).with_timestamp(file.timestamp))
}

fn print_payload(payload: &Payload) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    match &config.command {
        Command::Setup => {
            if !config.has_inline_credentials() {
                bail!("setup needs --token and/or --resource-id");
            }
            let stored = stored_credentials(&config);
            stored.provision(&Credential::new(
                config.token.clone().unwrap_or_default(),
                config.resource_id.clone().unwrap_or_default(),
            ))?;
            info!("Stored credentials in {}", config.store_path().display());
            return Ok(());
        }
        Command::ClearCredentials => {
            stored_credentials(&config).clear()?;
            info!("Cleared stored credentials");
            return Ok(());
        }
        _ => {}
    }

    let built = create_backend(&config, credential_provider(&config));
    let backend = built.backend;

    match config.command {
        Command::Save { tournament, file } => {
            let payload = read_payload_file(&tournament, &file)?;
            let outcome = backend
                .try_save(&tournament, &payload)
                .await
                .with_context(|| format!("Failed to save {}", tournament))?;

            match outcome {
                SaveOutcome::Written(stored) => info!(
                    "Saved {} heroes for {} (timestamp {})",
                    stored.total_records, tournament, stored.timestamp
                ),
                SaveOutcome::Skipped { existing_timestamp } => info!(
                    "Backend already holds {} at timestamp {}, nothing written",
                    tournament, existing_timestamp
                ),
            }
            if let Some(url_store) = built.url_store {
                println!("{}", url_store.location()?);
            }
        }
        Command::Load { tournament } => {
            let payload = backend
                .try_load(&tournament)
                .await
                .with_context(|| format!("Failed to load {}", tournament))?;
            print_payload(&payload)?;
        }
        Command::Check { tournament, since } => {
            let update = backend
                .try_check_for_updates(&tournament, since)
                .await
                .with_context(|| format!("Failed to check {}", tournament))?;
            match update {
                Some(payload) => print_payload(&payload)?,
                None => info!("{} has nothing newer than {}", tournament, since),
            }
        }
        Command::Watch { tournament } => {
            let subscribable = backend.as_subscribable().ok_or_else(|| {
                anyhow!("the {} backend cannot push changes", backend.kind())
            })?;

            let handle = subscribable.subscribe(
                &tournament,
                Arc::new(|payload: Payload| {
                    if let Err(e) = print_payload(&payload) {
                        warn!("Failed to print change: {}", e);
                    }
                }),
            )?;
            info!(
                subscription = handle.id(),
                "Watching {} (Ctrl+C to stop)",
                handle.tournament()
            );

            signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            subscribable.unsubscribe(&tournament);
            info!("Stopped watching {}", tournament);
        }
        Command::Probe => {
            let report = backend
                .test_connection()
                .await
                .with_context(|| format!("{} backend is not reachable", backend.kind()))?;
            println!("{}: {}", report.backend, report.detail);
        }
        Command::Setup | Command::ClearCredentials => {}
    }

    Ok(())
}
