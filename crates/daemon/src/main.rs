// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vgd: the verification orchestrator daemon.

use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vg_bus::MemoryBus;
use vg_core::{SystemClock, VigilConfig};
use vg_daemon::collab_local::local_collaborators;
use vg_daemon::{signal, Supervisor};
use vg_store::MemoryStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let clock = SystemClock;
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let bus = Arc::new(MemoryBus::new(clock.clone()));

    // The memory store expires lazily; sweep it on a slow cadence.
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                tick.tick().await;
                let reaped = store.sweep();
                if reaped > 0 {
                    tracing::debug!(reaped, "swept expired state entries");
                }
            }
        });
    }

    let supervisor = Supervisor::new(
        store,
        bus,
        Arc::new(local_collaborators()),
        config,
        clock,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(signal::watch_signals(shutdown.clone()));

    match supervisor.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("supervisor failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `vgd [--config path.toml]`; defaults apply when no file is given.
fn load_config() -> Result<VigilConfig, vg_core::ConfigError> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return VigilConfig::load(std::path::Path::new(&path));
            }
        }
    }
    Ok(VigilConfig::default())
}
