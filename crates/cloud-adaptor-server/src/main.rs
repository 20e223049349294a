// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud Adaptor - Kubernetes provisioning and Rainbond region installer
//!
//! Configuration comes from the environment (and `.env` when present); see
//! [`cloud_adaptor_server::config::Config`].

use tracing::{info, warn};

use cloud_adaptor_server::config::Config;
use cloud_adaptor_server::{init_tracing, run, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading LOG_LEVEL
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    info!(
        listen = %config.listen,
        config_dir = %config.engine.config_dir.display(),
        rainbond_version = %config.engine.rainbond_version,
        "Starting Cloud Adaptor"
    );

    run(config, shutdown_signal()).await
}
