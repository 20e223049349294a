// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud Adaptor Server - HTTP front of the provisioning engine
//!
//! Loads [`config::Config`], opens the configured store, starts an
//! [`EngineRuntime`] and serves the REST API under
//! [`http::API_PREFIX`]. On shutdown the listener stops accepting requests
//! first, then running tasks are cancelled and drained, then the store is
//! closed.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use cloud_adaptor_core::persistence::{MySqlPersistence, Persistence, SqlitePersistence};
use cloud_adaptor_engine::runtime::EngineRuntime;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod http;

use config::{Config, DatabaseConfig, SQLITE_FILE};

const CRATES: &[&str] = &[
    "cloud_adaptor_core",
    "cloud_adaptor_engine",
    "cloud_adaptor_server",
];

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to the workspace
/// crates only.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, log_level))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("cloud_adaptor=info"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the configured store and run its migrations.
pub async fn open_persistence(database: &DatabaseConfig) -> Result<Arc<dyn Persistence>> {
    match database {
        DatabaseConfig::Sqlite { dir } => {
            let path = dir.join(SQLITE_FILE);
            info!(path = %path.display(), "Opening sqlite3 store");
            Ok(Arc::new(SqlitePersistence::from_path(&path).await?))
        }
        DatabaseConfig::MySql { addr, name, .. } => {
            info!(addr = %addr, database = %name, "Opening mysql store");
            let url = database
                .mysql_url()
                .ok_or_else(|| anyhow::anyhow!("mysql url unavailable"))?;
            Ok(Arc::new(MySqlPersistence::connect(&url).await?))
        }
    }
}

/// Serve until `shutdown` resolves, then drain the engine.
pub async fn run<S>(config: Config, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let persistence = open_persistence(&config.database).await?;
    let runtime = EngineRuntime::builder()
        .persistence(persistence.clone())
        .settings(config.engine.clone())
        .bus(config.queue.0.clone())
        .build()?
        .start()
        .await?;

    let app = http::build_router(http::AppState::new(runtime.usecase().clone()));
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, "Cloud adaptor listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    info!("HTTP listener stopped");

    runtime.shutdown().await?;
    persistence.close().await;
    served?;
    info!("Cloud adaptor shut down");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
