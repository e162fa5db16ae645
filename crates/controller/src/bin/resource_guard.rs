/*
 * Resource Guard - Kubernetes Resource Policy Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Resource Guard - watches Deployments and reports containers that run
//! without resource requests or limits.
//!
//! - Watches Deployments cluster-wide or in one namespace
//! - Sends a Slack message per violating Deployment
//! - Serves `/health` and `/ready` for the kubelet

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher;
use kube::Api;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use notify::Notifier;
use resource_guard::dedup::DedupSink;
use resource_guard::health::{self, HealthState};
use resource_guard::sink::NotificationSink;
use resource_guard::source::{self, ApiLookup, StoreCache};
use resource_guard::{Controller, GuardConfig, SyncHandler, WorkQueue};

#[derive(Parser)]
#[command(name = "resource-guard")]
#[command(about = "Reports Deployments whose containers lack resource requests or limits")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "RESOURCE_GUARD_CONFIG", default_value = "/config/config.yaml")]
    config: PathBuf,

    /// Number of concurrent workers (overrides the config file)
    #[arg(long, env = "RESOURCE_GUARD_WORKERS")]
    workers: Option<usize>,

    /// Namespace to watch (overrides the config file; default is all namespaces)
    #[arg(long, env = "RESOURCE_GUARD_NAMESPACE")]
    namespace: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,resource_guard=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<GuardConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(GuardConfig::default());
    }
    let config = GuardConfig::from_file(path)?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in-cluster
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    info!(
        "Starting Resource Guard v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = load_config(&cli.config)?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(namespace) = cli.namespace {
        config.watch_namespace = Some(namespace);
    }
    config.validate().context("invalid configuration")?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let notifier = Notifier::from_env();
    if !notifier.has_channels() {
        warn!("No notification channel configured, violations will only be logged");
    }
    let sink: Arc<dyn NotificationSink> = if config.dedup.enabled {
        info!(window = ?config.dedup_window(), "Notification deduplication enabled");
        Arc::new(DedupSink::new(notifier, config.dedup_window()))
    } else {
        Arc::new(notifier)
    };

    let (cache, writer) = StoreCache::pair();
    let cache = Arc::new(cache);
    let queue = Arc::new(WorkQueue::new("deployments", config.rate_limiter()));

    let handler = SyncHandler::new(Arc::new(ApiLookup::new(client.clone())), cache.clone(), sink)
        .with_namespace_policy(config.namespace_policy())
        .with_request_timeout(config.request_timeout());
    let controller = Controller::new(
        queue.clone(),
        Arc::new(handler),
        cache,
        config.controller_settings(),
    );

    let shutdown = CancellationToken::new();

    let api: Api<Deployment> = match &config.watch_namespace {
        Some(namespace) => {
            info!(namespace = %namespace, "Watching Deployments in one namespace");
            Api::namespaced(client, namespace)
        }
        None => {
            info!("Watching Deployments in all namespaces");
            Api::all(client)
        }
    };
    let mut watcher_config = watcher::Config::default().any_semantic();
    if let Some(selector) = &config.label_selector {
        watcher_config = watcher_config.labels(selector);
    }
    let watcher_handle = tokio::spawn(source::run_watcher(
        api,
        watcher_config,
        writer,
        queue.clone(),
        shutdown.clone(),
    ));

    let health_handle = if config.health.enabled {
        let addr = config.health_address()?;
        let state = HealthState {
            synced: controller.synced_flag(),
            queue,
        };
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = health::serve(addr, state, shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let result = controller.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = watcher_handle.await {
        error!(error = %e, "Watcher task failed");
    }
    if let Some(handle) = health_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Health server task failed");
        }
    }

    result.context("controller failed")?;
    info!("Resource Guard stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
