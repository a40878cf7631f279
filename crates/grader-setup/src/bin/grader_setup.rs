/*
 * IllumiDesk Grader Setup - Service binary
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

//! Grader Setup Service
//!
//! - `serve`: HTTP service launching / tearing down per-course graders
//! - `render`: print the manifests a launch would submit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grader_setup::config::GraderConfig;
use grader_setup::gateway::{kube::client_from_config, KubeGateway};
use grader_setup::http::{router, AppState};
use grader_setup::registry::{InMemoryRegistry, ServiceRegistry};
use grader_setup::storage::LocalDirectoryProvisioner;
use grader_setup::{manifest, CourseIdentity, IdentityResolver, LifecycleOrchestrator, SpecBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grader setup - per-course grader notebooks on Kubernetes
#[derive(Parser)]
#[command(name = "grader-setup")]
#[command(about = "Provision and tear down per-course grader notebooks")]
struct Cli {
    /// Path to the mounted YAML configuration
    #[arg(long, env = "GRADER_SETUP_CONFIG", default_value = "/config/config.yaml")]
    config: String,

    /// Emit JSON formatted logs
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the Deployment and Service a launch would create
    Render {
        /// Organization name
        #[arg(long)]
        org: String,

        /// Course identifier
        #[arg(long)]
        course: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,grader_setup=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(config_path: &str) -> Result<GraderConfig> {
    let base = if Path::new(config_path).exists() {
        let cfg = GraderConfig::from_mounted_file(config_path)?;
        info!("Loaded configuration from {}", config_path);
        cfg
    } else {
        warn!("Configuration file {} not found, using defaults", config_path);
        GraderConfig::default()
    };
    let config = base.with_env_overrides();

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

#[cfg(feature = "postgres")]
async fn build_registry(config: &GraderConfig) -> Result<Arc<dyn ServiceRegistry>> {
    use grader_setup::registry::PostgresRegistry;

    if let Some(url) = config.registry.database_url.as_deref() {
        let registry = PostgresRegistry::connect(url, config.registry.max_connections)
            .await
            .context("Failed to connect service registry")?;
        registry.ensure_schema().await?;
        return Ok(Arc::new(registry));
    }
    warn!("No registry.databaseUrl configured; service records are kept in memory");
    Ok(Arc::new(InMemoryRegistry::new()))
}

#[cfg(not(feature = "postgres"))]
async fn build_registry(config: &GraderConfig) -> Result<Arc<dyn ServiceRegistry>> {
    if config.registry.database_url.is_some() {
        warn!("registry.databaseUrl is set but the postgres feature is disabled");
    }
    warn!("Service records are kept in memory");
    Ok(Arc::new(InMemoryRegistry::new()))
}

async fn serve(config: GraderConfig, bind: Option<String>) -> Result<()> {
    let client = client_from_config(&config.cluster)
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let gateway = Arc::new(KubeGateway::new(client, &config.namespace));
    let provisioner = Arc::new(LocalDirectoryProvisioner::new(
        config.storage.host_root.clone(),
    ));
    let registry = build_registry(&config).await?;
    info!(backend = registry.backend(), "Service registry ready");

    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        &config,
        gateway,
        provisioner,
        registry,
    ));
    let app = router(
        AppState { orchestrator },
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let address = bind.unwrap_or_else(|| config.server.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Grader setup HTTP server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Grader setup service stopped");
    Ok(())
}

fn render(config: &GraderConfig, org: String, course: String) -> Result<()> {
    let identity = IdentityResolver::from_config(config).resolve(&CourseIdentity::new(org, course));
    let builder = SpecBuilder::new(config.clone());
    let yaml = manifest::render_yaml(
        &builder.build_workload_spec(&identity),
        &builder.build_endpoint_spec(&identity),
    )?;
    println!("{yaml}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting grader setup v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Render { org, course } => render(&config, org, course),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
