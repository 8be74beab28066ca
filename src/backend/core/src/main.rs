//! Wordhoard Authz Server - Main entry point

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use wordhoard_authz::{
    api,
    config::Config,
    gateway::{resolver_from_config, AuthorizationGateway, AuthorizationLayer, MethodPermissionMap},
    observability,
    rbac::{open_store, Bootstrapper, PolicyCatalog, PolicyEngine},
};

#[derive(Debug, Parser)]
#[command(name = "wordhoard-authz", version, about = "Wordhoard authorization server")]
struct Args {
    /// Configuration file; the environment (WORDHOARD__*) overrides it
    #[arg(short, long, env = "WORDHOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    observability::init("wordhoard-authz", &config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = ?config.store.backend,
        "Starting Wordhoard authz server"
    );

    // Policy state
    let store = open_store(&config.store).await?;
    let engine = Arc::new(PolicyEngine::load(store, &config.engine).await?);

    if config.bootstrap.enabled {
        let bootstrapper = match &config.bootstrap.catalog_path {
            Some(path) => Bootstrapper::new(PolicyCatalog::from_toml_file(path)?),
            None => Bootstrapper::builtin(),
        };
        let report = bootstrapper.run(&engine).await?;
        tracing::info!(
            edges_added = report.edges_added,
            policies_added = report.policies_added,
            "Role catalog bootstrapped"
        );
    } else if !engine.admin_role_known().await {
        tracing::warn!("Bootstrap disabled and no admin role present in the policy set");
    }

    // Gateway
    let mut methods = MethodPermissionMap::with_defaults()?;
    for operation in &config.gateway.whitelist {
        methods.add_to_whitelist(operation.clone());
    }
    tracing::info!(
        mapped = methods.len(),
        whitelisted = methods.whitelist_len(),
        unmapped = ?config.gateway.unmapped_operations,
        "Method permission map ready"
    );

    let gateway = Arc::new(AuthorizationGateway::new(
        engine.clone(),
        methods,
        config.gateway.unmapped_operations,
    ));
    let layer = AuthorizationLayer::new(gateway, resolver_from_config(&config.gateway)?);

    // Serve
    let addr = config.grpc_addr()?;
    if config.gateway.jwt_secret.is_none() && !addr.ip().is_loopback() {
        tracing::warn!(
            addr = %addr,
            "Header-trusted identities on a non-loopback address; any client reaching it can claim any user"
        );
    }
    api::start_grpc_server(&config.server, addr, engine, layer, shutdown_signal()).await?;

    // Cleanup
    observability::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
