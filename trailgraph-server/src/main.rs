//! trailgraph server binary

use anyhow::{bail, Context};
use clap::ArgMatches;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trailgraph_core::auth::{SigningKey, VerifyingKey};
use trailgraph_engine::StorageEngine;
use trailgraph_server::{config, AppState, FlushWorker, ServerConfig, TrailServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = config::command().get_matches();

    match matches.subcommand() {
        Some(("keygen", sub)) => {
            init_tracing(false);
            keygen(sub)
        }
        _ => {
            let config = ServerConfig::from_matches(&matches);
            init_tracing(config.log_json);
            serve(config).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn keygen(matches: &ArgMatches) -> anyhow::Result<()> {
    let out_dir = matches
        .get_one::<PathBuf>("out-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let private_path = out_dir.join("private.pem");
    let public_path = out_dir.join("public.pem");

    for path in [&private_path, &public_path] {
        if path.exists() {
            bail!("refusing to overwrite {}", path.display());
        }
    }

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let key = SigningKey::generate();
    std::fs::write(&private_path, key.to_pem())
        .with_context(|| format!("failed to write {}", private_path.display()))?;
    std::fs::write(&public_path, key.verifying_key().to_pem())
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    info!(key_id = %key.key_id(), "wrote {} and {}", private_path.display(), public_path.display());
    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    info!("Starting trailgraph server");
    info!("Data directory: {}", config.data_dir.display());
    info!("Bind address: {}", config.bind);

    if !config.data_dir.exists() {
        std::fs::create_dir_all(&config.data_dir)?;
        info!("Created data directory: {}", config.data_dir.display());
    }

    let engine = StorageEngine::new(&config.data_dir)
        .context("Failed to initialize storage engine")?;
    let signing_key = SigningKey::load(&config.private_key)?;
    let verifying_key = VerifyingKey::load(&config.public_key)?;
    info!(key_id = %verifying_key.key_id(), "Signing keys loaded");

    let bind = config.bind;
    let state = AppState::new(&engine, signing_key, verifying_key, config)?;

    match state.credentials.purge_expired() {
        Ok(purged) => info!(purged, "Swept expired credentials"),
        Err(e) => warn!(error = %e, "Startup credential sweep failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(FlushWorker::new(&state).run(shutdown_rx.clone()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    TrailServer::new(state).serve(listener, shutdown_rx).await?;

    worker.await.context("flush worker panicked")?;
    engine.persist()?;
    info!("Server shutdown gracefully");
    Ok(())
}
