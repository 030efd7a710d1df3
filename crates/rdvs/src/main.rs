#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use rdvs::config::{Args, ServerConfig};
use rdvs::metrics::{start_metrics_server, HealthState};
use rdvs::server::ServerState;
use rdvs::{run_until, tls};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let acceptor = match &config.cert {
        Some(cert) => {
            let acceptor = tls::load_acceptor(cert, config.key.as_deref())
                .with_context(|| format!("loading TLS certificate {}", cert.display()))?;
            info!("TLS enabled with certificate {}", cert.display());
            Some(acceptor)
        }
        None => None,
    };

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Listening on port {}", config.listen.port());

    let state = Arc::new(ServerState::new(config.clone(), acceptor));
    let health_state = HealthState::new(Arc::clone(&state.registry));

    if let Some(metrics_addr) = config.metrics_addr {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        });
    }

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        health_state.set_ready(false);
    };

    run_until(listener, state, shutdown).await?;
    Ok(())
}
