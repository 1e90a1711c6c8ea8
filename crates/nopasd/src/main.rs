//! nopasd: the nopas daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Backend clients (AWS auto-scaling, Nomad, Vault)
//! - Policy aggregator + autoscaler loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! nopasd init > nopas.toml
//! nopasd run --config nopas.toml --policy policy.json
//! ```

mod bootstrap;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use nopas_api::{ApiState, build_router};
use nopas_autoscale::Autoscaler;
use nopas_core::NopasConfig;
use nopas_policy::{CoreRatioSource, NomadCoreRatio, Policy};
use nopas_resources::{BackendFactory, LiveBackends};
use nopas_state::StateStore;

#[derive(Parser)]
#[command(name = "nopasd", about = "nopas autoscaler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler and the API.
    Run {
        /// Path to nopas.toml. All sections are optional.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Policy state JSON. Persisted, then used in place of the stored one.
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Port to listen on (overrides [daemon] port).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory (overrides [daemon] data_dir).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Cycle interval, e.g. "30s" (overrides CheckingFreq).
        #[arg(long)]
        interval: Option<String>,
    },

    /// Print a scaffold nopas.toml.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nopasd=debug,nopas=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            policy,
            port,
            data_dir,
            interval,
        } => {
            let config = match &config {
                Some(path) => NopasConfig::from_file(path)?,
                None => NopasConfig::default(),
            };
            run(config, policy, port, data_dir, interval).await
        }
        Command::Init => {
            print!("{}", NopasConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(
    config: NopasConfig,
    policy_file: Option<PathBuf>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    interval: Option<String>,
) -> anyhow::Result<()> {
    info!("nopas daemon starting");

    let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("nopas.redb");

    // ── State ──────────────────────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let state = bootstrap::load_policy_state(&store, policy_file.as_deref())?;
    let interval = bootstrap::resolve_interval(interval.as_deref(), &state)?;

    // ── Backends + policy ──────────────────────────────────────

    let backends = LiveBackends::connect(&config).await?;
    info!(call_timeout_ms = backends.call_timeout().as_millis() as u64, "backends ready");

    let (policy, load_errors) = Policy::from_state(&state, &backends);
    for e in &load_errors {
        error!(error = %e, "policy entry not loaded");
    }
    if policy.resources().is_empty() {
        warn!("no resources loaded; the autoscaler will idle");
    }

    let mut autoscaler = Autoscaler::new(Arc::new(policy), store.clone())
        .with_utc_offset(config.utc_offset_minutes());

    if let Some(signals) = &config.signals {
        match core_ratio_source(&backends, &signals.nomad_address, &signals.nomad_path) {
            Ok(source) => {
                info!(address = %signals.nomad_address, "core ratio signal configured");
                autoscaler = autoscaler.with_core_ratio_source(source);
            }
            Err(e) => warn!(error = %e, "core ratio signal disabled"),
        }
    }

    let api_state = ApiState {
        store,
        resources: autoscaler.policy().resources().clone(),
    };

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or_else(|| config.port())));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signal = shutdown_signal();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        signal.await;
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // The autoscaler finishes any in-flight cycle first.
    if let Err(e) = autoscale_handle.await {
        error!(error = %e, "autoscaler task failed");
    }

    info!("nopas daemon stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. The SIGTERM handler is installed
/// when this is called, not when the future is first polled.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let sigterm = {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())
            .map_err(|e| error!(error = %e, "failed to listen for SIGTERM"))
            .ok()
    };

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match sigterm {
                Some(mut sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("ctrl-c received, shutting down"),
            _ = terminate => info!("SIGTERM received, shutting down"),
        }
    }
}

fn core_ratio_source(
    backends: &LiveBackends,
    address: &str,
    token_path: &str,
) -> anyhow::Result<Arc<dyn CoreRatioSource>> {
    let source = NomadCoreRatio::new(address, token_path, backends.secrets()?, backends.call_timeout())?;
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_resolves_shutdown_signal() {
        let signal = shutdown_signal();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .unwrap();
    }
}
