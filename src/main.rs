mod aggregator;
mod assets;
mod config;
mod exposure;
mod http;
mod probe;
mod snapshot;
mod supervisor;

use aggregator::Aggregator;
use assets::ExtractedAssets;
use axum::serve;
use clap::Parser;
use config::{AgentConfig, Config};
use exposure::ExposureState;
use probe::SysinfoProbe;
use std::net::SocketAddr;
use std::sync::Arc;
use supervisor::Supervisor;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "peekd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Serve locally only, skip the static server and tunnel.
    #[arg(long)]
    no_expose: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.no_expose {
        cfg.exposure.enabled = false;
    }

    info!(
        listen = %cfg.listen,
        server_name = %cfg.server_name,
        exposure = cfg.exposure.enabled,
        "starting peekd"
    );

    let agent = Arc::new(AgentConfig::from(&cfg));
    let aggregator = Arc::new(Aggregator::new(Box::new(SysinfoProbe::new())));
    let supervisor = Arc::new(Supervisor::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let aggregator = aggregator.clone();
        let agent = agent.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(aggregator, agent);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind the monitor endpoint");
                    std::process::exit(1);
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "http server error");
            }
        })
    };

    // Extracted once, removed when dropped at the end of main.
    let mut extracted_assets = None;
    let exposure_task = if cfg.exposure.enabled {
        let assets = match ExtractedAssets::extract() {
            Ok(assets) => assets,
            Err(err) => {
                error!(error = %err, "failed to extract static assets");
                std::process::exit(1);
            }
        };
        let asset_dir = assets.path().to_path_buf();
        extracted_assets = Some(assets);

        let (state_tx, _state_rx) = watch::channel(ExposureState::Idle);
        let supervisor = supervisor.clone();
        let exposure_cfg = cfg.exposure.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(err) =
                exposure::run(supervisor, exposure_cfg, asset_dir, state_tx, shutdown).await
            {
                error!(error = %err, "public exposure failed, serving locally only");
            }
        }))
    } else {
        None
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);

    if let Some(task) = exposure_task {
        let _ = task.await;
    }
    supervisor.shutdown().await;
    let _ = http_task.await;
    drop(extracted_assets);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
