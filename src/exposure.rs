use crate::config::ExposureConfig;
use crate::supervisor::{OutputBuffer, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Lifecycle of the public exposure attempt. `Exposed` carries the URL
/// recovered from the tunnel's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposureState {
    Idle,
    LaunchingStaticServer,
    AwaitingStaticReady,
    LaunchingTunnel,
    AwaitingTunnelReady,
    Exposed { public_url: String },
    Failed,
}

#[derive(Debug, Error)]
pub enum ExposureError {
    #[error("failed to spawn {which}: {source}")]
    Spawn {
        which: &'static str,
        source: std::io::Error,
    },
    #[error("{which} did not become ready within {ticks} polls")]
    ReadyTimeout { which: &'static str, ticks: u32 },
    #[error("{which} exited unexpectedly")]
    ProcessExited { which: &'static str },
}

enum WaitOutcome {
    Found(String),
    Timeout,
    Exited,
    Cancelled,
}

/// Bounded wait on a subprocess's captured output. The subprocess is a
/// black box, so "ready" is whatever `matcher` recognizes in its text.
/// Wrapping the scraping here keeps the state machine free of the
/// heuristic; a real health check could replace this without touching it.
async fn await_marker(
    output: &OutputBuffer,
    matcher: impl Fn(&OutputBuffer) -> Option<String>,
    alive: impl Fn() -> bool,
    tick: Duration,
    max_ticks: u32,
    shutdown: &mut watch::Receiver<bool>,
) -> WaitOutcome {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first interval tick fires immediately, so `max_ticks` counts
    // actual waits.
    for _ in 0..=max_ticks {
        tokio::select! {
            _ = shutdown.changed() => return WaitOutcome::Cancelled,
            _ = ticker.tick() => {
                if let Some(found) = matcher(output) {
                    return WaitOutcome::Found(found);
                }
                // Checked after the matcher: a process that prints its
                // marker and exits still counts as ready.
                if !alive() {
                    return WaitOutcome::Exited;
                }
            }
        }
    }
    WaitOutcome::Timeout
}

fn build_command(argv: &[String], trailing: &str) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.arg(trailing);
    cmd
}

/// Drives the exposure state machine to `Exposed`, then keeps watching
/// both subprocesses until shutdown. Any failure is terminal for this
/// exposure attempt; the local HTTP server is unaffected either way.
pub async fn run(
    supervisor: Arc<Supervisor>,
    cfg: ExposureConfig,
    asset_dir: PathBuf,
    state_tx: watch::Sender<ExposureState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ExposureError> {
    let set = |state: ExposureState| {
        let _ = state_tx.send(state);
    };

    set(ExposureState::LaunchingStaticServer);
    let static_cmd = build_command(
        &cfg.static_server.command,
        &asset_dir.display().to_string(),
    );
    let static_proc = match supervisor.launch("static-server", static_cmd) {
        Ok(proc) => proc,
        Err(source) => {
            error!(error = %source, "could not spawn static server");
            set(ExposureState::Failed);
            return Err(ExposureError::Spawn {
                which: "static server",
                source,
            });
        }
    };

    set(ExposureState::AwaitingStaticReady);
    let marker = cfg.static_server.ready_marker.clone();
    let outcome = await_marker(
        &static_proc.output,
        |buf| buf.contains(&marker).then(String::new),
        || supervisor.is_alive(static_proc.id),
        Duration::from_secs(cfg.static_server.tick_secs),
        cfg.static_server.max_ticks,
        &mut shutdown,
    )
    .await;
    match outcome {
        WaitOutcome::Found(_) => info!("static server ready"),
        WaitOutcome::Timeout => {
            error!(
                marker = %cfg.static_server.ready_marker,
                output = %static_proc.output.snapshot(),
                "static server never reported ready"
            );
            set(ExposureState::Failed);
            return Err(ExposureError::ReadyTimeout {
                which: "static server",
                ticks: cfg.static_server.max_ticks,
            });
        }
        WaitOutcome::Exited => {
            error!(output = %static_proc.output.snapshot(), "static server exited early");
            set(ExposureState::Failed);
            return Err(ExposureError::ProcessExited {
                which: "static server",
            });
        }
        WaitOutcome::Cancelled => return Ok(()),
    }

    // Strict sequencing: the tunnel is only spawned after the static
    // server's readiness marker has been observed.
    set(ExposureState::LaunchingTunnel);
    let tunnel_cmd = build_command(&cfg.tunnel.command, &cfg.static_server.port.to_string());
    let tunnel_proc = match supervisor.launch("tunnel", tunnel_cmd) {
        Ok(proc) => proc,
        Err(source) => {
            error!(error = %source, "could not spawn tunnel");
            set(ExposureState::Failed);
            return Err(ExposureError::Spawn {
                which: "tunnel",
                source,
            });
        }
    };

    set(ExposureState::AwaitingTunnelReady);
    let url_prefix = cfg.tunnel.url_prefix.clone();
    let outcome = await_marker(
        &tunnel_proc.output,
        |buf| buf.line_with_prefix(&url_prefix),
        || supervisor.is_alive(tunnel_proc.id),
        Duration::from_secs(cfg.tunnel.tick_secs),
        cfg.tunnel.max_ticks,
        &mut shutdown,
    )
    .await;
    let public_url = match outcome {
        WaitOutcome::Found(url) => url,
        WaitOutcome::Timeout => {
            error!(output = %tunnel_proc.output.snapshot(), "tunnel never printed a public url");
            set(ExposureState::Failed);
            return Err(ExposureError::ReadyTimeout {
                which: "tunnel",
                ticks: cfg.tunnel.max_ticks,
            });
        }
        WaitOutcome::Exited => {
            error!(output = %tunnel_proc.output.snapshot(), "tunnel exited early");
            set(ExposureState::Failed);
            return Err(ExposureError::ProcessExited { which: "tunnel" });
        }
        WaitOutcome::Cancelled => return Ok(()),
    };

    info!(url = %public_url, "monitor publicly reachable");
    set(ExposureState::Exposed {
        public_url: public_url.clone(),
    });

    // Exposed is terminal unless one of the children dies underneath us.
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.static_server.tick_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ticker.tick() => {
                let which = if !supervisor.is_alive(static_proc.id) {
                    Some("static server")
                } else if !supervisor.is_alive(tunnel_proc.id) {
                    Some("tunnel")
                } else {
                    None
                };
                if let Some(which) = which {
                    error!(process = which, "exposed subprocess died");
                    set(ExposureState::Failed);
                    return Err(ExposureError::ProcessExited { which });
                }
            }
        }
    }
}
