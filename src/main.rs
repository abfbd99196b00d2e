use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use cpnsim_controller::{NoopUndoTracker, SimulationConfig, SimulationController};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Simulate a Colored Petri Net exported by the editor.
///
/// Events are printed to stdout as JSON lines, followed by one line with
/// the final state and marking.
#[derive(Parser, Debug)]
#[command(name = "cpnsim", version)]
struct Cli {
    /// Net document (JSON).
    net: PathBuf,

    /// Steps to run after the explicit firings.
    #[arg(long, default_value_t = 10)]
    steps: u64,

    /// Pause between steps instead of fast-forwarding.
    #[arg(long)]
    animate: bool,

    /// Pause length for --animate; defaults to the configured delay.
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Transitions to fire, in order, before running.
    #[arg(long = "fire", value_name = "TRANSITION_ID")]
    fire: Vec<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let document = std::fs::read_to_string(&cli.net)
        .with_context(|| format!("failed to read net {}", cli.net.display()))?;
    let controller = Arc::new(SimulationController::from_json(
        document,
        Arc::new(NoopUndoTracker),
        config,
    ));

    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "failed to serialize event"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller
        .ensure_initialized()
        .await
        .context("failed to load net")?;

    for transition_id in &cli.fire {
        controller
            .fire_transition(transition_id)
            .await
            .with_context(|| format!("failed to fire {transition_id}"))?;
    }

    let report = if cli.animate {
        let mut run = controller.spawn_animated(cli.steps, cli.delay_ms.map(Duration::from_millis));
        tokio::select! {
            joined = &mut run => joined?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping run");
                controller.stop();
                run.await?
            }
        }
    } else {
        controller.run_multiple_steps_fast(cli.steps).await
    }?;
    info!(termination = ?report.termination, steps = report.steps, "done");

    let summary = serde_json::json!({
        "state": controller.state(),
        "marking": controller.marking()?,
    });

    // Closing the event channel lets the printer drain and exit.
    drop(controller);
    printer.await?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
