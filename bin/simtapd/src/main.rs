//! ---
//! simtap_section: "02-daemon"
//! simtap_subsection: "binary"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Binary entrypoint for the simtap daemon."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
mod flight;
mod stats;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use simtap_common::config::AppConfig;
use simtap_common::logging::init_tracing;
use simtap_core::{ClientError, ClientEvent, LoopbackHost, OwnerHandle, TelemetryClient};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::flight::FlightProfile;
use crate::stats::{RunSummary, TelemetryStatistics};

#[derive(Debug, Parser)]
#[command(author, version, about = "simtap telemetry daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Stop after this many decoded samples")]
    ticks: Option<u64>,

    #[arg(long, value_name = "FILE", help = "Write the end-of-run summary as JSON")]
    summary_json: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Write the client metrics in Prometheus text format on exit")]
    metrics_dump: Option<PathBuf>,

    #[arg(long, default_value_t = 1, help = "Owner handle the host posts its messages to")]
    owner_handle: u64,

    #[arg(long, help = "Make the simulated host quit after this many samples")]
    quit_host_after: Option<u64>,
}

/// Run-time knobs that do not belong in the configuration file.
#[derive(Debug, Clone, Copy)]
struct RunOptions {
    owner: OwnerHandle,
    ticks: Option<u64>,
    quit_host_after: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/simtap.toml"));
    candidates.push(PathBuf::from("configs/simtap.example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("simtapd", &config.logging)?;
    info!(config_path = %loaded.source.display(), fields = config.fields.len(), "configuration loaded");

    let options = RunOptions {
        owner: OwnerHandle(cli.owner_handle),
        ticks: cli.ticks,
        quit_host_after: cli.quit_host_after,
    };
    let registry = Registry::new();
    let summary = run_daemon(&config, options, &registry).await?;

    info!(
        ticks = summary.ticks,
        connects = summary.connects,
        disconnects = summary.disconnects,
        max_latency_ms = summary.max_latency_ms,
        "telemetry run finished"
    );
    for field in &summary.fields {
        info!(datum = %field.name, units = %field.unit, min = field.min, max = field.max, last = field.last, "field summary");
    }
    if let Some(path) = &cli.summary_json {
        write_summary(path, &summary)?;
        info!(path = %path.display(), "summary written");
    }
    if let Some(path) = &cli.metrics_dump {
        write_metrics(path, &registry)?;
        info!(path = %path.display(), "metrics written");
    }
    Ok(())
}

/// Own the message pump and the poll timer until ctrl-c or the tick budget.
async fn run_daemon(config: &AppConfig, options: RunOptions, registry: &Registry) -> Result<RunSummary> {
    let host = LoopbackHost::new();
    let mut flight = FlightProfile::new(config.host.seed, config.host.noise_sigma)
        .context("unable to build the synthetic flight profile")?;
    let mut client = TelemetryClient::new(host.clone(), config.client.clone());
    client
        .export_metrics(registry)
        .context("unable to register client metrics")?;

    let accepted = client.declare_fields(&config.fields);
    if accepted < config.fields.len() {
        warn!(
            declared = config.fields.len(),
            accepted, "some fields carry unknown unit tokens and were dropped"
        );
    }
    client.finalize_registration()?;

    let (tx, mut events) = mpsc::unbounded_channel();
    client.events().subscribe_all(move |event| {
        let _ = tx.send(event);
    });

    let mut stats = TelemetryStatistics::new();
    let mut poll = interval(config.client.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let started = Instant::now();
    let mut reconnect_at = Some(started);
    let mut host_quit = false;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("unable to listen for ctrl-c")?;
                info!("ctrl-c received; shutting down");
                break;
            }
            _ = poll.tick() => {
                flight.feed(&host, started.elapsed());

                if reconnect_at.is_some_and(|due| Instant::now() >= due) {
                    // Simulated host relaunch.
                    host.set_running(true);
                    match client.connect(options.owner) {
                        Ok(()) => reconnect_at = None,
                        Err(err) => {
                            warn!(error = %err, retry_in_ms = config.client.reconnect_interval.as_millis() as u64, "connect failed");
                            reconnect_at = Some(Instant::now() + config.client.reconnect_interval);
                        }
                    }
                }

                if client.is_connected() {
                    match client.request_data() {
                        Ok(_) => {}
                        Err(ClientError::NotFinalized) => debug!("layout not registered for this session; skipping poll"),
                        Err(err) => warn!(error = %err, "poll failed"),
                    }
                }

                for message in host.pump() {
                    if !client.forward_message(&message) {
                        trace!(message_id = message.id, "message not consumed by the client");
                    }
                }

                while let Ok(event) = events.try_recv() {
                    match event {
                        ClientEvent::Connected => {
                            stats.record_connect();
                            info!(layout_slots = client.layout().map(|l| l.slot_count()).unwrap_or(0), "telemetry connected");
                        }
                        ClientEvent::Disconnected => {
                            stats.record_disconnect();
                            client.close_connection();
                            reconnect_at = Some(Instant::now() + config.client.reconnect_interval);
                            warn!(retry_in_ms = config.client.reconnect_interval.as_millis() as u64, "telemetry disconnected");
                        }
                        ClientEvent::ReceivedData(sample) => {
                            stats.record_sample(&sample);
                            debug!(
                                sequence = sample.sequence,
                                latency_us = sample.latency.map(|l| l.as_micros() as u64).unwrap_or_default(),
                                values = ?sample.fields.iter().map(|f| (f.name(), f.value)).collect::<Vec<_>>(),
                                "sample"
                            );
                            if !host_quit && options.quit_host_after == Some(stats.ticks()) {
                                info!(after = stats.ticks(), "simulated host quitting");
                                host.quit();
                                host_quit = true;
                            }
                        }
                        ClientEvent::UnknownRequestId(id) => {
                            stats.record_unknown_reply();
                            warn!(request_id = %id, "reply for a request this client never issued");
                        }
                    }
                }

                if options.ticks.is_some_and(|limit| stats.ticks() >= limit) {
                    info!(ticks = stats.ticks(), "tick budget reached");
                    break;
                }
            }
        }
    }

    client.close_connection();
    Ok(stats.summary(&client.metrics()))
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("unable to create summary file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)
        .with_context(|| format!("unable to write summary to {}", path.display()))?;
    Ok(())
}

fn write_metrics(path: &Path, registry: &Registry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("unable to encode metrics")?;
    let mut file = File::create(path)
        .with_context(|| format!("unable to create metrics file {}", path.display()))?;
    file.write_all(&buffer)
        .with_context(|| format!("unable to write metrics to {}", path.display()))?;
    Ok(())
}
