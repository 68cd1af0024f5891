// src/main.rs
//! Run Tracker - live GPS run tracking in the terminal

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use run_tracker::{
    config::{RunnerCategory, TrackerConfig},
    controller::{ControllerHandle, TrackingController},
    display::{self, TerminalDisplay},
    export::{RouteExporter, RouteFormat},
    persistence::{FanoutSink, HistorySummary, HttpRunSink, JsonlHistory, RunSink},
    sources::{self, event_channel, StaticPermission, TokioIntervalTimer},
    tracking::{
        format_elapsed, format_pace, NoticeReceiver, RunTracker, SessionSnapshot, SessionState,
        TrackerContext,
    },
};
use std::{
    fs::OpenOptions,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "run-tracker", version)]
#[command(about = "Track runs from a GPS receiver: distance, pace and target progress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a run until Ctrl+C or the end of the fix stream
    Track(TrackArgs),
    /// List completed runs with totals
    History {
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Export the route of a completed run
    Export {
        /// Run id or unambiguous id prefix
        run_id: String,
        /// gpx, geojson or csv
        #[arg(short, long, default_value = "gpx")]
        format: RouteFormat,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show or save the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Apply the given settings and write them to the config file
    Save(SettingsArgs),
}

#[derive(Args)]
struct TrackArgs {
    #[command(flatten)]
    settings: SettingsArgs,
    /// Print status lines instead of the live screen
    #[arg(long)]
    no_display: bool,
}

#[derive(Args)]
struct SettingsArgs {
    /// Position source: gpsd, serial or replay
    #[arg(long)]
    source: Option<String>,
    /// Serial device of an NMEA receiver
    #[arg(long)]
    serial_port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long)]
    gpsd_host: Option<String>,
    #[arg(long)]
    gpsd_port: Option<u16>,
    /// JSON-lines file of recorded fixes
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Replay speed multiplier
    #[arg(long)]
    speed: Option<f64>,
    /// Distance goal, overrides the category target
    #[arg(long)]
    target_km: Option<f64>,
    /// militer (14 km) or asn (10 km)
    #[arg(long)]
    category: Option<RunnerCategory>,
    /// Base URL of the run API
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
}

impl SettingsArgs {
    fn apply(&self, config: &mut TrackerConfig) {
        if let Some(port) = &self.serial_port {
            let baud = self.baud.or(config.serial_baudrate).unwrap_or(9600);
            config.update_serial(port.clone(), baud);
        } else if let Some(baud) = self.baud {
            config.serial_baudrate = Some(baud);
        }

        if self.gpsd_host.is_some() || self.gpsd_port.is_some() {
            let host = self
                .gpsd_host
                .clone()
                .or_else(|| config.gpsd_host.clone())
                .unwrap_or_else(|| "localhost".to_string());
            let port = self.gpsd_port.or(config.gpsd_port).unwrap_or(2947);
            config.update_gpsd(host, port);
        }

        if let Some(file) = &self.replay {
            config.update_replay(file.clone(), self.speed.unwrap_or(config.replay_speed));
        } else if let Some(speed) = self.speed {
            config.replay_speed = speed;
        }

        // An explicit --source wins over the one implied by device flags
        if let Some(source) = &self.source {
            config.update_source(source);
        }
        if let Some(target) = self.target_km {
            config.target_km = Some(target);
        }
        if let Some(category) = self.category {
            config.category = category;
        }
        if let Some(url) = &self.api_url {
            config.api_url = Some(url.clone());
        }
        if let Some(user) = &self.user_id {
            config.user_id = Some(user.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging()?;
    info!(log = %log_path.display(), "Starting run-tracker");

    let mut config = TrackerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Using default configuration");
        TrackerConfig::default()
    });

    match cli.command {
        Commands::Track(args) => {
            args.settings.apply(&mut config);
            track(config, args.no_display).await
        }
        Commands::History { json } => history(&config, json),
        Commands::Export {
            run_id,
            format,
            output,
        } => export(&config, &run_id, format, output),
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", TrackerConfig::config_path()?.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Save(settings) => {
                settings.apply(&mut config);
                let path = config.save()?;
                println!("Configuration saved to {}", path.display());
                Ok(())
            }
        },
    }
}

/// Log to a file; the terminal belongs to the live display
fn init_logging() -> anyhow::Result<PathBuf> {
    let dir = TrackerConfig::config_dir().unwrap_or_else(|_| std::env::temp_dir());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let log_path = dir.join("run-tracker.log");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(log_path)
}

fn build_sink(config: &TrackerConfig) -> anyhow::Result<Arc<dyn RunSink>> {
    let mut sinks: Vec<Arc<dyn RunSink>> = vec![Arc::new(JsonlHistory::new(config.history_path()?))];

    match (&config.api_url, &config.user_id) {
        (Some(url), Some(user)) => {
            let http = HttpRunSink::new(url.clone(), user.clone())?;
            info!(endpoint = %http.endpoint(), "Uploading runs");
            sinks.push(Arc::new(http));
        }
        (Some(_), None) => warn!("api_url is set without user_id, runs stay local"),
        _ => {}
    }

    let fanout = FanoutSink::new(sinks);
    info!(sinks = fanout.len(), "Run sinks ready");
    Ok(Arc::new(fanout))
}

async fn track(config: TrackerConfig, no_display: bool) -> anyhow::Result<()> {
    let target_km = config.effective_target_km();
    let (events, event_rx) = event_channel();
    let timer = TokioIntervalTimer::new(events.clone());
    let positions = sources::from_config(&config, events)
        .with_context(|| format!("Failed to set up {} source", config.source_type))?;

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let ctx = TrackerContext::new(target_km, build_sink(&config)?)
        .with_settings(config.tracker_settings())
        .with_notices(notice_tx);
    let tracker = RunTracker::new(
        ctx,
        Box::new(StaticPermission::new(config.location_permission)),
        positions,
        Box::new(timer),
    );

    let (controller, handle) = TrackingController::new(tracker, event_rx);
    let controller_task = tokio::spawn(controller.stop_on_source_close(true).run());

    println!(
        "Starting run: {} source, target {:.1} km ({})",
        config.source_type, target_km, config.category
    );
    if let Err(e) = handle.start().await {
        let _ = handle.shutdown().await;
        let _ = controller_task.await;
        bail!("Could not start the run: {}", e);
    }

    let running = Arc::new(AtomicBool::new(true));
    spawn_stop_triggers(&handle, Arc::clone(&running));

    if !no_display && display::should_use_terminal() {
        TerminalDisplay::new(format!("Run Tracker - {} km target", target_km))
            .run(handle.watch(), Some(&mut notice_rx), Arc::clone(&running))
            .await?;
    } else {
        follow_plain(&handle, &mut notice_rx, &running).await;
    }

    handle.shutdown().await?;
    controller_task.await.context("Controller task failed")?;

    while let Ok(notice) = notice_rx.try_recv() {
        println!("{}", notice);
    }
    print_summary(&handle.snapshot());
    Ok(())
}

/// Clear `running` on Ctrl+C or once the run has stopped by itself
fn spawn_stop_triggers(handle: &ControllerHandle, running: Arc<AtomicBool>) {
    let on_signal = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
            on_signal.store(false, Ordering::Relaxed);
        }
    });

    let mut snapshots = handle.watch();
    tokio::spawn(async move {
        let _ = snapshots
            .wait_for(|s| s.state == SessionState::Stopped)
            .await;
        running.store(false, Ordering::Relaxed);
    });
}

async fn follow_plain(handle: &ControllerHandle, notices: &mut NoticeReceiver, running: &AtomicBool) {
    let mut status = tokio::time::interval(Duration::from_secs(5));
    while running.load(Ordering::Relaxed) {
        tokio::select! {
            Some(notice) = notices.recv() => println!("{}", notice),
            _ = status.tick() => println!("{}", status_line(&handle.snapshot())),
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }
}

fn status_line(snapshot: &SessionSnapshot) -> String {
    format!(
        "[{}] {:.2}/{:.1} km  {}  pace {} min/km  {}%",
        snapshot.state,
        snapshot.distance_km,
        snapshot.target_km,
        format_elapsed(snapshot.elapsed_seconds),
        format_pace(snapshot.metrics.pace_min_per_km),
        snapshot.metrics.progress_percent()
    )
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!("\nRun finished");
    println!("  Distance: {:.2} km", snapshot.distance_km);
    println!("  Time:     {}", format_elapsed(snapshot.elapsed_seconds));
    println!("  Pace:     {} min/km", format_pace(snapshot.metrics.pace_min_per_km));
    if snapshot.target_reached {
        println!("  Target of {} km reached", snapshot.target_km);
    }
}

fn history(config: &TrackerConfig, json: bool) -> anyhow::Result<()> {
    let history = JsonlHistory::new(config.history_path()?);
    let records = history.load()?;

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No runs recorded in {}", history.path().display());
        return Ok(());
    }

    println!("{:<10} {:<17} {:>9} {:>9} {:>7}", "ID", "DATE", "KM", "TIME", "PACE");
    for record in &records {
        let id = record.id.to_string();
        println!(
            "{:<10} {:<17} {:>9.2} {:>9} {:>7}",
            &id[..8],
            record.completed_at.format("%Y-%m-%d %H:%M"),
            record.distance_km,
            format_elapsed(record.duration_secs),
            format_pace(record.metrics().pace_min_per_km)
        );
    }

    let summary = HistorySummary::from_records(&records);
    println!(
        "\n{} runs, {:.2} km in {}, average pace {} min/km",
        summary.total_runs,
        summary.total_km,
        format_elapsed(summary.total_secs),
        summary.format_pace()
    );
    Ok(())
}

fn export(
    config: &TrackerConfig,
    run_id: &str,
    format: RouteFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let history = JsonlHistory::new(config.history_path()?);
    let record = history.find(run_id)?;
    let exporter = RouteExporter::new(&record)?;

    let path = output.unwrap_or_else(|| {
        let id = record.id.to_string();
        PathBuf::from(format!("run-{}.{}", &id[..8], format.extension()))
    });
    exporter
        .export_to_file(&path, format)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "Exported {} route points as {} to {}",
        exporter.point_count(),
        format.display_name(),
        path.display()
    );
    Ok(())
}
