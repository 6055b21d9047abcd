//! plynk - Output Engine Entry Point
//!
//! Command line front end for the acquisition and routing engine: one-shot
//! memory reads, running a game profile, and sending test signals.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plynk_rs::{
    config::{config_path, AppConfig},
    runtime::{Runtime, TelemetryEvent},
    types::{NormalizedOutput, OutputSource, OutputValue},
};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "plynk", version, about = "Route live game outputs to control-panel hardware")]
struct Cli {
    /// Config file (defaults to the app data directory)
    #[arg(long, global = true, env = "PLYNK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a memory profile's addresses once and print the results as JSON
    Read {
        /// Memory profile name
        #[arg(long)]
        profile: String,

        /// Target process (defaults to the profile's process)
        #[arg(long)]
        process: Option<String>,
    },

    /// Run a game profile until stdin closes
    Run {
        /// Game profile name
        #[arg(long)]
        game: String,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Send one value through a game profile's rows for `key`
    TestDispatch {
        #[arg(long)]
        game: String,

        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },
}

fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let (file_layer, guard) = match config.logging.directory().filter(|_| config.logging.file) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "plynk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.clone().or_else(config_path) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    let _log_guard = init_logging(&config);

    tracing::info!("Starting plynk {}", env!("CARGO_PKG_VERSION"));
    let runtime = Runtime::native(config).context("Failed to start the engine")?;

    match cli.command {
        Commands::Read { profile, process } => read(&runtime, &profile, process.as_deref()),
        Commands::Run { game, interval } => run(&runtime, &game, interval),
        Commands::TestDispatch { game, key, value } => test_dispatch(&runtime, &game, &key, &value),
    }
}

fn read(runtime: &Runtime, profile: &str, process: Option<&str>) -> Result<()> {
    let memory = runtime
        .profiles()
        .load_memory_profile(profile)
        .with_context(|| format!("Failed to load memory profile '{}'", profile))?;
    let process = process.unwrap_or(&memory.process);

    let result = runtime.read_once(process, memory.outputs);
    match result.data {
        Some(results) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        None => bail!(result.error.unwrap_or_default()),
    }
}

fn run(runtime: &Runtime, game: &str, interval: Option<u64>) -> Result<()> {
    let started = runtime.start_game(game, interval);
    let Some(session) = started.data else {
        bail!(started.error.unwrap_or_default());
    };
    tracing::info!("Running '{}' ({:?})", session.game, session);

    // Stdin closing (Ctrl-D, or the parent going away) ends the run
    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(0);
    std::thread::spawn(move || {
        let mut line = String::new();
        while std::io::stdin().read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
            line.clear();
        }
        drop(quit_tx);
    });

    let telemetry = runtime.telemetry();
    loop {
        crossbeam_channel::select! {
            recv(quit_rx) -> _ => break,
            recv(telemetry) -> event => match event {
                Ok(event) => log_event(&event),
                Err(_) => break,
            },
        }
    }

    tracing::info!("Shutting down...");
    runtime.shutdown();
    Ok(())
}

fn log_event(event: &TelemetryEvent) {
    match event {
        TelemetryEvent::PollTick { stats, .. } if stats.total_polls % 100 == 0 => {
            tracing::info!(
                "{} polls, {:.1}/s, avg {:.2} ms, {} skipped, {} errors",
                stats.total_polls,
                stats.polls_per_second,
                stats.avg_poll_duration_ms,
                stats.skipped_polls,
                stats.error_count
            );
        }
        TelemetryEvent::PollTick { .. } => {}
        TelemetryEvent::Dispatch { records } => {
            for record in records.iter().filter(|r| !r.success) {
                tracing::warn!(
                    "{} -> {}: {}",
                    record.label,
                    record.last_value,
                    record.error.as_deref().unwrap_or("failed")
                );
            }
        }
        TelemetryEvent::PollingEnded { session, reason } => {
            tracing::warn!("Polling session {} ended: {}", session, reason);
        }
        other => tracing::debug!("{:?}", other),
    }
}

fn test_dispatch(runtime: &Runtime, game: &str, key: &str, value: &str) -> Result<()> {
    let loaded = runtime.load_game_profile(game);
    let Some(profile) = loaded.data else {
        bail!(loaded.error.unwrap_or_default());
    };

    let output = NormalizedOutput::new(key, key, OutputValue::coerce_text(value), OutputSource::Message);
    let rows: Vec<_> = profile
        .outputs
        .iter()
        .filter(|row| row.matches(&output))
        .collect();
    if rows.is_empty() {
        bail!("Game profile '{}' has no row for '{}'", game, key);
    }

    let mut failed = false;
    for row in rows {
        let result = runtime.dispatch_test(&output, row);
        failed |= !result.success;
        println!("{}", serde_json::to_string(&result)?);
    }
    if failed {
        bail!("Test dispatch failed");
    }
    Ok(())
}
