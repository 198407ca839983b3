//! `linespec` command-line entry point.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod measure;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::measure::MeasureArgs;

fn load_config(path: &Path) -> Result<linespec_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = linespec_config::load_toml(&text).wrap_err("invalid configuration TOML")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console logs go to stderr so stdout stays machine-readable; the optional
/// `[logging] file` sink always writes JSON lines.
fn init_tracing(cli: &Cli, logging: &linespec_config::Logging) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "linespec.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, g) = tracing_appender::non_blocking(appender);
        let level = logging.level.as_deref().unwrap_or("info");
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(level))
                .boxed(),
        );
        guard = Some(g);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize tracing: {e}"))?;
    Ok(guard)
}

fn run(cli: &Cli, cfg: &linespec_config::Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    match &cli.cmd {
        Commands::Measure {
            cycles,
            it_ms,
            output,
            recover,
            stats,
        } => measure::run_measure(
            cfg,
            &MeasureArgs {
                cycles: *cycles,
                it_ms: *it_ms,
                output: output.as_deref(),
                recover: *recover,
                stats: *stats,
                json: cli.json,
            },
            shutdown,
        ),
        Commands::Timing { it_ms } => measure::run_timing(cfg, *it_ms, cli.json),
        Commands::Sensor { name } => measure::run_sensor(cfg, *name, cli.json),
        Commands::Recover => measure::run_recover(cfg, cli.json),
        Commands::Perf { repeat } => measure::run_perf(cfg, *repeat, cli.json, shutdown),
        Commands::SelfCheck => measure::run_self_check(cfg, shutdown),
    }
}

fn report(err: &eyre::Report) -> i32 {
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    exit_code_for_error(err)
}

/// Runs the CLI and returns the process exit code. The log guard is dropped
/// (flushing the file sink) before this returns.
fn real_main() -> i32 {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => return report(&e),
    };
    let _guard = match init_tracing(&cli, &cfg.logging) {
        Ok(g) => g,
        Err(e) => return report(&e),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Release)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match run(&cli, &cfg, &shutdown) {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            report(&e)
        }
    }
}

fn main() {
    let _ = color_eyre::install();
    std::process::exit(real_main());
}
