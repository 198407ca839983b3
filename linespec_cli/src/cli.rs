//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Parameters of the request that was running when an error surfaced (for JSON details).
pub static LAST_REQUEST: OnceLock<CliRequest> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliRequest {
    pub cycles: usize,
    pub it_ms: f64,
    pub cycle_timeout_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "linespec", version, about = "Line-sensor spectrometer CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/linespec.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Temperature sensors exposed by the camera head.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum AuxSensor {
    Detector,
    BoardAnalog,
    BoardDigital,
}

impl AuxSensor {
    pub fn register_name(self) -> &'static str {
        match self {
            Self::Detector => "detector",
            Self::BoardAnalog => "board_analog",
            Self::BoardDigital => "board_digital",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire and average a number of cycles
    Measure {
        /// Number of cycles to average
        #[arg(long)]
        cycles: usize,
        /// Integration time in ms (defaults to device.initial_it_ms)
        #[arg(long, value_name = "MS")]
        it_ms: Option<f64>,
        /// Write per-pixel mean/std/line_rms as JSON to this file
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Run the recovery ladder once if the measurement fails
        #[arg(long, action = ArgAction::SetTrue)]
        recover: bool,
        /// Print throughput stats (cycle delay time)
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Show the timing registers for an integration time (no device needed)
    Timing {
        #[arg(long, value_name = "MS")]
        it_ms: f64,
    },
    /// Read one auxiliary temperature sensor
    Sensor {
        #[arg(long, value_enum)]
        name: AuxSensor,
    },
    /// Run the soft/hard recovery ladder against a connected device
    Recover,
    /// Sweep [performance] it_ms_list x cycles_list and report cycle delay times
    Perf {
        /// Repetitions per grid point
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Quick health check (connect, read sensors, one short measurement)
    SelfCheck,
}
