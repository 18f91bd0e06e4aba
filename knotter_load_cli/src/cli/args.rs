use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use knotter_load::{SessionKind, Stage};

/// knotter API load generator
#[derive(Parser, Debug)]
#[command(name = "knotter-load")]
#[command(about = "Replays scripted HTTP sessions against the knotter API")]
#[command(version)]
pub struct Cli {
    /// Target host, e.g. http://localhost:8080
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "KNOTTER_HOST")]
    pub host: String,

    /// Session each virtual user replays
    #[arg(long, value_enum, default_value_t = SessionArg::Full, env = "KNOTTER_SESSION")]
    pub session: SessionArg,

    /// Per-request timeout in seconds
    #[arg(
        long,
        default_value = "30",
        env = "KNOTTER_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Run a fixed number of virtual users, each replaying the session back to back
    Users(UsersArgs),

    /// Start sessions at a rate that follows ramp stages
    Paced(PacedArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UsersArgs {
    /// Number of concurrent virtual users
    #[arg(short, long, default_value = "1")]
    pub users: usize,

    /// Users spawned per second
    #[arg(short = 'r', long, default_value = "1.0")]
    pub spawn_rate: f64,

    /// Stop after this many seconds
    #[arg(short = 't', long, required_unless_present = "iterations")]
    pub run_time: Option<u64>,

    /// Sessions each user runs before stopping
    #[arg(short, long)]
    pub iterations: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct PacedArgs {
    /// Ramp stage as SECONDS:SESSIONS_PER_SECOND; repeat for more stages
    #[arg(long = "stage", required = true, value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Number of worker tasks (defaults to 120 per CPU)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Governor tick in milliseconds
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Maximum stored session tokens for bursts
    #[arg(long)]
    pub bucket: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionArg {
    /// All ten requests
    Full,
    /// `/health` and `/gvtest123/0` only
    Smoke,
}

impl From<SessionArg> for SessionKind {
    fn from(value: SessionArg) -> Self {
        match value {
            SessionArg::Full => SessionKind::Full,
            SessionArg::Smoke => SessionKind::Smoke,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Table,
    Json,
    JsonPretty,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    let (secs, rate) = s
        .split_once(':')
        .ok_or_else(|| format!("expected SECONDS:RATE, got `{s}`"))?;
    let secs: f64 = secs
        .trim()
        .parse()
        .map_err(|e| format!("invalid stage duration `{secs}`: {e}"))?;
    let rate: f64 = rate
        .trim()
        .parse()
        .map_err(|e| format!("invalid stage rate `{rate}`: {e}"))?;
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("invalid stage duration `{secs}`: {e}"))?;
    if !rate.is_finite() || rate < 0.0 {
        return Err(format!("stage rate must be a finite non-negative number, got {rate}"));
    }
    Ok(Stage::new(duration, rate))
}
