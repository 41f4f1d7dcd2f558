//! # ABCD Task Simulation CLI
//!
//! Run a full session headless with a simulated participant and write the
//! event log.
//!
//! ## Usage
//!
//! ```bash
//! # Built-in square layout, default timings
//! cargo run --bin abcd_simulate
//!
//! # Own layout and settings, JSON-lines log
//! cargo run --bin abcd_simulate -- --layout layout.json --settings settings.json \
//!     --log logs/P01.jsonl --participant "P01|ABCD|S1"
//!
//! # Sloppy participant, reproducible
//! cargo run --bin abcd_simulate -- --accuracy 0.6 --seed 3
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use abcd_task::{
    configuration::{Configuration, ConfigurationSet, SequenceDirection},
    context::TaskContext,
    event_log::{JsonlEventLog, ParticipantInfo},
    geometry::Position3D,
    session::ExperimentSession,
    settings::TaskSettings,
    simulation::{run_simulation, SimulatedParticipant},
};

/// Headless ABCD task session
#[derive(Parser, Debug)]
#[command(name = "abcd_simulate")]
#[command(about = "Run an ABCD task session with a simulated participant")]
struct Args {
    /// Configuration file (built-in 2x2 square when omitted)
    #[arg(long, short = 'l')]
    layout: Option<PathBuf>,

    /// Task settings JSON (defaults when omitted)
    #[arg(long, short = 's')]
    settings: Option<PathBuf>,

    /// Write the event log to this JSON-lines file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Participant identity as "PID|STUDY|SESSION"
    #[arg(long, short = 'p', default_value = "")]
    participant: String,

    /// Seed for probe selection and the participant
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Probability of aiming at the right cell
    #[arg(long, short = 'a', default_value = "0.9")]
    accuracy: f64,

    /// Participant step length per tick
    #[arg(long, default_value = "1.0")]
    step: f64,

    /// Simulation tick in seconds
    #[arg(long, default_value = "0.05")]
    tick: f64,

    /// Give up after this much experiment time
    #[arg(long, default_value = "7200")]
    max_time: f64,

    /// Skip the instruction phase
    #[arg(long)]
    skip_instruction: bool,
}

fn default_layout() -> anyhow::Result<ConfigurationSet> {
    let spacing = 10.3;
    let square = Configuration::new(
        "Square",
        SequenceDirection::Forward,
        vec![
            Position3D::planar(0.0, 0.0),
            Position3D::planar(spacing, 0.0),
            Position3D::planar(spacing, spacing),
            Position3D::planar(0.0, spacing),
        ],
    )?;
    Ok(ConfigurationSet::new(vec![square], 2)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              ABCD Task - Simulated Session                   ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let args = Args::parse();

    let configurations = match &args.layout {
        Some(path) => ConfigurationSet::load_file(path)
            .with_context(|| format!("loading layout {}", path.display()))?,
        None => default_layout()?,
    };

    let mut settings = match &args.settings {
        Some(path) => TaskSettings::from_file(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => TaskSettings::default(),
    };
    settings.seed = Some(args.seed);
    if args.skip_instruction {
        settings.instruction.enabled = false;
    }

    let participant = ParticipantInfo::from_delimited(&args.participant);
    println!("[INFO] Participant: {}", participant.participant);
    println!(
        "[INFO] Layout: {} configurations x {} repetitions",
        configurations.len(),
        configurations.repetitions_per_configuration()
    );

    let mut context = TaskContext::new(participant);
    if let Some(path) = &args.log {
        let sink = JsonlEventLog::create(path)
            .with_context(|| format!("creating event log {}", path.display()))?;
        println!("[INFO] Event log: {}", path.display());
        context = context.with_event_sink(sink);
    }

    let mut session = ExperimentSession::new(configurations, settings, context)?;
    let mut simulated = SimulatedParticipant::new(args.seed, args.accuracy).with_step_size(args.step);

    let report = run_simulation(&mut session, &mut simulated, args.tick, args.max_time)?;

    println!();
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.finished {
        anyhow::bail!(
            "session did not finish within {}s (stage {})",
            args.max_time,
            report.stage
        );
    }
    Ok(())
}
