//! ABCD Task Demo
//!
//! Walks through the engine components on a built-in layout:
//! - Grid inference and acceptance boxes
//! - Strict-sequence evaluation with debounce
//! - Memorization choreography
//! - A short simulated session

use abcd_task::{
    choreography::{Cue, PhaseChoreographer},
    configuration::ConfigurationSet,
    context::{TaskContext, VisibilityBoard},
    event_log::{MemoryEventLog, ParticipantInfo},
    geometry::Position3D,
    grid::GridToleranceResolver,
    lifecycle::TrialLifecycle,
    sequence::{EvaluationResult, GateMode, SequenceGate},
    session::ExperimentSession,
    settings::TaskSettings,
    simulation::{run_simulation, SimulatedParticipant},
};

const DEMO_LAYOUT: &str = r#"{
    "configurations": [
        { "configName": "Square", "trialType": "forw", "rewardPositions": [
            { "x": 0.0,  "y": 0.5, "z": 0.0 },
            { "x": 10.3, "y": 0.5, "z": 0.0 },
            { "x": 10.3, "y": 0.5, "z": 10.3 },
            { "x": 0.0,  "y": 0.5, "z": 10.3 } ] },
        { "configName": "Zigzag", "trialType": "backw", "rewardPositions": [
            { "x": -10.3, "y": 0.5, "z": 0.0 },
            { "x": 0.0,   "y": 0.5, "z": 20.6 },
            { "x": 10.3,  "y": 0.5, "z": 0.0 },
            { "x": 20.6,  "y": 0.5, "z": 20.6 } ] }
    ],
    "trialsPerConfig": 2
}"#;

fn main() {
    env_logger::init();

    println!("╔══════════════════════════════════════════════════════════════════════╗");
    println!("║  ABCD Task - Trial Orchestration & Spatial Verification Demo         ║");
    println!("╚══════════════════════════════════════════════════════════════════════╝\n");

    let configurations = match ConfigurationSet::load(DEMO_LAYOUT) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("Demo layout rejected: {}", e);
            std::process::exit(1);
        }
    };

    // 1. Layout and acceptance boxes
    demo_layout(&configurations);

    // 2. Sequence gate
    demo_sequence_gate(&configurations);

    // 3. Memorization cadence
    demo_choreography(&configurations);

    // 4. Headless session
    demo_simulated_session(configurations);

    println!("\n✓ All demonstrations completed successfully!");
}

fn section(title: &str) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  {}", title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn demo_layout(configurations: &ConfigurationSet) {
    section("1. LAYOUT & ACCEPTANCE BOXES");

    let resolver = GridToleranceResolver::default();
    println!(
        "Configurations: {}  (repetitions each: {})",
        configurations.len(),
        configurations.repetitions_per_configuration()
    );
    for config in configurations.iter() {
        let extents = resolver.extents(config.reward_positions());
        let acceptance = resolver.resolve(config.reward_positions());
        println!("\n{} [{}]", config.name(), config.trial_type());
        println!("  Sequence:   {}", config.sequence_label());
        println!(
            "  Cell:       {:.2} x {:.2}",
            extents.cell_width, extents.cell_depth
        );
        println!(
            "  Acceptance: ±{:.3} x ±{:.3}",
            acceptance.half_x, acceptance.half_z
        );
        for (i, position) in config.reward_positions().iter().enumerate() {
            println!("    {} at {}", config.label(i), position);
        }
    }
    println!();
}

fn demo_sequence_gate(configurations: &ConfigurationSet) {
    section("2. SEQUENCE GATE");

    let board = VisibilityBoard::new();
    let mut ctx = TaskContext::new(ParticipantInfo::test()).with_display(board.clone());
    let mut lifecycle = match TrialLifecycle::new(
        configurations.clone(),
        GridToleranceResolver::default(),
        2.0,
    ) {
        Ok(lifecycle) => lifecycle,
        Err(e) => {
            eprintln!("  lifecycle error: {}", e);
            return;
        }
    };
    let mut gate = SequenceGate::new(GateMode::StrictSequence, 0.25);

    let commits = [
        (0.0, Position3D::new(0.4, 0.5, -0.3), "near A"),
        (0.1, Position3D::new(0.4, 0.5, -0.3), "same press, second input path"),
        (1.0, Position3D::new(10.3, 0.5, 10.3), "C before B"),
        (2.0, Position3D::new(15.0, 0.5, 0.0), "just outside B"),
        (3.0, Position3D::new(9.0, 0.5, 2.0), "inside B"),
    ];

    for (now, position, note) in commits {
        let result = gate.evaluate(&mut lifecycle, position, now, &mut ctx);
        let outcome = match &result {
            EvaluationResult::Hit(v) => format!("HIT  {} (dx={:.2}, dz={:.2})", v.label, v.dx, v.dz),
            EvaluationResult::Miss(v) => {
                format!("MISS {} (dx={:.2}, dz={:.2})", v.label, v.dx, v.dz)
            }
            EvaluationResult::Debounced => "debounced".to_string(),
            EvaluationResult::Rejected(reason) => format!("rejected: {:?}", reason),
        };
        println!("  t={:>4.1}  {:<32} → {}", now, note, outcome);
    }
    println!(
        "\n  Progress: {}/{}  visible: {:?}\n",
        lifecycle.state().next_expected_index,
        lifecycle.active_configuration().reward_count(),
        board.visible()
    );
}

fn demo_choreography(configurations: &ConfigurationSet) {
    section("3. MEMORIZATION CADENCE");

    let settings = TaskSettings::default();
    let Some(config) = configurations.iter().next() else {
        return;
    };
    let mut choreographer = PhaseChoreographer::new(Some(1));
    choreographer.begin_memorization(0.0, &config.visiting_order(), &settings);

    let mut now = 0.0;
    while now <= 20.0 {
        for cue in choreographer.tick(now) {
            let text = match cue {
                Cue::Reveal(i) => format!("show {}", config.label(i)),
                Cue::Conceal(i) => format!("hide {}", config.label(i)),
                other => format!("{:?}", other),
            };
            println!("  t={:>5.2}  {:<14} {:?}", now, text, choreographer.phase());
        }
        now += 0.25;
    }
    println!();
}

fn demo_simulated_session(configurations: ConfigurationSet) {
    section("4. SIMULATED SESSION");

    let log = MemoryEventLog::new();
    let ctx = TaskContext::new(ParticipantInfo::test()).with_event_sink(log.clone());
    let settings = TaskSettings::compressed(0.2).with_seed(7);

    let mut session = match ExperimentSession::new(configurations, settings, ctx) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("  session error: {}", e);
            return;
        }
    };
    let mut participant = SimulatedParticipant::new(7, 0.8).with_step_size(2.0);

    match run_simulation(&mut session, &mut participant, 0.05, 3_600.0) {
        Ok(report) => {
            println!("  Finished:     {}", report.finished);
            println!("  Stage:        {}", report.stage);
            println!("  Elapsed:      {:.1}s", report.elapsed);
            println!(
                "  Commits:      {} ({} hits, {} misses)",
                report.stats.commits, report.stats.hits, report.stats.misses
            );
            println!("  Probes:       {}", report.stats.probes_completed);
            println!("  Events:       {}", log.len());
            for kind in ["trial_start", "key_press", "movement", "reward", "miss"] {
                println!("    {:<12} {}", kind, log.count(kind));
            }
        }
        Err(e) => eprintln!("  simulation error: {}", e),
    }
}
