//! # Phase Choreographer
//!
//! Timed cadence of the task, driven by the host tick instead of a
//! suspended coroutine. A phase is a script of steps; every step emits a
//! [`Cue`] (or just holds) and carries the time to hold before the next one.
//!
//! The script keeps a cursor: the experiment time at which the next step
//! is due. Each step fires once, when the tick observes its deadline, and
//! a late tick catches up every step that became due in order. Ticking
//! twice at the same time never runs a step twice.
//!
//! ## Phases
//!
//! ```text
//! memorization:  Overview → (Reveal, Conceal)×N×reps → Drop → BeginTrial → Exploring
//! probe:         Overview → Reveal(p) → Conceal(p) → ArmProbe(p) → Drop
//!                → AwaitingCommit (commit | timeout) → ProbeResolved
//!                → Feedback → ProbeComplete
//! ```

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::context::Vantage;
use crate::settings::TaskSettings;

/// Where the choreography currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    /// Sequence playback from the overview
    Memorization,
    /// Vantage transition into the arena
    Drop,
    /// Free movement, commits evaluated against the sequence
    Exploring,
    ProbeReveal,
    ProbeDrop,
    AwaitingCommit,
    Feedback,
    InterTrial,
    Outro,
    /// Halted, nothing scheduled
    Done,
}

impl Phase {
    /// Participant controls movement and commits
    pub fn is_participant_controlled(&self) -> bool {
        matches!(self, Phase::Exploring | Phase::AwaitingCommit)
    }
}

/// Instruction emitted to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Reveal(usize),
    Conceal(usize),
    ConcealAll,
    Vantage(Vantage),
    /// Participant takes control; the trial clock starts
    BeginTrial,
    ArmProbe(usize),
    /// The probe wait ended, by commit or by timeout
    ProbeResolved { hit: bool, timed_out: bool },
    /// Feedback hold over; decide on the next probe
    ProbeComplete { hit: bool },
    InstructionComplete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Emit(Cue),
    Hold,
    AwaitCommit { timeout: f64 },
    ReportOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Step {
    phase: Phase,
    action: Action,
    /// Time held after the action before the next step
    hold: f64,
}

impl Step {
    fn emit(phase: Phase, cue: Cue, hold: f64) -> Self {
        Self {
            phase,
            action: Action::Emit(cue),
            hold,
        }
    }

    fn hold(phase: Phase, hold: f64) -> Self {
        Self {
            phase,
            action: Action::Hold,
            hold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CommitWait {
    deadline: f64,
    resolution: Option<(bool, f64)>,
}

#[derive(Debug)]
pub struct PhaseChoreographer {
    script: VecDeque<Step>,
    phase: Phase,
    /// Phase entered once the script drains
    settle: Phase,
    cursor: f64,
    waiting: Option<CommitWait>,
    last_outcome: Option<bool>,
    rng: StdRng,
    probes_started: usize,
}

impl PhaseChoreographer {
    /// `seed` of `None` draws probe targets from entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            script: VecDeque::new(),
            phase: Phase::Idle,
            settle: Phase::Idle,
            cursor: 0.0,
            waiting: None,
            last_outcome: None,
            rng,
            probes_started: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Commits are only evaluated while the participant is in control
    pub fn accepts_commits(&self) -> bool {
        self.phase.is_participant_controlled()
    }

    pub fn is_awaiting_commit(&self) -> bool {
        self.waiting.is_some()
    }

    /// Time the next scripted step is due, if anything is scheduled
    pub fn next_deadline(&self) -> Option<f64> {
        match self.waiting {
            Some(wait) => Some(wait.deadline),
            None if !self.script.is_empty() => Some(self.cursor),
            None => None,
        }
    }

    pub fn probes_started(&self) -> usize {
        self.probes_started
    }

    /// Replace whatever is scheduled with `steps`, starting at `now`
    fn start(&mut self, now: f64, steps: Vec<Step>, settle: Phase) {
        self.script = steps.into();
        self.settle = settle;
        self.cursor = now;
        self.waiting = None;
        self.last_outcome = None;
    }

    /// Queue `steps` behind the current script, continuing from its cursor
    fn extend(&mut self, steps: Vec<Step>, settle: Phase) {
        self.script.extend(steps);
        self.settle = settle;
    }

    /// Play `order` back from the overview, then drop the participant in
    pub fn begin_memorization(&mut self, now: f64, order: &[usize], settings: &TaskSettings) {
        let memo = &settings.memorization;
        let mut steps = vec![
            Step::emit(Phase::Memorization, Cue::ConcealAll, 0.0),
            Step::emit(Phase::Memorization, Cue::Vantage(Vantage::Overview), 0.0),
        ];
        for rep in 0..memo.repetitions {
            for &index in order {
                steps.push(Step::emit(Phase::Memorization, Cue::Reveal(index), memo.reward_display));
                steps.push(Step::emit(
                    Phase::Memorization,
                    Cue::Conceal(index),
                    memo.pause_between_rewards,
                ));
            }
            if rep + 1 < memo.repetitions {
                steps.push(Step::hold(Phase::Memorization, memo.pause_between_sequences));
            }
        }
        steps.push(Step::hold(Phase::Memorization, memo.pause_before_drop));
        steps.push(Step::emit(
            Phase::Drop,
            Cue::Vantage(Vantage::Participant),
            settings.transition_duration,
        ));
        steps.push(Step::emit(Phase::Exploring, Cue::BeginTrial, 0.0));

        log::info!(
            "Memorization: {} rewards x {} repetitions",
            order.len(),
            memo.repetitions
        );
        self.start(now, steps, Phase::Exploring);
    }

    fn probe_steps(&mut self, reward_count: usize, settings: &TaskSettings) -> Vec<Step> {
        let instr = &settings.instruction;
        let target = self.rng.gen_range(0..reward_count.max(1));
        self.probes_started += 1;
        log::info!("Instruction probe {} on reward {}", self.probes_started, target);

        vec![
            Step::emit(Phase::ProbeReveal, Cue::ConcealAll, 0.0),
            Step::emit(Phase::ProbeReveal, Cue::Vantage(Vantage::Overview), 0.0),
            Step::emit(Phase::ProbeReveal, Cue::Reveal(target), instr.display_duration),
            Step::emit(Phase::ProbeReveal, Cue::Conceal(target), 0.0),
            Step::emit(Phase::ProbeReveal, Cue::ArmProbe(target), instr.pause_after_hide),
            Step::emit(
                Phase::ProbeDrop,
                Cue::Vantage(Vantage::Participant),
                settings.transition_duration + instr.drop_margin,
            ),
            Step {
                phase: Phase::AwaitingCommit,
                action: Action::AwaitCommit {
                    timeout: instr.commit_timeout,
                },
                hold: 0.0,
            },
            Step::hold(Phase::Feedback, instr.feedback_duration),
            Step {
                phase: Phase::Feedback,
                action: Action::ReportOutcome,
                hold: 0.0,
            },
        ]
    }

    /// First probe of the instruction phase
    pub fn begin_instruction(&mut self, now: f64, reward_count: usize, settings: &TaskSettings) {
        self.probes_started = 0;
        let steps = self.probe_steps(reward_count, settings);
        self.start(now, steps, Phase::Idle);
    }

    /// Next probe after the inter-trial pause
    pub fn next_probe(&mut self, reward_count: usize, settings: &TaskSettings) {
        let mut steps = vec![
            Step::emit(Phase::InterTrial, Cue::ConcealAll, 0.0),
            Step::hold(Phase::InterTrial, settings.instruction.pause_between_trials),
        ];
        steps.extend(self.probe_steps(reward_count, settings));
        self.extend(steps, Phase::Idle);
    }

    /// Streak reached: back to the overview, then hand over to the main task
    pub fn finish_instruction(&mut self, settings: &TaskSettings) {
        let steps = vec![
            Step::emit(Phase::Outro, Cue::ConcealAll, 0.0),
            Step::emit(
                Phase::Outro,
                Cue::Vantage(Vantage::Overview),
                settings.instruction.exit_delay,
            ),
            Step::emit(Phase::Outro, Cue::InstructionComplete, 0.0),
        ];
        self.extend(steps, Phase::Idle);
    }

    /// The armed probe was answered at `now`. Ignored when no commit is
    /// awaited or the answer comes at or after the deadline.
    pub fn resolve_commit(&mut self, hit: bool, now: f64) -> bool {
        match self.waiting.as_mut() {
            Some(wait) if wait.resolution.is_none() && now < wait.deadline => {
                wait.resolution = Some((hit, now));
                true
            }
            _ => false,
        }
    }

    /// Stop everything scheduled
    pub fn halt(&mut self) {
        self.script.clear();
        self.waiting = None;
        self.phase = Phase::Done;
        self.settle = Phase::Done;
    }

    /// Run every step due at `now` and return the cues they emitted
    pub fn tick(&mut self, now: f64) -> Vec<Cue> {
        let mut cues = Vec::new();

        loop {
            if let Some(wait) = self.waiting {
                let (hit, timed_out, resolved_at) = match wait.resolution {
                    Some((hit, at)) => (hit, false, at),
                    None if now >= wait.deadline => (false, true, wait.deadline),
                    None => break,
                };
                if timed_out {
                    log::info!("Probe timed out at {:.2}", wait.deadline);
                }
                self.waiting = None;
                self.last_outcome = Some(hit);
                self.cursor = resolved_at;
                cues.push(Cue::ProbeResolved { hit, timed_out });
                continue;
            }

            if now < self.cursor {
                break;
            }

            let step = match self.script.pop_front() {
                Some(step) => step,
                None => {
                    self.phase = self.settle;
                    break;
                }
            };
            self.phase = step.phase;

            match step.action {
                Action::Emit(cue) => cues.push(cue),
                Action::Hold => {}
                Action::AwaitCommit { timeout } => {
                    self.waiting = Some(CommitWait {
                        deadline: self.cursor + timeout,
                        resolution: None,
                    });
                }
                Action::ReportOutcome => {
                    let hit = self.last_outcome.take().unwrap_or(false);
                    cues.push(Cue::ProbeComplete { hit });
                }
            }
            self.cursor += step.hold;
        }

        cues
    }
}
