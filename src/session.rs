//! # Experiment Session
//!
//! Top-level flow of one participant's run:
//!
//! ```text
//! Welcome ──begin──► Instruction ──streak reached──► FreeMovement ──last repetition──► Ending
//!            │                                           ▲
//!            └──────────── instruction disabled ─────────┘
//! ```
//!
//! The session owns every component and the [`TaskContext`], and is driven
//! entirely by its caller:
//!
//! - [`ExperimentSession::tick`] once per frame or timer callback
//! - [`ExperimentSession::position_changed`] whenever the participant moves
//! - [`ExperimentSession::commit`] once per commit key press
//!
//! ## Usage
//!
//! ```rust,ignore
//! use abcd_task::prelude::*;
//!
//! let configurations = ConfigurationSet::load_file("layout.json")?;
//! let mut session = ExperimentSession::new(configurations, TaskSettings::default(), TaskContext::default())?;
//! session.begin(0.0)?;
//! while !session.is_finished() {
//!     let now = clock.now();
//!     session.tick(now)?;
//!     session.position_changed(tracker.position(), now);
//!     if keyboard.commit_pressed() {
//!         session.commit(tracker.position(), now);
//!     }
//! }
//! session.finish();
//! ```

use serde::{Deserialize, Serialize};

use crate::choreography::{Cue, PhaseChoreographer};
use crate::configuration::ConfigurationSet;
use crate::context::TaskContext;
use crate::event_log::{unix_timestamp, TaskEvent};
use crate::geometry::{Heading, Position3D};
use crate::lifecycle::{LifecycleEvent, LifecycleState, TrialLifecycle};
use crate::sequence::{EvaluationResult, GateMode, RejectReason, SequenceGate};
use crate::settings::TaskSettings;
use crate::streak::StreakGate;
use crate::TaskResult;

/// Key name written into key-press records
pub const COMMIT_KEY: &str = "space";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Welcome,
    Instruction,
    FreeMovement,
    Ending,
}

impl FlowStage {
    pub fn name(&self) -> &'static str {
        match self {
            FlowStage::Welcome => "welcome",
            FlowStage::Instruction => "instruction",
            FlowStage::FreeMovement => "free_movement",
            FlowStage::Ending => "ending",
        }
    }

    fn is_interactive(&self) -> bool {
        matches!(self, FlowStage::Instruction | FlowStage::FreeMovement)
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Commit bookkeeping over the whole session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub commits: usize,
    pub hits: usize,
    pub misses: usize,
    pub debounced: usize,
    pub rejected: usize,
    pub probes_timed_out: usize,
    pub probes_completed: usize,
}

#[derive(Debug)]
pub struct ExperimentSession {
    settings: TaskSettings,
    lifecycle: TrialLifecycle,
    gate: SequenceGate,
    choreographer: PhaseChoreographer,
    streak: StreakGate,
    context: TaskContext,
    stage: FlowStage,
    position: Position3D,
    stats: SessionStats,
}

impl ExperimentSession {
    pub fn new(
        configurations: ConfigurationSet,
        settings: TaskSettings,
        context: TaskContext,
    ) -> TaskResult<Self> {
        settings.validate()?;
        let lifecycle =
            TrialLifecycle::new(configurations, settings.resolver(), settings.settle_delay)?;

        log::info!(
            "Session for {} ({} configurations x {} repetitions)",
            context.participant.participant,
            lifecycle.configurations().len(),
            lifecycle.configurations().repetitions_per_configuration()
        );

        Ok(Self {
            gate: SequenceGate::new(GateMode::StrictSequence, settings.debounce_window),
            choreographer: PhaseChoreographer::new(settings.seed),
            streak: StreakGate::new(settings.instruction.required_streak),
            lifecycle,
            settings,
            context,
            stage: FlowStage::Welcome,
            position: Position3D::origin(),
            stats: SessionStats::default(),
        })
    }

    /// Leave the welcome stage
    pub fn begin(&mut self, now: f64) -> TaskResult<()> {
        if self.stage != FlowStage::Welcome {
            log::warn!("begin() ignored in stage {}", self.stage);
            return Ok(());
        }
        if self.settings.instruction.enabled {
            self.enter_instruction(now)
        } else {
            self.enter_free_movement(now)
        }
    }

    fn set_stage(&mut self, stage: FlowStage) {
        log::info!("Stage {} -> {}", self.stage, stage);
        self.stage = stage;
        self.context.listener().on_stage_changed(stage.name());
    }

    fn enter_instruction(&mut self, now: f64) -> TaskResult<()> {
        self.set_stage(FlowStage::Instruction);
        self.lifecycle.load_configuration(0, &mut self.context)?;
        self.gate.set_mode(GateMode::SingleProbe);
        self.streak.reset();

        let reward_count = self.lifecycle.active_configuration().reward_count();
        self.choreographer
            .begin_instruction(now, reward_count, &self.settings);
        self.pump(now)
    }

    fn enter_free_movement(&mut self, now: f64) -> TaskResult<()> {
        self.set_stage(FlowStage::FreeMovement);
        self.lifecycle.restart(&mut self.context)?;
        self.gate.set_mode(GateMode::StrictSequence);
        self.start_memorization(now);
        self.pump(now)
    }

    fn start_memorization(&mut self, now: f64) {
        let order = self.lifecycle.active_configuration().visiting_order();
        self.choreographer
            .begin_memorization(now, &order, &self.settings);
    }

    fn complete_experiment(&mut self) {
        self.choreographer.halt();
        self.gate.close();
        self.context.listener().on_experiment_complete();
        self.set_stage(FlowStage::Ending);
        self.context.flush_log();
    }

    /// Advance timers: pending lifecycle transitions, then the choreography
    pub fn tick(&mut self, now: f64) -> TaskResult<()> {
        if !self.stage.is_interactive() {
            return Ok(());
        }
        if let Some(event) = self.lifecycle.tick(now, &mut self.context) {
            self.on_lifecycle_event(event, now);
        }
        self.pump(now)
    }

    fn on_lifecycle_event(&mut self, event: LifecycleEvent, now: f64) {
        match event {
            LifecycleEvent::TrialReset {
                config_index,
                repetition,
            } => {
                self.context
                    .listener()
                    .on_repetition_advance(config_index, repetition);
                self.lifecycle
                    .begin_trial(now, self.position, &mut self.context);
                self.gate.open_sequence(&self.lifecycle);
            }
            LifecycleEvent::ConfigurationLoaded { config_index } => {
                self.context.listener().on_configuration_advance(config_index);
                self.gate.close();
                self.start_memorization(now);
            }
        }
    }

    /// Apply cues until the choreography has nothing more due at `now`
    fn pump(&mut self, now: f64) -> TaskResult<()> {
        loop {
            let cues = self.choreographer.tick(now);
            if cues.is_empty() {
                return Ok(());
            }
            for cue in cues {
                self.apply_cue(cue, now)?;
            }
        }
    }

    fn apply_cue(&mut self, cue: Cue, now: f64) -> TaskResult<()> {
        match cue {
            Cue::Reveal(index) => self.context.display().show_reward(index),
            Cue::Conceal(index) => self.context.display().hide_reward(index),
            Cue::ConcealAll => self.context.display().hide_all(),
            Cue::Vantage(vantage) => self.context.display().set_vantage(vantage),
            Cue::BeginTrial => {
                self.lifecycle
                    .begin_trial(now, self.position, &mut self.context);
                self.gate.open_sequence(&self.lifecycle);
            }
            Cue::ArmProbe(index) => {
                self.gate.arm_probe(&mut self.lifecycle, index);
            }
            Cue::ProbeResolved { hit, timed_out } => {
                if timed_out {
                    self.stats.probes_timed_out += 1;
                    self.gate.disarm_probe(&mut self.lifecycle);
                }
                log::info!(
                    "Probe resolved: {}",
                    match (hit, timed_out) {
                        (_, true) => "timeout",
                        (true, _) => "correct",
                        (false, _) => "incorrect",
                    }
                );
            }
            Cue::ProbeComplete { hit } => {
                self.stats.probes_completed += 1;
                self.streak.on_outcome(hit);
                if self.streak.is_satisfied() {
                    log::info!(
                        "Instruction streak of {} reached",
                        self.streak.consecutive_correct()
                    );
                    self.context
                        .listener()
                        .on_instruction_streak_satisfied(self.streak.consecutive_correct());
                    self.choreographer.finish_instruction(&self.settings);
                } else {
                    let reward_count = self.lifecycle.active_configuration().reward_count();
                    self.choreographer.next_probe(reward_count, &self.settings);
                }
            }
            Cue::InstructionComplete => {
                if self.stage == FlowStage::Instruction {
                    self.enter_free_movement(now)?;
                }
            }
        }
        Ok(())
    }

    /// One commit key press at `position`
    pub fn commit(&mut self, position: Position3D, now: f64) -> EvaluationResult {
        // timers due by `now` fire before the press is judged
        if let Err(e) = self.tick(now) {
            log::warn!("Catching up before commit at {:.3} failed: {}", now, e);
        }
        if !self.stage.is_interactive() || !self.choreographer.accepts_commits() {
            return EvaluationResult::Rejected(RejectReason::InputLocked);
        }
        self.position = position;

        let round = self.lifecycle.state().active_config_index;
        let rep = self.lifecycle.state().repetitions_completed;
        let result = self
            .gate
            .evaluate(&mut self.lifecycle, position, now, &mut self.context);

        if result == EvaluationResult::Debounced {
            self.stats.debounced += 1;
            return result;
        }

        self.stats.commits += 1;
        let key_index = self.lifecycle.record_key_press();
        let t_global = unix_timestamp();
        self.context.log(
            round,
            rep,
            TaskEvent::KeyPress {
                t_global,
                t_curr_run: self.lifecycle.trial_elapsed(now),
                key_pressed: COMMIT_KEY.to_string(),
                key_index,
                position,
            },
        );

        match &result {
            EvaluationResult::Hit(verdict) => {
                self.stats.hits += 1;
                if verdict.probe {
                    self.choreographer.resolve_commit(true, now);
                } else {
                    let moves_to_find = self.lifecycle.take_moves_since_reward();
                    let letter = verdict.label.to_string();
                    self.context.log(
                        round,
                        rep,
                        TaskEvent::Reward {
                            reward_loc: verdict.center,
                            t_reward_start: self.lifecycle.trial_elapsed(now),
                            t_global,
                            reward_letter: letter.clone(),
                            reward_index: verdict.target_index,
                            state: letter,
                            moves_to_find,
                        },
                    );
                }
                if verdict.completion == Some(LifecycleState::ExperimentComplete) {
                    self.complete_experiment();
                }
            }
            EvaluationResult::Miss(verdict) => {
                self.stats.misses += 1;
                if verdict.probe {
                    self.choreographer.resolve_commit(false, now);
                }
                self.context.log(
                    round,
                    rep,
                    TaskEvent::Miss {
                        position,
                        target_index: verdict.target_index,
                        distance: verdict.distance(),
                    },
                );
            }
            EvaluationResult::Rejected(reason) => {
                self.stats.rejected += 1;
                log::debug!("Commit rejected: {:?}", reason);
            }
            EvaluationResult::Debounced => {}
        }
        result
    }

    /// The participant moved to `position`
    pub fn position_changed(&mut self, position: Position3D, now: f64) {
        let previous = self.position;
        self.position = position;
        if previous == position || !self.stage.is_interactive() {
            return;
        }

        if self.choreographer.accepts_commits() {
            self.log_movement(previous, position, now);
        }
        self.gate
            .on_position_changed(&mut self.lifecycle, position, &mut self.context);
    }

    fn log_movement(&mut self, from: Position3D, to: Position3D, now: f64) {
        let movement_index = self.lifecycle.record_movement();
        let target_index = self.target_index();
        let configuration = self.lifecycle.active_configuration();
        let target = target_index.and_then(|i| configuration.position(i));
        let state = target_index
            .map(|i| configuration.label(i).to_string())
            .unwrap_or_else(|| "none".to_string());
        let found_reward = target
            .map(|center| self.lifecycle.acceptance().contains(&center, &to))
            .unwrap_or(false);
        let trial_type = configuration.trial_type().to_string();

        let round = self.lifecycle.state().active_config_index;
        let rep = self.lifecycle.state().repetitions_completed;
        self.context.log(
            round,
            rep,
            TaskEvent::Movement {
                from,
                to,
                t_curr_run: self.lifecycle.trial_elapsed(now),
                direction: Heading::between(&from, &to),
                target,
                trial_type,
                state,
                found_reward,
                movement_index,
            },
        );
    }

    fn target_index(&self) -> Option<usize> {
        let state = self.lifecycle.state();
        if let Some(index) = state.instruction_target_index {
            return Some(index);
        }
        if self.gate.mode() == GateMode::StrictSequence
            && self.stage == FlowStage::FreeMovement
            && !state.trial_complete
        {
            return self.lifecycle.expected_reward();
        }
        None
    }

    /// Reward the participant should find now and where it is
    pub fn current_target(&self) -> Option<(usize, Position3D)> {
        let index = self.target_index()?;
        let center = self.lifecycle.active_configuration().position(index)?;
        Some((index, center))
    }

    /// Flush the event log
    pub fn finish(&mut self) {
        self.context.flush_log();
        log::info!(
            "Session finished in stage {}: {} commits, {} hits, {} misses",
            self.stage,
            self.stats.commits,
            self.stats.hits,
            self.stats.misses
        );
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == FlowStage::Ending
    }

    /// Commits would currently be evaluated
    pub fn accepts_commits(&self) -> bool {
        self.stage.is_interactive() && self.choreographer.accepts_commits()
    }

    pub fn position(&self) -> Position3D {
        self.position
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub fn lifecycle(&self) -> &TrialLifecycle {
        &self.lifecycle
    }

    pub fn gate(&self) -> &SequenceGate {
        &self.gate
    }

    pub fn choreographer(&self) -> &PhaseChoreographer {
        &self.choreographer
    }

    pub fn streak(&self) -> &StreakGate {
        &self.streak
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TaskContext {
        &mut self.context
    }
}
