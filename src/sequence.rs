//! # Sequence Gate
//!
//! Decides whether a commit at a candidate position uncovers the reward the
//! participant is supposed to find.
//!
//! One gate serves both trial kinds:
//! - [`GateMode::StrictSequence`]: rewards must be uncovered in sequence
//!   order. A miss has no effect; the participant may retry.
//! - [`GateMode::SingleProbe`]: one armed target, one attempt. Hit or miss
//!   consumes the probe and sequence progress is never touched.
//!
//! An armed probe takes priority over the sequence in either mode.
//!
//! ## Evaluation order
//!
//! 1. debounce (`now - last_commit < window` → [`EvaluationResult::Debounced`])
//! 2. terminal trial or experiment → `Rejected(Terminal)`
//! 3. target selection → `Rejected(InvalidTarget | NoProbeArmed)`
//! 4. closed acceptance-box test on the horizontal plane

use serde::{Deserialize, Serialize};

use crate::context::TaskContext;
use crate::geometry::Position3D;
use crate::grid::AcceptanceBox;
use crate::lifecycle::{LifecycleState, TrialLifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GateMode {
    #[default]
    StrictSequence,
    SingleProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AwaitingCommit { target: usize },
    Resolved { target: usize, hit: bool },
}

/// Why a commit was not evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Trial or experiment already complete
    Terminal,
    /// Target index outside the active configuration
    InvalidTarget,
    /// Single-probe mode with nothing armed
    NoProbeArmed,
    /// Participant is not in control (playback, vantage transition, feedback)
    InputLocked,
}

/// Context of an evaluated commit, enough to log it
#[derive(Debug, Clone, PartialEq)]
pub struct CommitVerdict {
    pub target_index: usize,
    pub label: char,
    pub center: Position3D,
    pub candidate: Position3D,
    pub dx: f64,
    pub dz: f64,
    pub acceptance: AcceptanceBox,
    /// Resolved an armed probe rather than a sequence step
    pub probe: bool,
    /// Lifecycle outcome when this hit finished the repetition
    pub completion: Option<LifecycleState>,
}

impl CommitVerdict {
    pub fn distance(&self) -> f64 {
        self.dx.hypot(self.dz)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Hit(CommitVerdict),
    Miss(CommitVerdict),
    Debounced,
    Rejected(RejectReason),
}

impl EvaluationResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, EvaluationResult::Hit(_))
    }

    pub fn verdict(&self) -> Option<&CommitVerdict> {
        match self {
            EvaluationResult::Hit(v) | EvaluationResult::Miss(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SequenceGate {
    mode: GateMode,
    debounce_window: f64,
    last_commit_time: Option<f64>,
    state: GateState,
}

impl SequenceGate {
    pub fn new(mode: GateMode, debounce_window: f64) -> Self {
        Self {
            mode,
            debounce_window,
            last_commit_time: None,
            state: GateState::Idle,
        }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GateMode) {
        self.mode = mode;
        self.state = GateState::Idle;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn last_commit_time(&self) -> Option<f64> {
        self.last_commit_time
    }

    /// Await the next sequence step of the current trial
    pub fn open_sequence(&mut self, lifecycle: &TrialLifecycle) {
        self.state = match lifecycle.expected_reward() {
            Some(target) => GateState::AwaitingCommit { target },
            None => GateState::Idle,
        };
    }

    pub fn close(&mut self) {
        self.state = GateState::Idle;
    }

    /// Arm a single-probe target. Returns false if `index` is not a reward.
    pub fn arm_probe(&mut self, lifecycle: &mut TrialLifecycle, index: usize) -> bool {
        if index >= lifecycle.active_configuration().reward_count() {
            log::warn!("Refusing to arm probe {}: out of range", index);
            return false;
        }
        lifecycle.state_mut().instruction_target_index = Some(index);
        self.state = GateState::AwaitingCommit { target: index };
        log::debug!("Probe armed on {}", index);
        true
    }

    pub fn disarm_probe(&mut self, lifecycle: &mut TrialLifecycle) {
        if let Some(target) = lifecycle.state_mut().instruction_target_index.take() {
            log::debug!("Probe on {} disarmed", target);
            self.state = GateState::Idle;
        }
    }

    /// Evaluate one commit at `candidate`
    pub fn evaluate(
        &mut self,
        lifecycle: &mut TrialLifecycle,
        candidate: Position3D,
        now: f64,
        ctx: &mut TaskContext,
    ) -> EvaluationResult {
        if let Some(last) = self.last_commit_time {
            if now - last < self.debounce_window {
                log::debug!("Commit at {:.3} debounced (last {:.3})", now, last);
                return EvaluationResult::Debounced;
            }
        }
        self.last_commit_time = Some(now);

        let state = lifecycle.state();
        if state.experiment_complete || state.trial_complete {
            return EvaluationResult::Rejected(RejectReason::Terminal);
        }

        let probe_target = state.instruction_target_index;
        let target_index = match (probe_target, self.mode) {
            (Some(index), _) => index,
            (None, GateMode::StrictSequence) => match lifecycle.expected_reward() {
                Some(index) => index,
                None => return EvaluationResult::Rejected(RejectReason::InvalidTarget),
            },
            (None, GateMode::SingleProbe) => {
                return EvaluationResult::Rejected(RejectReason::NoProbeArmed)
            }
        };

        let configuration = lifecycle.active_configuration();
        let center = match configuration.position(target_index) {
            Some(center) => center,
            None => {
                lifecycle.state_mut().instruction_target_index = None;
                self.state = GateState::Idle;
                return EvaluationResult::Rejected(RejectReason::InvalidTarget);
            }
        };
        let label = configuration.label(target_index);
        let reward_count = configuration.reward_count();
        let acceptance = lifecycle.acceptance();

        let (dx, dz) = candidate.horizontal_offset(&center);
        let hit = acceptance.contains_offset(dx, dz);
        let probe = probe_target.is_some();

        log::info!(
            "Commit target={} dx={:.3} dz={:.3} half=({:.3}, {:.3}) -> {}",
            label,
            dx,
            dz,
            acceptance.half_x,
            acceptance.half_z,
            if hit { "hit" } else { "miss" }
        );

        let mut completion = None;
        if probe {
            lifecycle.state_mut().instruction_target_index = None;
        }
        if hit {
            ctx.display().show_reward(target_index);
            let state = lifecycle.state_mut();
            state.last_revealed_index = Some(target_index);
            if !probe {
                state.next_expected_index += 1;
                if state.next_expected_index == reward_count {
                    completion = Some(lifecycle.complete_repetition(now));
                }
            }
        }

        self.state = match (probe, hit, completion) {
            (false, _, None) => match lifecycle.expected_reward() {
                Some(target) => GateState::AwaitingCommit { target },
                None => GateState::Idle,
            },
            _ => GateState::Resolved {
                target: target_index,
                hit,
            },
        };

        let verdict = CommitVerdict {
            target_index,
            label,
            center,
            candidate,
            dx,
            dz,
            acceptance,
            probe,
            completion,
        };
        if hit {
            EvaluationResult::Hit(verdict)
        } else {
            EvaluationResult::Miss(verdict)
        }
    }

    /// Hide the revealed reward once the participant leaves its square.
    /// Returns the hidden index.
    pub fn on_position_changed(
        &mut self,
        lifecycle: &mut TrialLifecycle,
        position: Position3D,
        ctx: &mut TaskContext,
    ) -> Option<usize> {
        let revealed = lifecycle.state().last_revealed_index?;
        let acceptance = lifecycle.acceptance();

        let still_inside = match lifecycle.active_configuration().position(revealed) {
            Some(center) => acceptance.contains(&center, &position),
            None => false,
        };
        if still_inside {
            return None;
        }

        ctx.display().hide_reward(revealed);
        lifecycle.state_mut().last_revealed_index = None;
        log::debug!("Left square of reward {}, hidden", revealed);
        Some(revealed)
    }
}
