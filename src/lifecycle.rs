//! # Trial Lifecycle
//!
//! Owns the per-trial state and walks the experiment through
//! configuration → repetition → trial.
//!
//! ```text
//!   Running(cfg, reps) ──last reward found──► reps += 1
//!        ▲                                       │
//!        │        reps < N          ┌────────────┼─────────────────┐
//!        │   ◄── ResetTrial ◄───────┘            │                 │
//!        │       (settle delay)     reps == N, more configs   reps == N, last config
//!        │                                       │                 │
//!        └──── LoadConfiguration(cfg + 1) ◄──────┘                 ▼
//!              (settle delay)                             ExperimentComplete
//! ```
//!
//! Scheduled transitions carry the generation they were scheduled in.
//! Loading a configuration or finishing the experiment bumps the
//! generation, so a superseded transition can never fire.

use serde::{Deserialize, Serialize};

use crate::configuration::{Configuration, ConfigurationSet};
use crate::context::TaskContext;
use crate::event_log::TaskEvent;
use crate::geometry::Position3D;
use crate::grid::{AcceptanceBox, GridExtents, GridToleranceResolver};
use crate::TaskResult;

/// Mutable state of the running trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialState {
    pub active_config_index: usize,
    pub repetitions_completed: usize,
    /// Progress through the uncover sequence (0..=reward count)
    pub next_expected_index: usize,
    /// Reward currently revealed by a hit, hidden again when left
    pub last_revealed_index: Option<usize>,
    pub trial_complete: bool,
    pub experiment_complete: bool,
    /// Single-probe target; overrides the sequence for one commit
    pub instruction_target_index: Option<usize>,
}

impl TrialState {
    fn fresh(active_config_index: usize) -> Self {
        Self {
            active_config_index,
            repetitions_completed: 0,
            next_expected_index: 0,
            last_revealed_index: None,
            trial_complete: false,
            experiment_complete: false,
            instruction_target_index: None,
        }
    }

    fn reset_trial(&mut self) {
        self.next_expected_index = 0;
        self.last_revealed_index = None;
        self.trial_complete = false;
        self.instruction_target_index = None;
    }
}

/// Per-trial counters used by the event log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialCounters {
    pub key_presses: usize,
    pub movements: usize,
    pub moves_since_reward: usize,
    pub started_at: Option<f64>,
    pub start_position: Position3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Running {
        config_index: usize,
        repetitions_completed: usize,
    },
    /// Waiting for the settle delay before the next repetition
    RepetitionComplete,
    /// Waiting for the settle delay before the next configuration
    ConfigurationComplete,
    /// Terminal
    ExperimentComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    ResetTrial,
    LoadConfiguration(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTransition {
    pub kind: TransitionKind,
    pub due_at: f64,
    pub generation: u64,
}

/// Transition that fired on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    TrialReset {
        config_index: usize,
        repetition: usize,
    },
    ConfigurationLoaded {
        config_index: usize,
    },
}

#[derive(Debug, Clone)]
pub struct TrialLifecycle {
    configurations: ConfigurationSet,
    active: Configuration,
    resolver: GridToleranceResolver,
    extents: GridExtents,
    acceptance: AcceptanceBox,
    state: TrialState,
    lifecycle_state: LifecycleState,
    counters: TrialCounters,
    pending: Option<ScheduledTransition>,
    generation: u64,
    settle_delay: f64,
}

impl TrialLifecycle {
    /// Lifecycle with configuration 0 active
    pub fn new(
        configurations: ConfigurationSet,
        resolver: GridToleranceResolver,
        settle_delay: f64,
    ) -> TaskResult<Self> {
        let active = configurations.get(0)?.clone();
        let extents = resolver.extents(active.reward_positions());

        Ok(Self {
            acceptance: extents.acceptance(resolver.tolerance_fraction),
            extents,
            active,
            configurations,
            resolver,
            state: TrialState::fresh(0),
            lifecycle_state: LifecycleState::Running {
                config_index: 0,
                repetitions_completed: 0,
            },
            counters: TrialCounters::default(),
            pending: None,
            generation: 0,
            settle_delay,
        })
    }

    /// Make configuration `index` active.
    ///
    /// Resets the trial, recomputes the acceptance box, hides every reward
    /// and cancels any pending transition.
    pub fn load_configuration(&mut self, index: usize, ctx: &mut TaskContext) -> TaskResult<()> {
        let configuration = self.configurations.get(index)?.clone();

        self.cancel_pending();
        self.extents = self.resolver.extents(configuration.reward_positions());
        self.acceptance = self.extents.acceptance(self.resolver.tolerance_fraction);
        self.active = configuration;

        self.state.active_config_index = index;
        self.state.reset_trial();
        self.counters = TrialCounters::default();
        self.lifecycle_state = LifecycleState::Running {
            config_index: index,
            repetitions_completed: self.state.repetitions_completed,
        };
        ctx.display().hide_all();

        log::info!(
            "Loaded {} with {} rewards (cell {:.2} x {:.2})",
            self.active.name(),
            self.active.reward_count(),
            self.extents.cell_width,
            self.extents.cell_depth
        );
        log::info!(
            "Starting trial {}/{} of config {}",
            self.state.repetitions_completed + 1,
            self.configurations.repetitions_per_configuration(),
            index
        );
        Ok(())
    }

    /// Back to configuration 0 with no repetitions done
    pub fn restart(&mut self, ctx: &mut TaskContext) -> TaskResult<()> {
        self.state = TrialState::fresh(0);
        self.load_configuration(0, ctx)
    }

    /// Clear sequence progress for the next repetition
    pub fn reset_trial(&mut self, ctx: &mut TaskContext) {
        ctx.display().hide_all();
        self.state.reset_trial();
        self.counters = TrialCounters::default();
        if !self.state.experiment_complete {
            self.lifecycle_state = LifecycleState::Running {
                config_index: self.state.active_config_index,
                repetitions_completed: self.state.repetitions_completed,
            };
        }
        log::info!(
            "Starting trial {}/{} of config {}",
            self.state.repetitions_completed + 1,
            self.configurations.repetitions_per_configuration(),
            self.state.active_config_index
        );
    }

    /// Participant takes control: start the trial clock and log it
    pub fn begin_trial(&mut self, now: f64, start_position: Position3D, ctx: &mut TaskContext) {
        self.counters = TrialCounters {
            started_at: Some(now),
            start_position,
            ..TrialCounters::default()
        };
        ctx.log(
            self.state.active_config_index,
            self.state.repetitions_completed,
            TaskEvent::TrialStart {
                start_time: now,
                trial_type: self.active.trial_type().to_string(),
                sequence: self.active.sequence_label(),
                start_loc: start_position,
            },
        );
        log::info!(
            "Trial started cfg={} rep={}",
            self.state.active_config_index,
            self.state.repetitions_completed
        );
    }

    /// Hand-off when the last reward of the sequence was found
    pub fn complete_repetition(&mut self, now: f64) -> LifecycleState {
        self.state.trial_complete = true;
        self.state.repetitions_completed += 1;

        let reps = self.state.repetitions_completed;
        let required = self.configurations.repetitions_per_configuration();
        let config_index = self.state.active_config_index;
        log::info!("Trial {}/{} of config {} complete", reps, required, config_index);

        if reps < required {
            self.schedule(TransitionKind::ResetTrial, now);
            self.lifecycle_state = LifecycleState::RepetitionComplete;
        } else if !self.configurations.is_last(config_index) {
            log::info!("{} complete", self.active.name());
            self.state.repetitions_completed = 0;
            self.schedule(TransitionKind::LoadConfiguration(config_index + 1), now);
            self.lifecycle_state = LifecycleState::ConfigurationComplete;
        } else {
            log::info!("All configurations completed");
            self.state.experiment_complete = true;
            self.cancel_pending();
            self.lifecycle_state = LifecycleState::ExperimentComplete;
        }
        self.lifecycle_state
    }

    fn schedule(&mut self, kind: TransitionKind, now: f64) {
        self.pending = Some(ScheduledTransition {
            kind,
            due_at: now + self.settle_delay,
            generation: self.generation,
        });
    }

    /// Drop any pending transition and invalidate ones already handed out
    pub fn cancel_pending(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
    }

    /// Fire the pending transition once its delay has elapsed
    pub fn tick(&mut self, now: f64, ctx: &mut TaskContext) -> Option<LifecycleEvent> {
        let transition = self.pending?;
        if transition.generation != self.generation || self.state.experiment_complete {
            self.pending = None;
            return None;
        }
        if now < transition.due_at {
            return None;
        }
        self.pending = None;

        match transition.kind {
            TransitionKind::ResetTrial => {
                self.reset_trial(ctx);
                Some(LifecycleEvent::TrialReset {
                    config_index: self.state.active_config_index,
                    repetition: self.state.repetitions_completed,
                })
            }
            TransitionKind::LoadConfiguration(index) => match self.load_configuration(index, ctx) {
                Ok(()) => Some(LifecycleEvent::ConfigurationLoaded {
                    config_index: index,
                }),
                Err(e) => {
                    log::error!("Scheduled configuration load failed: {}", e);
                    None
                }
            },
        }
    }

    pub fn record_key_press(&mut self) -> usize {
        self.counters.key_presses += 1;
        self.counters.key_presses
    }

    pub fn record_movement(&mut self) -> usize {
        self.counters.movements += 1;
        self.counters.moves_since_reward += 1;
        self.counters.movements
    }

    /// Movements since the last reward; restarts the count
    pub fn take_moves_since_reward(&mut self) -> usize {
        std::mem::take(&mut self.counters.moves_since_reward)
    }

    /// Seconds since the trial started, 0 before it has
    pub fn trial_elapsed(&self, now: f64) -> f64 {
        self.counters.started_at.map(|t| now - t).unwrap_or(0.0)
    }

    /// Reward index due next; rewards are uncovered in layout order
    pub fn expected_reward(&self) -> Option<usize> {
        let next = self.state.next_expected_index;
        (next < self.active.reward_count()).then_some(next)
    }

    pub fn state(&self) -> &TrialState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TrialState {
        &mut self.state
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    pub fn active_configuration(&self) -> &Configuration {
        &self.active
    }

    pub fn configurations(&self) -> &ConfigurationSet {
        &self.configurations
    }

    pub fn acceptance(&self) -> AcceptanceBox {
        self.acceptance
    }

    pub fn extents(&self) -> GridExtents {
        self.extents
    }

    pub fn counters(&self) -> &TrialCounters {
        &self.counters
    }

    pub fn pending_transition(&self) -> Option<&ScheduledTransition> {
        self.pending.as_ref()
    }

    pub fn is_experiment_complete(&self) -> bool {
        self.state.experiment_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::SequenceDirection;
    use crate::context::VisibilityBoard;

    fn square(name: &str) -> Configuration {
        Configuration::new(
            name,
            SequenceDirection::Forward,
            vec![
                Position3D::planar(0.0, 0.0),
                Position3D::planar(10.0, 0.0),
                Position3D::planar(10.0, 10.0),
                Position3D::planar(0.0, 10.0),
            ],
        )
        .unwrap()
    }

    fn lifecycle(configs: usize, reps: usize) -> TrialLifecycle {
        let set = ConfigurationSet::new(
            (0..configs).map(|i| square(&format!("Config{}", i + 1))).collect(),
            reps,
        )
        .unwrap();
        TrialLifecycle::new(set, GridToleranceResolver::default(), 2.0).unwrap()
    }

    #[test]
    fn test_new_activates_first_configuration() {
        let lc = lifecycle(2, 1);
        assert_eq!(lc.state().active_config_index, 0);
        assert_eq!(lc.active_configuration().name(), "Config1");
        assert!((lc.extents().cell_width - 10.0).abs() < 1e-12);
        assert!((lc.acceptance().half_x - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_repetition_schedules_reset_after_settle_delay() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(1, 2);
        lc.state_mut().next_expected_index = 4;

        assert_eq!(lc.complete_repetition(10.0), LifecycleState::RepetitionComplete);
        assert!(lc.state().trial_complete);
        assert_eq!(lc.state().repetitions_completed, 1);

        assert_eq!(lc.tick(11.9, &mut ctx), None);
        assert_eq!(
            lc.tick(12.0, &mut ctx),
            Some(LifecycleEvent::TrialReset {
                config_index: 0,
                repetition: 1
            })
        );
        assert_eq!(lc.state().next_expected_index, 0);
        assert!(!lc.state().trial_complete);
        // fires once
        assert_eq!(lc.tick(12.0, &mut ctx), None);
    }

    #[test]
    fn test_configuration_advance() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(2, 1);

        assert_eq!(lc.complete_repetition(0.0), LifecycleState::ConfigurationComplete);
        assert_eq!(lc.state().repetitions_completed, 0);
        assert_eq!(
            lc.tick(2.0, &mut ctx),
            Some(LifecycleEvent::ConfigurationLoaded { config_index: 1 })
        );
        assert_eq!(lc.active_configuration().name(), "Config2");
        assert_eq!(
            lc.lifecycle_state(),
            LifecycleState::Running {
                config_index: 1,
                repetitions_completed: 0
            }
        );
    }

    #[test]
    fn test_last_repetition_is_terminal() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(1, 1);

        assert_eq!(lc.complete_repetition(0.0), LifecycleState::ExperimentComplete);
        assert!(lc.is_experiment_complete());
        assert!(lc.pending_transition().is_none());
        assert_eq!(lc.tick(100.0, &mut ctx), None);
    }

    #[test]
    fn test_loading_cancels_pending_transition() {
        let board = VisibilityBoard::new();
        let mut ctx = TaskContext::default().with_display(board.clone());
        let mut lc = lifecycle(2, 3);

        lc.complete_repetition(0.0);
        assert!(lc.pending_transition().is_some());

        lc.load_configuration(1, &mut ctx).unwrap();
        assert!(lc.pending_transition().is_none());
        assert_eq!(lc.tick(50.0, &mut ctx), None);
        assert_eq!(lc.state().active_config_index, 1);
        assert!(board.visible().is_empty());
    }

    #[test]
    fn test_stale_generation_never_fires() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(1, 3);
        lc.complete_repetition(0.0);

        // a transition from an older generation left in place
        lc.generation += 1;
        assert_eq!(lc.tick(10.0, &mut ctx), None);
        assert!(lc.pending_transition().is_none());
    }

    #[test]
    fn test_load_out_of_range_is_error() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(1, 1);
        assert!(lc.load_configuration(3, &mut ctx).is_err());
        assert_eq!(lc.state().active_config_index, 0);
    }

    #[test]
    fn test_counters() {
        let mut ctx = TaskContext::default();
        let mut lc = lifecycle(1, 1);
        lc.begin_trial(5.0, Position3D::origin(), &mut ctx);

        lc.record_movement();
        lc.record_movement();
        assert_eq!(lc.record_key_press(), 1);
        assert_eq!(lc.take_moves_since_reward(), 2);
        assert_eq!(lc.take_moves_since_reward(), 0);
        assert_eq!(lc.counters().movements, 2);
        assert!((lc.trial_elapsed(7.5) - 2.5).abs() < 1e-12);
    }
}
