//! Integration Tests for the ABCD Task Engine
//!
//! Cross-module behaviour: tolerance inference, sequence properties under
//! random input, and full sessions driven through the public API.

use crate::choreography::Phase;
use crate::configuration::{Configuration, ConfigurationSet, SequenceDirection};
use crate::context::{FlowSignal, SignalRecorder, TaskContext, VisibilityBoard};
use crate::event_log::{JsonlEventLog, MemoryEventLog, ParticipantInfo};
use crate::geometry::Position3D;
use crate::grid::{GridExtents, GridToleranceResolver, DEFAULT_CELL_SPACING};
use crate::lifecycle::TrialLifecycle;
use crate::sequence::{EvaluationResult, GateMode, RejectReason, SequenceGate};
use crate::session::{ExperimentSession, FlowStage};
use crate::settings::TaskSettings;
use crate::simulation::{run_simulation, SimulatedParticipant};
use crate::streak::StreakGate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn square_positions() -> Vec<Position3D> {
    vec![
        Position3D::planar(0.0, 0.0),
        Position3D::planar(10.0, 0.0),
        Position3D::planar(10.0, 10.0),
        Position3D::planar(0.0, 10.0),
    ]
}

fn square_lifecycle(repetitions: usize) -> TrialLifecycle {
    let config =
        Configuration::new("Square", SequenceDirection::Forward, square_positions()).unwrap();
    let set = ConfigurationSet::new(vec![config], repetitions).unwrap();
    TrialLifecycle::new(set, GridToleranceResolver::default(), 2.0).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// TOLERANCE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tolerance_tests {
    use super::*;

    #[test]
    fn test_cell_width_independent_of_order() {
        let a = Position3D::planar(0.0, 0.0);
        let b = Position3D::planar(10.0, 0.0);
        let c = Position3D::planar(20.0, 0.0);
        let orders = [
            vec![a, b, c],
            vec![c, b, a],
            vec![b, a, c],
            vec![c, a, b],
        ];

        for positions in &orders {
            let extents = GridExtents::infer(positions, DEFAULT_CELL_SPACING);
            assert!((extents.cell_width - 10.0).abs() < 1e-12);
            // one distinct z value
            assert!((extents.cell_depth - DEFAULT_CELL_SPACING).abs() < 1e-12);
        }
    }

    #[test]
    fn test_center_always_hits_edge_plus_epsilon_misses() {
        let positions = square_positions();
        for fraction in [0.01, 0.1, 0.25, 0.45, 0.499] {
            let acceptance = GridToleranceResolver::new(fraction).resolve(&positions);
            for center in &positions {
                assert!(acceptance.contains(center, center));
                let outside = Position3D::planar(center.x + acceptance.half_x + 1e-9, center.z);
                assert!(!acceptance.contains(center, &outside));
            }
        }
    }

    #[test]
    fn test_single_reward_uses_fallback_on_both_axes() {
        let acceptance = GridToleranceResolver::default().resolve(&[Position3D::planar(3.0, 4.0)]);
        assert!((acceptance.half_x - DEFAULT_CELL_SPACING * 0.45).abs() < 1e-12);
        assert!((acceptance.half_z - DEFAULT_CELL_SPACING * 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_boxes_of_neighbours_never_overlap() {
        let acceptance = GridToleranceResolver::default().resolve(&square_positions());
        let midpoint = Position3D::planar(5.0, 0.0);
        let a = Position3D::planar(0.0, 0.0);
        let b = Position3D::planar(10.0, 0.0);
        assert!(!(acceptance.contains(&a, &midpoint) && acceptance.contains(&b, &midpoint)));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEQUENCE PROPERTY TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod sequence_tests {
    use super::*;

    #[test]
    fn test_square_scenario_in_order() {
        let mut ctx = TaskContext::default();
        let mut lc = square_lifecycle(1);
        let mut gate = SequenceGate::new(GateMode::StrictSequence, 0.25);

        let mut progress = vec![lc.state().next_expected_index];
        for (i, center) in square_positions().into_iter().enumerate() {
            let result = gate.evaluate(&mut lc, center, i as f64, &mut ctx);
            assert!(result.is_hit(), "commit {} should hit", i);
            progress.push(lc.state().next_expected_index);
        }

        assert!(lc.state().trial_complete);
        assert_eq!(progress, vec![0, 1, 2, 3, 4]);
        assert!(progress.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_progress_moves_by_one_per_sequence_hit() {
        let mut rng = StdRng::seed_from_u64(2024);
        let mut ctx = TaskContext::default();
        let mut lc = square_lifecycle(10_000);
        let mut gate = SequenceGate::new(GateMode::StrictSequence, 0.25);
        let positions = square_positions();
        let count = positions.len();
        let mut now = 0.0;

        for _ in 0..2_000 {
            if lc.state().trial_complete {
                assert_eq!(lc.state().next_expected_index, count);
                lc.reset_trial(&mut ctx);
            }
            if rng.gen_bool(0.3) {
                gate.arm_probe(&mut lc, rng.gen_range(0..count));
            }

            let base = positions[rng.gen_range(0..count)];
            let candidate = Position3D::planar(
                base.x + rng.gen_range(-6.0..6.0),
                base.z + rng.gen_range(-6.0..6.0),
            );
            now += rng.gen_range(0.0..0.6);

            let before = lc.state().next_expected_index;
            let result = gate.evaluate(&mut lc, candidate, now, &mut ctx);
            let after = lc.state().next_expected_index;

            match &result {
                EvaluationResult::Hit(v) if !v.probe => assert_eq!(after, before + 1),
                _ => assert_eq!(after, before),
            }
            assert!(after <= count);
        }
    }

    #[test]
    fn test_probe_commits_never_touch_progress() {
        let mut rng = StdRng::seed_from_u64(77);
        let mut ctx = TaskContext::default();
        let mut lc = square_lifecycle(1);
        let mut gate = SequenceGate::new(GateMode::SingleProbe, 0.25);
        let positions = square_positions();

        for i in 0..500 {
            gate.arm_probe(&mut lc, rng.gen_range(0..positions.len()));
            let base = positions[rng.gen_range(0..positions.len())];
            let candidate = Position3D::planar(base.x + rng.gen_range(-3.0..3.0), base.z);

            let result = gate.evaluate(&mut lc, candidate, i as f64, &mut ctx);
            assert!(result.verdict().map(|v| v.probe).unwrap_or(false));
            assert_eq!(lc.state().next_expected_index, 0);
            assert_eq!(lc.state().instruction_target_index, None);
        }
    }

    #[test]
    fn test_double_delivery_mutates_once() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut ctx = TaskContext::default();
        let mut lc = square_lifecycle(10_000);
        let mut gate = SequenceGate::new(GateMode::StrictSequence, 0.25);
        let mut now = 0.0;

        for _ in 0..200 {
            if lc.state().trial_complete {
                lc.reset_trial(&mut ctx);
            }
            let target = lc.expected_reward().unwrap();
            let center = square_positions()[target];
            now += 0.3 + rng.gen_range(0.0..1.0);

            let before = lc.state().next_expected_index;
            assert!(gate.evaluate(&mut lc, center, now, &mut ctx).is_hit());
            let echo = now + rng.gen_range(0.0..0.2499);
            assert_eq!(
                gate.evaluate(&mut lc, center, echo, &mut ctx),
                EvaluationResult::Debounced
            );
            assert_eq!(lc.state().next_expected_index, before + 1);
        }
    }

    #[test]
    fn test_streak_scenario() {
        let mut gate = StreakGate::new(3);
        let outcomes = [true, true, false, true, true, true];
        let satisfied: Vec<bool> = outcomes
            .iter()
            .map(|hit| {
                gate.on_outcome(*hit);
                gate.is_satisfied()
            })
            .collect();
        assert_eq!(satisfied, vec![false, false, false, false, false, true]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod session_tests {
    use super::*;

    const TICK: f64 = 0.05;

    fn two_squares(repetitions: usize) -> ConfigurationSet {
        ConfigurationSet::new(
            vec![
                Configuration::new("Forward", SequenceDirection::Forward, square_positions())
                    .unwrap(),
                Configuration::new("Backward", SequenceDirection::Backward, square_positions())
                    .unwrap(),
            ],
            repetitions,
        )
        .unwrap()
    }

    fn run_until(
        session: &mut ExperimentSession,
        now: &mut f64,
        done: impl Fn(&ExperimentSession) -> bool,
    ) {
        for _ in 0..200_000 {
            if done(session) {
                return;
            }
            *now += TICK;
            session.tick(*now).unwrap();
        }
        panic!("condition not reached by t = {}", now);
    }

    fn ready(session: &ExperimentSession) -> bool {
        session.accepts_commits() && session.current_target().is_some()
    }

    #[test]
    fn test_full_session_without_instruction() {
        let board = VisibilityBoard::new();
        let recorder = SignalRecorder::new();
        let log = MemoryEventLog::new();
        let ctx = TaskContext::new(ParticipantInfo::test())
            .with_display(board.clone())
            .with_listener(recorder.clone())
            .with_event_sink(log.clone());
        let settings = TaskSettings::compressed(0.1).without_instruction().with_seed(1);
        let mut session = ExperimentSession::new(two_squares(2), settings, ctx).unwrap();

        let mut now = 0.0;
        session.begin(now).unwrap();
        assert_eq!(session.stage(), FlowStage::FreeMovement);

        for _config in 0..2 {
            for _rep in 0..2 {
                run_until(&mut session, &mut now, ready);
                for index in 0..4 {
                    let (target, center) = session.current_target().unwrap();
                    assert_eq!(target, index);
                    now += 0.3;
                    session.tick(now).unwrap();
                    session.position_changed(center, now);
                    assert!(session.commit(center, now).is_hit());
                }
            }
        }

        assert!(session.is_finished());
        assert_eq!(
            recorder.signals(),
            vec![
                FlowSignal::StageChanged {
                    stage: "free_movement".to_string()
                },
                FlowSignal::RepetitionAdvance {
                    config_index: 0,
                    repetition: 1
                },
                FlowSignal::ConfigurationAdvance { config_index: 1 },
                FlowSignal::RepetitionAdvance {
                    config_index: 1,
                    repetition: 1
                },
                FlowSignal::ExperimentComplete,
                FlowSignal::StageChanged {
                    stage: "ending".to_string()
                },
            ]
        );

        assert_eq!(log.count("trial_start"), 4);
        assert_eq!(log.count("reward"), 16);
        assert_eq!(log.count("key_press"), 16);
        assert_eq!(log.count("miss"), 0);
        // the very first target sits at the start position
        assert_eq!(log.count("movement"), 15);
        assert_eq!(session.stats().hits, 16);

        // two playbacks then two uncovered trials per layout; only the
        // playback follows the backward direction
        let forward: Vec<usize> = [0, 1, 2, 3].repeat(4);
        let backward_playback: Vec<usize> = [3, 2, 1, 0].repeat(2);
        let uncovered: Vec<usize> = [0, 1, 2, 3].repeat(2);
        assert_eq!(board.shown(), [forward, backward_playback, uncovered].concat());
    }

    #[test]
    fn test_commit_during_playback_is_locked_out() {
        let settings = TaskSettings::default().without_instruction();
        let mut session =
            ExperimentSession::new(two_squares(1), settings, TaskContext::default()).unwrap();
        session.begin(0.0).unwrap();

        assert_eq!(
            session.commit(Position3D::origin(), 0.5),
            EvaluationResult::Rejected(RejectReason::InputLocked)
        );
        assert_eq!(session.gate().last_commit_time(), None);
        assert_eq!(session.lifecycle().state().next_expected_index, 0);
    }

    #[test]
    fn test_miss_and_settle_rejection_are_logged() {
        let log = MemoryEventLog::new();
        let ctx = TaskContext::default().with_event_sink(log.clone());
        let mut settings = TaskSettings::compressed(0.1).without_instruction();
        settings.settle_delay = 1.0;
        let config =
            Configuration::new("Square", SequenceDirection::Forward, square_positions()).unwrap();
        let set = ConfigurationSet::new(vec![config], 2).unwrap();
        let mut session = ExperimentSession::new(set, settings, ctx).unwrap();

        let mut now = 0.0;
        session.begin(now).unwrap();
        run_until(&mut session, &mut now, ready);

        let miss = session.commit(Position3D::planar(10.0, 10.0), now);
        assert!(matches!(miss, EvaluationResult::Miss(ref v) if v.target_index == 0));
        assert_eq!(log.count("miss"), 1);

        for center in square_positions() {
            now += 0.3;
            assert!(session.commit(center, now).is_hit());
        }
        // settle delay before the second repetition
        now += 0.01;
        assert_eq!(
            session.commit(Position3D::origin(), now),
            EvaluationResult::Debounced
        );
        now += 0.3;
        assert_eq!(
            session.commit(Position3D::origin(), now),
            EvaluationResult::Rejected(RejectReason::Terminal)
        );
        assert_eq!(log.count("key_press"), 6);
    }

    #[test]
    fn test_instruction_streak_hands_over_to_main_task() {
        let recorder = SignalRecorder::new();
        let ctx = TaskContext::default().with_listener(recorder.clone());
        let settings = TaskSettings::compressed(0.1).with_seed(7);
        let mut session = ExperimentSession::new(two_squares(1), settings, ctx).unwrap();

        let mut now = 0.0;
        session.begin(now).unwrap();
        assert_eq!(session.stage(), FlowStage::Instruction);

        // hit, miss, then three hits in a row
        let pattern = [true, false, true, true, true];
        for hit in pattern {
            run_until(&mut session, &mut now, ready);
            let (_, center) = session.current_target().unwrap();
            let candidate = if hit {
                center
            } else {
                Position3D::planar(center.x + 100.0, center.z)
            };
            let result = session.commit(candidate, now);
            assert_eq!(result.is_hit(), hit);
            assert!(result.verdict().unwrap().probe);
            assert_eq!(session.lifecycle().state().next_expected_index, 0);
        }

        run_until(&mut session, &mut now, |s| s.stage() != FlowStage::Instruction);
        assert_eq!(session.stage(), FlowStage::FreeMovement);
        assert_eq!(session.stats().probes_completed, 5);
        assert!(recorder
            .signals()
            .contains(&FlowSignal::InstructionStreakSatisfied { streak: 3 }));
        assert_eq!(session.gate().mode(), GateMode::StrictSequence);
    }

    #[test]
    fn test_probe_timeout_counts_as_miss() {
        let mut settings = TaskSettings::compressed(0.1).with_seed(3);
        settings.instruction.commit_timeout = 1.0;
        let mut session =
            ExperimentSession::new(two_squares(1), settings, TaskContext::default()).unwrap();

        let mut now = 0.0;
        session.begin(now).unwrap();
        run_until(&mut session, &mut now, |s| s.stats().probes_timed_out == 1);

        assert_eq!(session.stage(), FlowStage::Instruction);
        assert_eq!(session.lifecycle().state().instruction_target_index, None);
        run_until(&mut session, &mut now, |s| s.stats().probes_completed == 1);
        assert_eq!(session.streak().consecutive_correct(), 0);
    }

    #[test]
    fn test_commit_after_answer_deadline_is_not_a_hit() {
        let mut settings = TaskSettings::compressed(0.1).with_seed(3);
        settings.instruction.commit_timeout = 1.0;
        settings.instruction.feedback_duration = 1.0;
        let mut session =
            ExperimentSession::new(two_squares(1), settings, TaskContext::default()).unwrap();

        let mut now = 0.0;
        session.begin(now).unwrap();
        run_until(&mut session, &mut now, ready);
        let (_, center) = session.current_target().unwrap();

        // no tick between arming and the late press
        let late = session.commit(center, now + 1.5);
        assert_eq!(late, EvaluationResult::Rejected(RejectReason::InputLocked));
        assert_eq!(session.stats().hits, 0);
        assert_eq!(session.stats().probes_timed_out, 1);
        assert_eq!(session.lifecycle().state().instruction_target_index, None);
        assert_eq!(session.choreographer().phase(), Phase::Feedback);

        now += 1.5;
        run_until(&mut session, &mut now, |s| s.stats().probes_completed == 1);
        assert_eq!(session.streak().consecutive_correct(), 0);
    }

    #[test]
    fn test_simulated_run_writes_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("P07_events.jsonl");
        let sink = JsonlEventLog::create(&path).unwrap();
        let ctx = TaskContext::new(ParticipantInfo::from_delimited("P07|ABCD|S1"))
            .with_event_sink(sink);
        let settings = TaskSettings::compressed(0.1).without_instruction().with_seed(11);
        let mut session = ExperimentSession::new(two_squares(2), settings, ctx).unwrap();
        let mut participant = SimulatedParticipant::new(4, 1.0).with_step_size(2.5);

        let report = run_simulation(&mut session, &mut participant, TICK, 1_000.0).unwrap();
        assert!(report.finished);
        assert_eq!(report.log_failures, 0);

        let records = JsonlEventLog::read_all(&path).unwrap();
        assert!(records.iter().all(|r| r.participant == "P07" && r.study_id == "ABCD"));
        let trial_starts = records
            .iter()
            .filter(|r| r.event.kind() == "trial_start")
            .count();
        assert_eq!(trial_starts, 4);
        let rewards = records.iter().filter(|r| r.event.kind() == "reward").count();
        assert_eq!(rewards, 16);
    }
}
