//! # Headless Simulation
//!
//! A scripted participant for driving a session without a renderer: it
//! walks toward the reward it is supposed to find in fixed steps, and on
//! arrival commits. With probability `1 - accuracy` it aims one cell to
//! the side instead, which is always a miss.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use abcd_task::simulation::{run_simulation, SimulatedParticipant};
//!
//! let mut participant = SimulatedParticipant::new(42, 0.9);
//! let report = run_simulation(&mut session, &mut participant, 0.05, 3600.0)?;
//! println!("finished: {}", report.finished);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::geometry::Position3D;
use crate::session::{ExperimentSession, FlowStage, SessionStats};
use crate::TaskResult;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Plan {
    target: usize,
    aim: Position3D,
}

#[derive(Debug)]
pub struct SimulatedParticipant {
    position: Position3D,
    rng: StdRng,
    accuracy: f64,
    step_size: f64,
    commit_interval: f64,
    plan: Option<Plan>,
    last_commit_at: Option<f64>,
}

impl SimulatedParticipant {
    pub fn new(seed: u64, accuracy: f64) -> Self {
        Self {
            position: Position3D::origin(),
            rng: StdRng::seed_from_u64(seed),
            accuracy: accuracy.clamp(0.0, 1.0),
            step_size: 1.0,
            commit_interval: 0.5,
            plan: None,
            last_commit_at: None,
        }
    }

    /// Distance covered per drive call
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    /// Minimum time between two commits
    pub fn with_commit_interval(mut self, interval: f64) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn starting_at(mut self, position: Position3D) -> Self {
        self.position = position;
        self
    }

    pub fn position(&self) -> Position3D {
        self.position
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    fn plan_for(&mut self, session: &ExperimentSession, target: usize, center: Position3D) -> Plan {
        if self.rng.gen_bool(self.accuracy) {
            return Plan { target, aim: center };
        }
        let cell = session.lifecycle().extents().cell_width;
        let side = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        Plan {
            target,
            aim: Position3D::new(center.x + side * cell, center.y, center.z),
        }
    }

    /// One step of behaviour at `now`
    pub fn drive(&mut self, session: &mut ExperimentSession, now: f64) {
        if !session.accepts_commits() {
            self.plan = None;
            return;
        }
        let Some((target, center)) = session.current_target() else {
            self.plan = None;
            return;
        };

        let plan = match self.plan {
            Some(plan) if plan.target == target => plan,
            _ => {
                let plan = self.plan_for(session, target, center);
                self.plan = Some(plan);
                plan
            }
        };

        let next = self.position.step_towards(&plan.aim, self.step_size);
        if next != self.position {
            self.position = next;
            session.position_changed(next, now);
            return;
        }

        let ready = self
            .last_commit_at
            .map(|t| now - t >= self.commit_interval)
            .unwrap_or(true);
        if ready {
            session.commit(self.position, now);
            self.last_commit_at = Some(now);
            self.plan = None;
        }
    }
}

/// Outcome of a simulated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub finished: bool,
    pub stage: FlowStage,
    /// Experiment time spent
    pub elapsed: f64,
    pub ticks: usize,
    pub stats: SessionStats,
    pub log_failures: usize,
}

/// Drive `session` from t = 0 on a fixed `tick` until it ends or `max_time` passes
pub fn run_simulation(
    session: &mut ExperimentSession,
    participant: &mut SimulatedParticipant,
    tick: f64,
    max_time: f64,
) -> TaskResult<SimulationReport> {
    if !(tick > 0.0) {
        return Err(TaskError::InvalidSetting(format!(
            "simulation tick must be positive, got {}",
            tick
        )));
    }

    session.begin(0.0)?;
    let mut ticks = 0usize;
    let mut now = 0.0;
    while !session.is_finished() && now <= max_time {
        session.tick(now)?;
        participant.drive(session, now);
        ticks += 1;
        now = ticks as f64 * tick;
    }
    session.finish();

    if !session.is_finished() {
        log::warn!(
            "Simulation stopped at {:.1}s in stage {}",
            now,
            session.stage()
        );
    }

    Ok(SimulationReport {
        finished: session.is_finished(),
        stage: session.stage(),
        elapsed: now,
        ticks,
        stats: session.stats().clone(),
        log_failures: session.context().log_failures(),
    })
}
