//! Consecutive-correct counter gating the end of the instruction phase

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakGate {
    consecutive_correct: u32,
    required_streak: u32,
}

impl StreakGate {
    pub fn new(required_streak: u32) -> Self {
        Self {
            consecutive_correct: 0,
            required_streak,
        }
    }

    /// Count a hit, reset on a miss
    pub fn on_outcome(&mut self, hit: bool) {
        if hit {
            self.consecutive_correct = self.consecutive_correct.saturating_add(1);
        } else {
            self.consecutive_correct = 0;
        }
        log::debug!(
            "Instruction streak {}/{}",
            self.consecutive_correct,
            self.required_streak
        );
    }

    /// True exactly when the run reaches the required length
    pub fn is_satisfied(&self) -> bool {
        self.consecutive_correct == self.required_streak
    }

    pub fn consecutive_correct(&self) -> u32 {
        self.consecutive_correct
    }

    pub fn required_streak(&self) -> u32 {
        self.required_streak
    }

    pub fn reset(&mut self) {
        self.consecutive_correct = 0;
    }
}
