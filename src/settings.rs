//! # Task Settings
//!
//! Every timing and tolerance parameter of the task. All durations are in
//! seconds of the experiment clock. Missing sections or fields in a settings
//! file take the defaults below.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use abcd_task::settings::TaskSettings;
//!
//! let settings = TaskSettings::from_file("settings.json")?;
//! let quick = TaskSettings::default().with_seed(7);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::TaskError;
use crate::grid::{GridToleranceResolver, DEFAULT_CELL_SPACING, DEFAULT_TOLERANCE_FRACTION};
use crate::TaskResult;

/// Acceptance-box sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceSettings {
    /// Half-extent as a fraction of the inferred cell size
    pub fraction: f64,
    /// Cell size used when an axis spacing cannot be inferred
    pub fallback_spacing: f64,
}

impl Default for ToleranceSettings {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_TOLERANCE_FRACTION,
            fallback_spacing: DEFAULT_CELL_SPACING,
        }
    }
}

/// Sequence playback before each configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorizationSettings {
    /// How many times the full sequence is shown
    pub repetitions: usize,
    pub reward_display: f64,
    pub pause_between_rewards: f64,
    pub pause_between_sequences: f64,
    pub pause_before_drop: f64,
}

impl Default for MemorizationSettings {
    fn default() -> Self {
        Self {
            repetitions: 2,
            reward_display: 1.5,
            pause_between_rewards: 0.5,
            pause_between_sequences: 1.0,
            pause_before_drop: 0.8,
        }
    }
}

/// Single-probe instruction phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionSettings {
    /// Run the instruction phase before the main task
    pub enabled: bool,
    /// Consecutive correct probes needed to leave the phase
    pub required_streak: u32,
    pub display_duration: f64,
    pub pause_after_hide: f64,
    /// Extra wait on top of the vantage transition before commits are taken
    pub drop_margin: f64,
    /// An unanswered probe counts as a miss after this long
    pub commit_timeout: f64,
    pub feedback_duration: f64,
    pub pause_between_trials: f64,
    /// Hold after the streak is reached, before the main task starts
    pub exit_delay: f64,
}

impl Default for InstructionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required_streak: 3,
            display_duration: 3.0,
            pause_after_hide: 0.15,
            drop_margin: 0.1,
            commit_timeout: 30.0,
            feedback_duration: 2.0,
            pause_between_trials: 0.5,
            exit_delay: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub tolerance: ToleranceSettings,
    pub memorization: MemorizationSettings,
    pub instruction: InstructionSettings,
    /// Minimum time between two evaluated commits
    pub debounce_window: f64,
    /// Delay between a finished repetition and the next reset/load
    pub settle_delay: f64,
    /// Overview → participant vantage transition
    pub transition_duration: f64,
    /// Seed for probe selection; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            tolerance: ToleranceSettings::default(),
            memorization: MemorizationSettings::default(),
            instruction: InstructionSettings::default(),
            debounce_window: 0.25,
            settle_delay: 2.0,
            transition_duration: 2.0,
            seed: None,
        }
    }
}

impl TaskSettings {
    pub fn from_json(raw: &str) -> TaskResult<Self> {
        let settings: TaskSettings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> TaskResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| TaskError::Io(format!("Failed to read settings {:?}: {}", path, e)))?;
        let settings = Self::from_json(&raw)?;
        log::info!("Loaded task settings from {:?}", path);
        Ok(settings)
    }

    pub fn to_json(&self) -> TaskResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TaskError::SerializationError(e.to_string()))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn without_instruction(mut self) -> Self {
        self.instruction.enabled = false;
        self
    }

    /// Settings with every pause shortened to `step`, for fast headless runs
    pub fn compressed(step: f64) -> Self {
        let mut settings = Self::default();
        settings.memorization.reward_display = step;
        settings.memorization.pause_between_rewards = step;
        settings.memorization.pause_between_sequences = step;
        settings.memorization.pause_before_drop = step;
        settings.instruction.display_duration = step;
        settings.instruction.pause_after_hide = step;
        settings.instruction.drop_margin = 0.0;
        settings.instruction.feedback_duration = step;
        settings.instruction.pause_between_trials = step;
        settings.instruction.exit_delay = step;
        settings.settle_delay = step;
        settings.transition_duration = step;
        settings
    }

    pub fn resolver(&self) -> GridToleranceResolver {
        GridToleranceResolver::new(self.tolerance.fraction)
            .with_fallback_spacing(self.tolerance.fallback_spacing)
    }

    pub fn validate(&self) -> TaskResult<()> {
        let fraction = self.tolerance.fraction;
        if !(fraction > 0.0 && fraction < 0.5) {
            return Err(TaskError::InvalidSetting(format!(
                "tolerance.fraction must be in (0, 0.5), got {}",
                fraction
            )));
        }
        if !(self.tolerance.fallback_spacing > 0.0) {
            return Err(TaskError::InvalidSetting(format!(
                "tolerance.fallback_spacing must be positive, got {}",
                self.tolerance.fallback_spacing
            )));
        }
        if self.memorization.repetitions == 0 {
            return Err(TaskError::InvalidSetting(
                "memorization.repetitions must be at least 1".to_string(),
            ));
        }
        if self.instruction.required_streak == 0 {
            return Err(TaskError::InvalidSetting(
                "instruction.required_streak must be at least 1".to_string(),
            ));
        }
        if !(self.instruction.commit_timeout > 0.0) {
            return Err(TaskError::InvalidSetting(format!(
                "instruction.commit_timeout must be positive, got {}",
                self.instruction.commit_timeout
            )));
        }

        let durations = [
            ("debounce_window", self.debounce_window),
            ("settle_delay", self.settle_delay),
            ("transition_duration", self.transition_duration),
            ("memorization.reward_display", self.memorization.reward_display),
            ("memorization.pause_between_rewards", self.memorization.pause_between_rewards),
            ("memorization.pause_between_sequences", self.memorization.pause_between_sequences),
            ("memorization.pause_before_drop", self.memorization.pause_before_drop),
            ("instruction.display_duration", self.instruction.display_duration),
            ("instruction.pause_after_hide", self.instruction.pause_after_hide),
            ("instruction.drop_margin", self.instruction.drop_margin),
            ("instruction.feedback_duration", self.instruction.feedback_duration),
            ("instruction.pause_between_trials", self.instruction.pause_between_trials),
            ("instruction.exit_delay", self.instruction.exit_delay),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(TaskError::InvalidSetting(format!(
                    "{} must be a non-negative duration, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
