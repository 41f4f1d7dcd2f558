//! # Reward Configurations
//!
//! A configuration is a named, ordered set of hidden reward positions plus
//! the direction in which the participant has to uncover them. The full
//! experiment is an ordered list of configurations, each repeated a fixed
//! number of times.
//!
//! ## File Format
//!
//! ```text
//! {
//!   "configurations": [
//!     { "configName": "Config1", "trialType": "forw",
//!       "rewardPositions": [ {"x": 0, "y": 0.5, "z": 0}, ... ] }
//!   ],
//!   "trialsPerConfig": 3
//! }
//! ```
//!
//! `name`, `direction`, `positions` and `repetitionsPerConfiguration` are
//! accepted as aliases. A missing `trialType` means forward.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use abcd_task::configuration::ConfigurationSet;
//!
//! let set = ConfigurationSet::load_file("layouts/abcd.json")?;
//! let first = set.get(0)?;
//! println!("{} → {}", first.name(), first.sequence_label());
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::TaskError;
use crate::geometry::{reward_letter, sequence_label, Position3D, MAX_REWARDS};
use crate::TaskResult;

/// Order in which the memorization playback visits the rewards.
///
/// Uncovering always runs A, B, C, D; the direction shapes the playback
/// and the trial type tag only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SequenceDirection {
    /// A → B → C → D
    #[default]
    #[serde(rename = "forw", alias = "forward", alias = "Forward")]
    Forward,
    /// D → C → B → A
    #[serde(rename = "backw", alias = "backward", alias = "Backward")]
    Backward,
}

impl SequenceDirection {
    /// Reward index shown at `step` of a playback over `count` rewards
    #[inline]
    pub fn reward_at(&self, step: usize, count: usize) -> Option<usize> {
        if step >= count {
            return None;
        }
        Some(match self {
            SequenceDirection::Forward => step,
            SequenceDirection::Backward => count - 1 - step,
        })
    }

    /// Full visiting order over `count` rewards
    pub fn order(&self, count: usize) -> Vec<usize> {
        (0..count).filter_map(|step| self.reward_at(step, count)).collect()
    }

    /// Trial type tag used in the event log
    pub fn trial_type(&self) -> &'static str {
        match self {
            SequenceDirection::Forward => "forw",
            SequenceDirection::Backward => "backw",
        }
    }
}

/// A named, validated reward layout
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    name: String,
    direction: SequenceDirection,
    reward_positions: Vec<Position3D>,
}

impl Configuration {
    /// Build a configuration, refusing empty or unlabelable layouts
    pub fn new(
        name: impl Into<String>,
        direction: SequenceDirection,
        reward_positions: Vec<Position3D>,
    ) -> TaskResult<Self> {
        Self::validated(0, name.into(), direction, reward_positions)
    }

    fn validated(
        index: usize,
        name: String,
        direction: SequenceDirection,
        reward_positions: Vec<Position3D>,
    ) -> TaskResult<Self> {
        if reward_positions.is_empty() {
            return Err(TaskError::EmptyRewardPositions { index, name });
        }
        if reward_positions.len() > MAX_REWARDS {
            return Err(TaskError::TooManyRewards {
                index,
                count: reward_positions.len(),
                max: MAX_REWARDS,
            });
        }
        if let Some(reward) = reward_positions.iter().position(|p| !p.is_finite()) {
            return Err(TaskError::NonFinitePosition { index, reward });
        }

        Ok(Self {
            name,
            direction,
            reward_positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> SequenceDirection {
        self.direction
    }

    pub fn reward_positions(&self) -> &[Position3D] {
        &self.reward_positions
    }

    pub fn reward_count(&self) -> usize {
        self.reward_positions.len()
    }

    pub fn position(&self, index: usize) -> Option<Position3D> {
        self.reward_positions.get(index).copied()
    }

    pub fn label(&self, index: usize) -> char {
        reward_letter(index)
    }

    pub fn visiting_order(&self) -> Vec<usize> {
        self.direction.order(self.reward_count())
    }

    /// "A-B-C-D" or "D-C-B-A"
    pub fn sequence_label(&self) -> String {
        sequence_label(&self.visiting_order())
    }

    pub fn trial_type(&self) -> &'static str {
        self.direction.trial_type()
    }
}

/// The complete, read-only experiment layout
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSet {
    configurations: Vec<Configuration>,
    repetitions_per_configuration: usize,
}

#[derive(Debug, Deserialize)]
struct RawConfigurationSet {
    #[serde(default)]
    configurations: Vec<RawConfiguration>,
    #[serde(
        default,
        rename = "trialsPerConfig",
        alias = "repetitionsPerConfiguration"
    )]
    repetitions: i64,
}

#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(default, rename = "configName", alias = "name")]
    name: String,
    #[serde(default, rename = "trialType", alias = "direction")]
    direction: SequenceDirection,
    #[serde(default, rename = "rewardPositions", alias = "positions")]
    positions: Option<Vec<Position3D>>,
}

impl ConfigurationSet {
    pub fn new(
        configurations: Vec<Configuration>,
        repetitions_per_configuration: usize,
    ) -> TaskResult<Self> {
        if configurations.is_empty() {
            return Err(TaskError::NoConfigurations);
        }
        if repetitions_per_configuration == 0 {
            return Err(TaskError::InvalidRepetitions(0));
        }
        Ok(Self {
            configurations,
            repetitions_per_configuration,
        })
    }

    /// Parse and validate serialized configuration data.
    ///
    /// Any invalid configuration fails the whole load.
    pub fn load(raw: &str) -> TaskResult<Self> {
        let parsed: RawConfigurationSet = serde_json::from_str(raw)?;

        if parsed.repetitions < 1 {
            return Err(TaskError::InvalidRepetitions(parsed.repetitions));
        }
        if parsed.configurations.is_empty() {
            return Err(TaskError::NoConfigurations);
        }

        let configurations = parsed
            .configurations
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let name = if raw.name.is_empty() {
                    format!("Config{}", index + 1)
                } else {
                    raw.name
                };
                Configuration::validated(
                    index,
                    name,
                    raw.direction,
                    raw.positions.unwrap_or_default(),
                )
            })
            .collect::<TaskResult<Vec<_>>>()?;

        let set = Self::new(configurations, parsed.repetitions as usize)?;
        log::info!(
            "Loaded {} configurations ({} repetitions each)",
            set.len(),
            set.repetitions_per_configuration
        );
        Ok(set)
    }

    pub fn load_file(path: impl AsRef<Path>) -> TaskResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            TaskError::Io(format!("Failed to read configuration {:?}: {}", path, e))
        })?;
        Self::load(&raw)
    }

    pub fn get(&self, index: usize) -> TaskResult<&Configuration> {
        self.configurations
            .get(index)
            .ok_or(TaskError::IndexOutOfRange {
                index,
                len: self.configurations.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// Always false for a loaded set; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn repetitions_per_configuration(&self) -> usize {
        self.repetitions_per_configuration
    }

    pub fn iter(&self) -> impl Iterator<Item = &Configuration> {
        self.configurations.iter()
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.configurations.len()
    }
}
