//! Error types for task configuration, settings and event logging

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Malformed configuration data: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("No configurations defined")]
    NoConfigurations,

    #[error("Configuration {index} ({name}) has no reward positions")]
    EmptyRewardPositions { index: usize, name: String },

    #[error("Configuration {index} has {count} rewards, at most {max} can be labelled")]
    TooManyRewards { index: usize, count: usize, max: usize },

    #[error("Configuration {index} has a non-finite position for reward {reward}")]
    NonFinitePosition { index: usize, reward: usize },

    #[error("Invalid repetitions per configuration: {0} (must be >= 1)")]
    InvalidRepetitions(i64),

    #[error("Configuration index out of range: {index} not in [0, {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
