//! # Event Log
//!
//! Structured, append-only records of what happened during a session:
//! trial starts, key presses, movements, uncovered rewards and misses.
//!
//! Sinks are chosen when the session is built. [`NullEventLog`] stands in
//! when no log is wanted; [`JsonlEventLog`] writes one JSON object per line;
//! [`MemoryEventLog`] keeps records in memory for inspection.
//!
//! ## Record Layout
//!
//! ```text
//! {"participant":"P01","study_id":"S","session_id":"X","session":"001",
//!  "date":"2026-10-18","round":0,"rep":1,"event_type":"reward",
//!  "reward_loc":{"x":0.0,"y":0.5,"z":0.0}, ... }
//! ```

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::TaskError;
use crate::geometry::{Heading, Position3D};
use crate::TaskResult;

/// Session number written into every record
pub const SESSION_NUMBER: &str = "001";

/// Who is being tested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub participant: String,
    pub study_id: String,
    pub session_id: String,
}

impl ParticipantInfo {
    pub fn new(
        participant: impl Into<String>,
        study_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            participant: participant.into(),
            study_id: study_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Parse `"PID|STUDY|SESSION"`. Missing or blank parts get `UNKNOWN_*`.
    pub fn from_delimited(info: &str) -> Self {
        let mut parts = info.split('|').map(str::trim);
        let mut next_or = |fallback: &str| {
            parts
                .next()
                .filter(|p| !p.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        let participant = next_or("UNKNOWN_PARTICIPANT");
        let study_id = next_or("UNKNOWN_STUDY");
        let session_id = next_or("UNKNOWN_SESSION");
        Self {
            participant,
            study_id,
            session_id,
        }
    }

    pub fn unknown() -> Self {
        Self::new("UNKNOWN_PARTICIPANT", "UNKNOWN_STUDY", "UNKNOWN_SESSION")
    }

    /// Identity for headless and test runs
    pub fn test() -> Self {
        Self::new("TEST_PARTICIPANT", "TEST_STUDY", "TEST_SESSION")
    }
}

impl Default for ParticipantInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Event-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    TrialStart {
        /// Experiment clock at trial start
        start_time: f64,
        trial_type: String,
        sequence: String,
        start_loc: Position3D,
    },
    KeyPress {
        t_global: f64,
        t_curr_run: f64,
        key_pressed: String,
        key_index: usize,
        position: Position3D,
    },
    Movement {
        from: Position3D,
        to: Position3D,
        t_curr_run: f64,
        direction: Heading,
        target: Option<Position3D>,
        trial_type: String,
        state: String,
        found_reward: bool,
        movement_index: usize,
    },
    Reward {
        reward_loc: Position3D,
        t_reward_start: f64,
        t_global: f64,
        reward_letter: String,
        reward_index: usize,
        state: String,
        moves_to_find: usize,
    },
    Miss {
        position: Position3D,
        target_index: usize,
        distance: f64,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::TrialStart { .. } => "trial_start",
            TaskEvent::KeyPress { .. } => "key_press",
            TaskEvent::Movement { .. } => "movement",
            TaskEvent::Reward { .. } => "reward",
            TaskEvent::Miss { .. } => "miss",
        }
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub participant: String,
    pub study_id: String,
    pub session_id: String,
    pub session: String,
    /// UTC date, `YYYY-MM-DD`
    pub date: String,
    /// Configuration index
    pub round: usize,
    /// Repetitions completed in this configuration
    pub rep: usize,
    #[serde(flatten)]
    pub event: TaskEvent,
}

impl EventRecord {
    pub fn new(participant: &ParticipantInfo, round: usize, rep: usize, event: TaskEvent) -> Self {
        Self {
            participant: participant.participant.clone(),
            study_id: participant.study_id.clone(),
            session_id: participant.session_id.clone(),
            session: SESSION_NUMBER.to_string(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            round,
            rep,
            event,
        }
    }
}

/// Wall-clock unix time in seconds
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Receiver of event records
pub trait EventSink: std::fmt::Debug {
    fn record(&mut self, record: &EventRecord) -> TaskResult<()>;

    fn flush(&mut self) -> TaskResult<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Sink used when no event log is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventLog;

impl EventSink for NullEventLog {
    fn record(&mut self, _record: &EventRecord) -> TaskResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventLog {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.event.kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryEventLog {
    fn record(&mut self, record: &EventRecord) -> TaskResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// JSON-lines file sink
#[derive(Debug)]
pub struct JsonlEventLog {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl JsonlEventLog {
    /// Create (or truncate) the log file, creating parent directories
    pub fn create(path: impl AsRef<Path>) -> TaskResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| TaskError::Io(format!("Failed to create log dir: {}", e)))?;
        }
        let file = File::create(path)
            .map_err(|e| TaskError::Io(format!("Failed to create event log {:?}: {}", path, e)))?;

        log::info!("Event log: {:?}", path);
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Read a log back, one record per non-empty line
    pub fn read_all(path: impl AsRef<Path>) -> TaskResult<Vec<EventRecord>> {
        let raw = fs::read_to_string(path.as_ref())
            .map_err(|e| TaskError::Io(format!("Failed to read event log: {}", e)))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(TaskError::from))
            .collect()
    }
}

impl EventSink for JsonlEventLog {
    fn record(&mut self, record: &EventRecord) -> TaskResult<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| TaskError::EventLog(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> TaskResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
