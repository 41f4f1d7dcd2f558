//! # Task Context
//!
//! The collaborators the engine talks to, bundled into one owned value that
//! is handed to components by reference:
//!
//! - [`RewardDisplay`]: reveal/hide commands for reward markers and the
//!   camera vantage. Fire-and-forget.
//! - [`PhaseListener`]: flow-control callbacks (repetition/configuration
//!   advance, experiment end, instruction streak reached).
//! - [`EventSink`]: the structured event log.
//!
//! Log delivery is best-effort. A failing sink is reported through `log`
//! and never reaches trial state.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::event_log::{EventRecord, EventSink, NullEventLog, ParticipantInfo, TaskEvent};

/// Where the participant views the arena from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vantage {
    /// Top-down view of the whole grid, movement disabled
    Overview,
    /// First-person view, movement enabled
    Participant,
}

/// Render side of reward visibility
pub trait RewardDisplay: std::fmt::Debug {
    fn show_reward(&mut self, index: usize);

    fn hide_reward(&mut self, index: usize);

    fn hide_all(&mut self);

    fn set_vantage(&mut self, _vantage: Vantage) {}
}

/// Display that ignores every command
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDisplay;

impl RewardDisplay for HeadlessDisplay {
    fn show_reward(&mut self, _index: usize) {}
    fn hide_reward(&mut self, _index: usize) {}
    fn hide_all(&mut self) {}
}

/// A single display command, as recorded by [`VisibilityBoard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    Show(usize),
    Hide(usize),
    HideAll,
    Vantage(Vantage),
}

#[derive(Debug)]
struct BoardState {
    visible: BTreeSet<usize>,
    vantage: Vantage,
    history: Vec<DisplayCommand>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            visible: BTreeSet::new(),
            vantage: Vantage::Overview,
            history: Vec::new(),
        }
    }
}

/// Display that tracks which rewards are visible. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct VisibilityBoard {
    inner: Arc<Mutex<BoardState>>,
}

impl VisibilityBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn visible(&self) -> Vec<usize> {
        self.with_state(|s| s.visible.iter().copied().collect())
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.with_state(|s| s.visible.contains(&index))
    }

    pub fn vantage(&self) -> Vantage {
        self.with_state(|s| s.vantage)
    }

    pub fn history(&self) -> Vec<DisplayCommand> {
        self.with_state(|s| s.history.clone())
    }

    /// Indices shown, in order
    pub fn shown(&self) -> Vec<usize> {
        self.with_state(|s| {
            s.history
                .iter()
                .filter_map(|c| match c {
                    DisplayCommand::Show(i) => Some(*i),
                    _ => None,
                })
                .collect()
        })
    }
}

impl RewardDisplay for VisibilityBoard {
    fn show_reward(&mut self, index: usize) {
        self.with_state(|s| {
            s.visible.insert(index);
            s.history.push(DisplayCommand::Show(index));
        });
    }

    fn hide_reward(&mut self, index: usize) {
        self.with_state(|s| {
            s.visible.remove(&index);
            s.history.push(DisplayCommand::Hide(index));
        });
    }

    fn hide_all(&mut self) {
        self.with_state(|s| {
            s.visible.clear();
            s.history.push(DisplayCommand::HideAll);
        });
    }

    fn set_vantage(&mut self, vantage: Vantage) {
        self.with_state(|s| {
            s.vantage = vantage;
            s.history.push(DisplayCommand::Vantage(vantage));
        });
    }
}

/// Flow-control signals raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSignal {
    /// A new repetition of the same configuration started
    RepetitionAdvance { config_index: usize, repetition: usize },
    /// The next configuration was loaded
    ConfigurationAdvance { config_index: usize },
    ExperimentComplete,
    InstructionStreakSatisfied { streak: u32 },
    StageChanged { stage: String },
}

/// Scene/flow control side of the engine
pub trait PhaseListener: std::fmt::Debug {
    fn on_repetition_advance(&mut self, _config_index: usize, _repetition: usize) {}

    fn on_configuration_advance(&mut self, _config_index: usize) {}

    fn on_experiment_complete(&mut self) {}

    fn on_instruction_streak_satisfied(&mut self, _streak: u32) {}

    fn on_stage_changed(&mut self, _stage: &str) {}
}

/// Listener that ignores every signal
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentListener;

impl PhaseListener for SilentListener {}

/// Listener that keeps every signal. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct SignalRecorder {
    signals: Arc<Mutex<Vec<FlowSignal>>>,
}

impl SignalRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<FlowSignal> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, signal: FlowSignal) {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(signal);
    }
}

impl PhaseListener for SignalRecorder {
    fn on_repetition_advance(&mut self, config_index: usize, repetition: usize) {
        self.push(FlowSignal::RepetitionAdvance {
            config_index,
            repetition,
        });
    }

    fn on_configuration_advance(&mut self, config_index: usize) {
        self.push(FlowSignal::ConfigurationAdvance { config_index });
    }

    fn on_experiment_complete(&mut self) {
        self.push(FlowSignal::ExperimentComplete);
    }

    fn on_instruction_streak_satisfied(&mut self, streak: u32) {
        self.push(FlowSignal::InstructionStreakSatisfied { streak });
    }

    fn on_stage_changed(&mut self, stage: &str) {
        self.push(FlowSignal::StageChanged {
            stage: stage.to_string(),
        });
    }
}

/// Owned bundle of collaborators, passed by reference to the components
#[derive(Debug)]
pub struct TaskContext {
    pub participant: ParticipantInfo,
    display: Box<dyn RewardDisplay>,
    events: Box<dyn EventSink>,
    listener: Box<dyn PhaseListener>,
    log_failures: usize,
}

impl TaskContext {
    /// Context with headless display, no event log and a silent listener
    pub fn new(participant: ParticipantInfo) -> Self {
        Self {
            participant,
            display: Box::new(HeadlessDisplay),
            events: Box::new(NullEventLog),
            listener: Box::new(SilentListener),
            log_failures: 0,
        }
    }

    pub fn with_display(mut self, display: impl RewardDisplay + 'static) -> Self {
        self.display = Box::new(display);
        self
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    pub fn with_listener(mut self, listener: impl PhaseListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn display(&mut self) -> &mut dyn RewardDisplay {
        self.display.as_mut()
    }

    pub fn listener(&mut self) -> &mut dyn PhaseListener {
        self.listener.as_mut()
    }

    /// Append an event. Sink failures are counted and reported, never returned.
    pub fn log(&mut self, round: usize, rep: usize, event: TaskEvent) {
        let record = EventRecord::new(&self.participant, round, rep, event);
        if let Err(e) = self.events.record(&record) {
            self.log_failures += 1;
            log::warn!(
                "Event log '{}' dropped a {} record: {}",
                self.events.name(),
                record.event.kind(),
                e
            );
        }
    }

    pub fn flush_log(&mut self) {
        if let Err(e) = self.events.flush() {
            self.log_failures += 1;
            log::warn!("Event log '{}' failed to flush: {}", self.events.name(), e);
        }
    }

    /// Number of records or flushes the sink refused
    pub fn log_failures(&self) -> usize {
        self.log_failures
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(ParticipantInfo::default())
    }
}
