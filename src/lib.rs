//! # ABCD Task Engine
//!
//! Trial orchestration and spatial verification for the ABCD spatial-memory
//! task: a participant uncovers a sequence of hidden rewards (A, B, C, D, ...)
//! from memory, over repeated trials and several reward layouts, after an
//! optional instruction phase gated by a streak of correct single probes.
//!
//! ## Features
//! - Configuration loading with strict validation
//! - Acceptance boxes sized from the inferred grid pitch of each layout
//! - One sequence gate for strict-order trials and single instruction probes
//! - Tick-driven choreography (memorization playback, probes, feedback)
//! - Repetition/configuration lifecycle with cancellable scheduled transitions
//! - Structured event log (JSON lines) with pluggable sinks
//! - Headless simulated participant
//!
//! ## Architecture
//!
//! ```text
//!                         ExperimentSession
//!                                │
//!     tick ──► TrialLifecycle ───┼──► PhaseChoreographer ──► Cues
//!                  ▲             │            │
//!   commit ──► SequenceGate ─────┤            ▼
//!                  │             │       StreakGate
//!        GridToleranceResolver   │
//!                                ▼
//!                           TaskContext
//!              (RewardDisplay, PhaseListener, EventSink)
//! ```

// Core modules
pub mod error;
pub mod geometry;
pub mod configuration;
pub mod grid;
pub mod settings;

// Trial state machines
pub mod lifecycle;
pub mod sequence;
pub mod streak;
pub mod choreography;

// Boundary and orchestration
pub mod context;
pub mod event_log;
pub mod session;
pub mod simulation;

// Integration tests
#[cfg(test)]
mod tests;

// Re-exports from core modules
pub use error::TaskError;
pub use geometry::{reward_letter, sequence_label, Heading, Position3D, MAX_REWARDS};
pub use configuration::{Configuration, ConfigurationSet, SequenceDirection};
pub use grid::{AcceptanceBox, GridExtents, GridToleranceResolver};
pub use settings::{InstructionSettings, MemorizationSettings, TaskSettings, ToleranceSettings};

// Re-exports from state machines
pub use lifecycle::{LifecycleEvent, LifecycleState, TrialLifecycle, TrialState};
pub use sequence::{
    CommitVerdict,
    EvaluationResult,
    GateMode,
    GateState,
    RejectReason,
    SequenceGate,
};
pub use streak::StreakGate;
pub use choreography::{Cue, Phase, PhaseChoreographer};

// Re-exports from boundary modules
pub use context::{
    FlowSignal,
    HeadlessDisplay,
    PhaseListener,
    RewardDisplay,
    SignalRecorder,
    SilentListener,
    TaskContext,
    Vantage,
    VisibilityBoard,
};
pub use event_log::{
    EventRecord,
    EventSink,
    JsonlEventLog,
    MemoryEventLog,
    NullEventLog,
    ParticipantInfo,
    TaskEvent,
};
pub use session::{ExperimentSession, FlowStage, SessionStats};
pub use simulation::{run_simulation, SimulatedParticipant, SimulationReport};

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        // Layout
        Position3D,
        Configuration,
        ConfigurationSet,
        SequenceDirection,
        GridToleranceResolver,
        TaskSettings,

        // Engine
        ExperimentSession,
        FlowStage,
        SequenceGate,
        GateMode,
        EvaluationResult,
        TrialLifecycle,
        StreakGate,
        PhaseChoreographer,

        // Boundary
        TaskContext,
        RewardDisplay,
        PhaseListener,
        EventSink,
        ParticipantInfo,

        // Result type
        TaskResult,
        TaskError,
    };
}
