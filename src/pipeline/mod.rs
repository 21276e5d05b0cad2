//! The request → plan → generate → validate → scan → deploy state machine.

pub mod controller;
pub mod generation;
pub mod retry;
pub mod stage;
pub mod state;

pub use controller::{
    Collaborators, CompletedRun, PipelineController, PipelineError, PipelineRequest,
    TerminalOutcome,
};
pub use retry::RetryPolicy;
pub use stage::{Stage, StageResult};
