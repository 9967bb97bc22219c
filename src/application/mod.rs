//! Application layer
//!
//! - `supervisor`: per-service process supervision and restart policy
//! - `orchestrator`: lifecycle of a running `lokl start`

pub mod orchestrator;
pub mod supervisor;

pub use orchestrator::{error_kind, Orchestrator, OrchestratorOptions};
pub use supervisor::{
    LogLine, LogStream, ReconcileReport, Supervisor, SupervisorError, SupervisorEvent,
    SupervisorSettings,
};
