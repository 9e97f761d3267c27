//! Leadflow: Stateful Customer-Acquisition Pipeline Orchestration
//!
//! A tight Rust binary that drives prospective customers through a
//! multi-stage acquisition pipeline:
//! - **Scoring**: intent scoring of discovered leads
//! - **Outreach**: gated email drafting, sending, and reply detection
//! - **Scheduling**: gated meeting booking from extracted availability
//! - **Analytics**: post-call transcript analysis
//!
//! # Core Philosophy
//!
//! Every side effect is committed exactly once. No silent overwrites.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Scheduler (tick loop)          │
//! │  re-evaluates every active lead         │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │       Orchestrator (state machine)      │
//! │  read → validate → port call → save     │
//! └──────┬──────────────┬───────────────────┘
//!        ▼              ▼
//! ┌─────────────┐ ┌─────────────────────────┐
//! │ Lead Store  │ │  Approval Gate + Ports  │
//! │ (versioned) │ │  scoring / outreach /   │
//! │             │ │  scheduling / analytics │
//! └─────────────┘ └─────────────────────────┘
//! ```

pub mod config;
pub mod pipeline;
pub mod ports;

// Re-exports for convenience
pub use config::Config;
pub use pipeline::{
    ApprovalGate, GateStatus, LeadId, LeadProfile, LeadRecord, LeadStore, Orchestrator, Scheduler,
    Stage, StepOutcome, WorkflowRun,
};
pub use ports::{
    AnalyticsPort, CallSummary, EmailDraft, IdempotencyToken, OutreachPort, SchedulingPort,
    ScoringPort, Sentiment,
};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Port call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Version conflict on lead {0}")]
    Conflict(String),

    #[error("Lead not found: {0}")]
    NotFound(String),

    #[error("Approval rejected: {0}")]
    ApprovalRejected(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether another attempt at the same transition may succeed.
    /// Validation failures are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Service(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
