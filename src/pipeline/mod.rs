//! Lead pipeline orchestration
//!
//! Drives prospective customers through the acquisition pipeline:
//!
//! - **Stages**: a closed enum with a fixed transition table
//! - **Records**: versioned per-lead state, one YAML file each
//! - **Gates**: human-approval checkpoints before side effects
//! - **Notifications**: approval alerts via Slack, Telegram, or the log
//! - **Orchestrator**: atomic read → validate → port call → save steps
//! - **Scheduler**: the cooperative tick loop that re-evaluates leads
//!
//! ## Pipeline
//!
//! ```text
//! discovered → scored → shortlisted → drafted → awaiting_send_approval
//!   → sent → awaiting_reply → reply_received → awaiting_schedule_approval
//!   → scheduled → analyzed
//! ```
//!
//! `failed` and `abandoned` terminate a lead early; analytics runs as a
//! parallel branch for any lead holding a call transcript.
//!
//! ## Driving the pipeline
//!
//! ```bash
//! # Ingest a lead dataset and run the loop with simulated services
//! leadflow discover clients.json
//! leadflow run --demo
//!
//! # Approve the pending send from another terminal
//! leadflow approvals
//! leadflow resolve <token> --approve
//! ```

pub mod gate;
pub mod notify;
pub mod orchestrator;
pub mod record;
pub mod scheduler;
pub mod stage;
pub mod store;

pub use gate::{ApprovalGate, GateEntry, GateStatus, GateToken};
pub use notify::{
    create_notifiers, ApprovalNotifier, LogNotifier, SlackNotifier, TelegramNotifier,
};
pub use orchestrator::{Orchestrator, StepOutcome};
pub use record::{LeadId, LeadProfile, LeadRecord, PendingAction, WorkflowRun};
pub use scheduler::{Scheduler, TickReport};
pub use stage::Stage;
pub use store::LeadStore;
