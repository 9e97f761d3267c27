//! Port contracts for external collaborators
//!
//! The pipeline talks to four external services through these traits:
//! - Scoring: intent scoring of a lead profile
//! - Outreach: email drafting, sending, and inbox polling
//! - Scheduling: availability parsing and calendar booking
//! - Analytics: call transcript analysis
//!
//! All ports are fallible and latency-bearing. Side-effecting calls carry an
//! idempotency token and must apply at most once per token; implementations
//! are expected to deduplicate on it.

mod sim;

pub use sim::{SimAnalytics, SimOutreach, SimScheduling, SimScoring};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::{LeadId, LeadProfile};
use crate::Result;

/// Key ensuring a side-effecting call applies at most once per logical attempt.
///
/// Derived from (lead, stage, attempt counter); the counter only moves when a
/// failure is recorded, so re-driving an uncommitted transition reuses the
/// same token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken {
    pub lead: String,
    pub stage: String,
    pub attempt: u32,
}

impl std::fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.lead, self.stage, self.attempt)
    }
}

/// A generated outreach email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// Receipt returned by the mail transport after a committed send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

/// A reply surfaced by the inbox poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundReply {
    pub contact_email: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// A candidate meeting time parsed from a reply
pub type SlotCandidate = DateTime<Utc>;

/// Receipt returned by the calendar service after a committed booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub event_id: String,
    pub slot: DateTime<Utc>,
}

/// Overall tone of a reply or call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// A recorded discovery-call transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTranscript {
    pub company_name: String,
    pub industry: String,
    pub text: String,
}

/// Structured analysis of a discovery call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    /// Concise summary of the call
    pub summary: String,
    /// Main topics discussed
    pub top_themes: Vec<String>,
    /// Explicit customer pain points
    pub pain_points: Vec<String>,
    /// Actionable follow-ups
    pub next_best_actions: Vec<String>,
    /// Overall tone
    pub sentiment: Sentiment,
    /// Up to a few short quotes from the call
    pub notable_quotes: Vec<String>,
}

/// Intent-scoring service
#[async_trait]
pub trait ScoringPort: Send + Sync {
    /// Score how likely this lead is to need the product, in 0.0..=1.0
    async fn score(&self, profile: &LeadProfile) -> Result<f64>;
}

/// Email drafting, sending, and inbox polling
#[async_trait]
pub trait OutreachPort: Send + Sync {
    /// Generate an outreach draft. Idempotent: the same token returns the
    /// same draft if one was already generated.
    async fn draft(&self, profile: &LeadProfile, token: &IdempotencyToken) -> Result<EmailDraft>;

    /// Send an email. At most one external send per token.
    async fn send(
        &self,
        lead: LeadId,
        to: &str,
        draft: &EmailDraft,
        token: &IdempotencyToken,
    ) -> Result<SendReceipt>;

    /// Replies received since `since`, oldest first. Restartable from any
    /// cursor position.
    async fn poll_replies(&self, since: DateTime<Utc>) -> Result<Vec<InboundReply>>;
}

/// Availability parsing and calendar booking
#[async_trait]
pub trait SchedulingPort: Send + Sync {
    /// Classify the tone of a reply
    async fn classify_sentiment(&self, reply: &str) -> Result<Sentiment>;

    /// Candidate meeting times mentioned in a reply, soonest first
    async fn extract_slots(&self, reply: &str) -> Result<Vec<SlotCandidate>>;

    /// Book a meeting. At most one external booking per token.
    async fn book(
        &self,
        lead: LeadId,
        slot: DateTime<Utc>,
        token: &IdempotencyToken,
    ) -> Result<BookingReceipt>;
}

/// Call transcript analysis
#[async_trait]
pub trait AnalyticsPort: Send + Sync {
    async fn analyze(&self, transcript: &CallTranscript) -> Result<CallSummary>;
}

/// The four ports bundled for the orchestrator
#[derive(Clone)]
pub struct Ports {
    pub scoring: Arc<dyn ScoringPort>,
    pub outreach: Arc<dyn OutreachPort>,
    pub scheduling: Arc<dyn SchedulingPort>,
    pub analytics: Arc<dyn AnalyticsPort>,
}

impl Ports {
    /// Fully simulated ports for tests and demo runs
    pub fn simulated() -> Self {
        Self {
            scoring: Arc::new(SimScoring::default()),
            outreach: Arc::new(SimOutreach::default()),
            scheduling: Arc::new(SimScheduling::default()),
            analytics: Arc::new(SimAnalytics::default()),
        }
    }
}
