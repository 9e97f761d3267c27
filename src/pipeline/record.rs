//! Lead records and per-lead orchestration state
//!
//! A [`LeadRecord`] is the single durable container for everything known
//! about a lead. Ports never touch it: they return results that the
//! orchestrator applies, and every write goes through the store's versioned
//! `save`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::gate::GateToken;
use super::stage::Stage;
use crate::ports::{CallSummary, EmailDraft, IdempotencyToken, Sentiment};
use crate::{Error, Result};

/// Unique lead identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub Uuid);

impl LeadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LeadId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(LeadId)
            .map_err(|e| Error::Validation(format!("invalid lead id '{}': {}", s, e)))
    }
}

/// Contact and firmographic data for a prospective customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadProfile {
    pub company_name: String,
    pub company_description: String,
    pub industry: String,
    #[serde(default)]
    pub location: Option<String>,
    pub contact_email: String,
}

/// Durable per-lead state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Unique lead ID
    pub id: LeadId,
    /// Contact and firmographic data
    pub profile: LeadProfile,
    /// Intent score, unset until scoring completes
    pub intent_score: Option<f64>,
    /// Current pipeline stage
    pub stage: Stage,
    /// Generated outreach draft
    pub draft: Option<EmailDraft>,
    /// When the outreach email was sent
    pub sent_at: Option<DateTime<Utc>>,
    /// Receipt returned by the mail transport
    pub send_receipt: Option<String>,
    /// Latest recorded reply text
    pub reply: Option<String>,
    /// Sentiment classified from the reply
    pub reply_sentiment: Option<Sentiment>,
    /// Proposed or booked meeting slot
    pub meeting_slot: Option<DateTime<Utc>>,
    /// Receipt returned by the calendar service
    pub booking_receipt: Option<String>,
    /// Reference to a call transcript, set when one becomes available
    pub transcript_ref: Option<String>,
    /// Analytics summary of the call
    pub analytics: Option<CallSummary>,
    /// Failed attempts recorded per stage
    #[serde(default)]
    pub attempts: HashMap<Stage, u32>,
    /// Earliest time the next retry may run (backoff cursor)
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Most recent error recorded for this lead
    pub last_error: Option<String>,
    /// Stage the lead failed out of, kept for manual reset
    pub failed_from: Option<Stage>,
    /// Approval flags per gated stage; immutable once true
    #[serde(default)]
    pub approvals: HashMap<Stage, bool>,
    /// Optimistic-concurrency version counter, bumped by every `save`
    pub version: u64,
    /// When the lead was discovered
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    /// Create a freshly discovered lead
    pub fn new(profile: LeadProfile) -> Self {
        let now = Utc::now();
        Self {
            id: LeadId::new(),
            profile,
            intent_score: None,
            stage: Stage::Discovered,
            draft: None,
            sent_at: None,
            send_receipt: None,
            reply: None,
            reply_sentiment: None,
            meeting_slot: None,
            booking_receipt: None,
            transcript_ref: None,
            analytics: None,
            attempts: HashMap::new(),
            next_attempt_at: None,
            last_error: None,
            failed_from: None,
            approvals: HashMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Failed attempts recorded for a stage
    pub fn attempts_at(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Token for the next side-effecting call at `stage`.
    ///
    /// The attempt counter only moves when a failure is recorded, so a
    /// transition re-driven after a save conflict reuses the same token and
    /// the port deduplicates the call.
    pub fn idempotency_token(&self, stage: Stage) -> IdempotencyToken {
        IdempotencyToken {
            lead: self.id.to_string(),
            stage: stage.to_string(),
            attempt: self.attempts_at(stage),
        }
    }

    /// Record a failed attempt at `stage`; returns the new attempt count
    pub fn record_failure(&mut self, stage: Stage, error: &str) -> u32 {
        let count = self.attempts.entry(stage).or_insert(0);
        *count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
        *count
    }

    /// Move to `next`, validating against the transition table
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        self.stage.check_advance_to(next)?;
        self.stage = next;
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a granted approval for a gated stage.
    ///
    /// A flag that is already true stays true; re-approval is a no-op and
    /// revocation does not exist.
    pub fn record_approval(&mut self, stage: Stage) -> Result<()> {
        if !stage.requires_approval() {
            return Err(Error::Validation(format!(
                "stage {stage} is not approval-gated"
            )));
        }
        self.approvals.insert(stage, true);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether an approval has been recorded for `stage`
    pub fn approved(&self, stage: Stage) -> bool {
        self.approvals.get(&stage).copied().unwrap_or(false)
    }

    /// Whether the backoff cursor permits an attempt at `now`
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// One-line status summary
    pub fn summary(&self) -> String {
        let score = self
            .intent_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} [{}] {} score={} attempts={} err={}",
            self.id,
            self.stage,
            self.profile.company_name,
            score,
            self.attempts_at(self.stage),
            self.last_error.as_deref().unwrap_or("-"),
        )
    }
}

/// What a suspended lead is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PendingAction {
    /// Blocked on a gate resolution
    Approval { token: GateToken },
    /// Suspended until the inbox poll surfaces a reply
    Reply { since: DateTime<Utc> },
}

/// A single orchestration session for one lead.
///
/// Holds the transient coordination state that is not part of the durable
/// record: what the lead is currently waiting on, and where reply polling
/// should resume. One per lead, owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub lead_id: LeadId,
    pub stage: Stage,
    pub pending: Option<PendingAction>,
    pub resume_cursor: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(lead_id: LeadId, stage: Stage) -> Self {
        Self {
            lead_id,
            stage,
            pending: None,
            resume_cursor: None,
        }
    }

    /// Gate token this run is blocked on, if any
    pub fn pending_gate(&self) -> Option<GateToken> {
        match &self.pending {
            Some(PendingAction::Approval { token }) => Some(*token),
            _ => None,
        }
    }
}
