//! Workflow orchestrator
//!
//! Drives each lead through the pipeline, one atomic transition at a time:
//! - Read the record fresh (with its version)
//! - Validate preconditions for the eligible transition
//! - Perform at most one side-effecting port call, under a timeout
//! - Commit through the store's versioned `save`
//!
//! A save conflict aborts the transition without re-applying the side
//! effect: the attempt counter (and so the idempotency token) is unchanged,
//! so a re-driven port call deduplicates at the port.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::gate::{ApprovalGate, GateStatus};
use super::record::{LeadId, LeadProfile, LeadRecord, PendingAction, WorkflowRun};
use super::stage::Stage;
use super::store::LeadStore;
use crate::config::Config;
use crate::ports::{CallTranscript, EmailDraft, Ports};
use crate::{Error, Result};

/// What a single `step` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Committed a transition into the given stage
    Advanced(Stage),
    /// Suspended on an approval or an external signal
    Waiting,
    /// Transient failure recorded; retry after the backoff delay
    Backoff,
    /// Lost an optimistic-concurrency race; re-evaluate from a fresh read
    Conflict,
    /// Nothing to do right now
    Idle,
}

/// The pipeline state machine
pub struct Orchestrator {
    store: Arc<LeadStore>,
    gate: Arc<ApprovalGate>,
    ports: Ports,
    config: Config,
    runs: Mutex<HashMap<LeadId, WorkflowRun>>,
    reply_cursor: Mutex<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(store: Arc<LeadStore>, gate: Arc<ApprovalGate>, ports: Ports, config: Config) -> Self {
        let cursor = Self::load_cursor(&config).unwrap_or_else(Utc::now);
        Self {
            store,
            gate,
            ports,
            config,
            runs: Mutex::new(HashMap::new()),
            reply_cursor: Mutex::new(cursor),
        }
    }

    /// Register a newly discovered lead
    pub fn discover(&self, profile: LeadProfile) -> Result<LeadId> {
        let record = LeadRecord::new(profile);
        let id = self.store.insert(record)?;
        self.runs
            .lock()
            .unwrap()
            .insert(id, WorkflowRun::new(id, Stage::Discovered));
        info!("Discovered lead {}", id);
        Ok(id)
    }

    /// The orchestration session for a lead, if one is active
    pub fn run_for(&self, lead_id: LeadId) -> Option<WorkflowRun> {
        self.runs.lock().unwrap().get(&lead_id).cloned()
    }

    /// Current record for a lead (the reporting surface)
    pub fn status(&self, lead_id: LeadId) -> Result<LeadRecord> {
        self.store.get(lead_id)
    }

    /// Attempt one transition for a lead.
    ///
    /// Safe to call at any time: terminal stages, batch-only stages, and
    /// leads inside their backoff window all report `Idle`.
    pub async fn step(&self, lead_id: LeadId) -> Result<StepOutcome> {
        let record = self.store.get(lead_id)?;

        if record.stage.is_terminal() {
            return Ok(StepOutcome::Idle);
        }
        if !record.retry_due(Utc::now()) {
            return Ok(StepOutcome::Idle);
        }

        let outcome = match record.stage {
            Stage::Discovered => self.transition_score(record).await,
            // Leaves only through the batch shortlist
            Stage::Scored => Ok(StepOutcome::Idle),
            Stage::Shortlisted => self.transition_draft(record).await,
            Stage::Drafted => self.commit(record, Stage::AwaitingSendApproval),
            Stage::AwaitingSendApproval => self.transition_send(record).await,
            Stage::Sent => self.transition_await_reply(record),
            // Leaves when the inbox poll surfaces a reply, or by abandonment
            Stage::AwaitingReply => Ok(StepOutcome::Waiting),
            Stage::ReplyReceived => self.transition_schedule(record).await,
            Stage::AwaitingScheduleApproval => self.transition_book(record).await,
            // Terminal stages already returned above
            _ => Ok(StepOutcome::Idle),
        }?;

        debug!("step {} -> {:?}", lead_id, outcome);
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Individual transitions
    // ------------------------------------------------------------------

    /// DISCOVERED -> SCORED
    async fn transition_score(&self, mut record: LeadRecord) -> Result<StepOutcome> {
        match self
            .timed(self.ports.scoring.score(&record.profile))
            .await
        {
            Ok(score) if (0.0..=1.0).contains(&score) => {
                record.intent_score = Some(score);
                self.commit(record, Stage::Scored)
            }
            Ok(score) => self.apply_failure(
                record,
                Stage::Discovered,
                Error::Validation(format!("intent score {} outside 0..=1", score)),
            ),
            Err(e) => self.apply_failure(record, Stage::Discovered, e),
        }
    }

    /// SCORED -> SHORTLISTED, computed as a batch over a snapshot.
    ///
    /// Ranks every currently scored lead, promotes the top K at or above
    /// the configured minimum score, and leaves the rest in place. A lead
    /// whose save conflicts (it moved concurrently) is skipped this round.
    pub fn shortlist(&self) -> Result<Vec<LeadId>> {
        let snapshot = self.store.list_by_stage(Stage::Scored);
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<LeadRecord> = snapshot
            .into_iter()
            .filter(|r| {
                r.intent_score
                    .map(|s| s >= self.config.shortlist.min_score)
                    .unwrap_or(false)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.intent_score
                .partial_cmp(&a.intent_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut promoted = Vec::new();
        for mut record in ranked.into_iter().take(self.config.shortlist.top_k) {
            let id = record.id;
            record.advance(Stage::Shortlisted)?;
            match self.store.save(&record) {
                Ok(committed) => {
                    self.sync_run(&committed, None);
                    info!(
                        "Shortlisted {} ({}, score {:.2})",
                        id,
                        committed.profile.company_name,
                        committed.intent_score.unwrap_or_default()
                    );
                    promoted.push(id);
                }
                Err(Error::Conflict(_)) => {
                    warn!("Lead {} moved during shortlisting, skipping", id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(promoted)
    }

    /// SHORTLISTED -> DRAFTED
    async fn transition_draft(&self, mut record: LeadRecord) -> Result<StepOutcome> {
        if record.draft.is_none() {
            let token = record.idempotency_token(Stage::Shortlisted);
            match self
                .timed(self.ports.outreach.draft(&record.profile, &token))
                .await
            {
                Ok(draft) => record.draft = Some(draft),
                Err(e) => return self.apply_failure(record, Stage::Shortlisted, e),
            }
        }
        self.commit(record, Stage::Drafted)
    }

    /// AWAITING_SEND_APPROVAL -> SENT, gated
    async fn transition_send(&self, mut record: LeadRecord) -> Result<StepOutcome> {
        let stage = Stage::AwaitingSendApproval;
        let draft = match record.draft.clone() {
            Some(d) => d,
            None => {
                return self.apply_failure(
                    record,
                    stage,
                    Error::Validation("no draft to send".to_string()),
                )
            }
        };

        if !record.approved(stage) {
            let payload = format!(
                "Send outreach to {} <{}>\nSubject: {}",
                record.profile.company_name, record.profile.contact_email, draft.subject
            );
            let token = self.gate.request(record.id, stage, &payload).await?;

            match self.gate.status(token)? {
                GateStatus::Pending => {
                    self.sync_run(&record, Some(PendingAction::Approval { token }));
                    return Ok(StepOutcome::Waiting);
                }
                GateStatus::Rejected => {
                    record.last_error = Some("send approval rejected".to_string());
                    return self.commit(record, Stage::Abandoned);
                }
                GateStatus::Approved => {
                    record.record_approval(stage)?;
                }
            }
        }

        let token = record.idempotency_token(stage);
        match self
            .timed(self.ports.outreach.send(
                record.id,
                &record.profile.contact_email,
                &draft,
                &token,
            ))
            .await
        {
            Ok(receipt) => {
                record.sent_at = Some(receipt.sent_at);
                record.send_receipt = Some(receipt.message_id);
                self.commit(record, Stage::Sent)
            }
            Err(e) => self.apply_failure(record, stage, e),
        }
    }

    /// SENT -> AWAITING_REPLY, automatic
    fn transition_await_reply(&self, record: LeadRecord) -> Result<StepOutcome> {
        let since = record.sent_at.unwrap_or_else(Utc::now);
        let outcome = self.commit(record, Stage::AwaitingReply)?;
        if let StepOutcome::Advanced(stage) = outcome {
            debug!("suspended at {} since {}", stage, since);
        }
        Ok(outcome)
    }

    /// REPLY_RECEIVED -> AWAITING_SCHEDULE_APPROVAL (or ABANDONED on a
    /// declined reply, or a follow-up availability ask when no slot parses)
    async fn transition_schedule(&self, mut record: LeadRecord) -> Result<StepOutcome> {
        let stage = Stage::ReplyReceived;
        let reply = match record.reply.clone() {
            Some(r) => r,
            None => {
                return self.apply_failure(
                    record,
                    stage,
                    Error::Validation("no reply recorded".to_string()),
                )
            }
        };

        if record.reply_sentiment.is_none() {
            match self
                .timed(self.ports.scheduling.classify_sentiment(&reply))
                .await
            {
                Ok(sentiment) => record.reply_sentiment = Some(sentiment),
                Err(e) => return self.apply_failure(record, stage, e),
            }
        }

        if record.reply_sentiment == Some(crate::ports::Sentiment::Negative) {
            record.last_error = Some("prospect declined".to_string());
            return self.commit(record, Stage::Abandoned);
        }

        match self.timed(self.ports.scheduling.extract_slots(&reply)).await {
            Ok(slots) if !slots.is_empty() => {
                record.meeting_slot = Some(slots[0]);
                self.commit(record, Stage::AwaitingScheduleApproval)
            }
            Ok(_) => {
                // No parseable availability: ask once, then wait for a
                // newer reply to replace the current one
                let token = record.idempotency_token(stage);
                let follow_up = EmailDraft {
                    subject: "Scheduling your discovery call".to_string(),
                    body: "Thanks for getting back to us! Could you share your \
                           availability this week for a quick 30-minute call?"
                        .to_string(),
                };
                match self
                    .timed(self.ports.outreach.send(
                        record.id,
                        &record.profile.contact_email,
                        &follow_up,
                        &token,
                    ))
                    .await
                {
                    Ok(_) => {
                        let committed = self.save_in_place(record)?;
                        self.sync_run(&committed, None);
                        Ok(StepOutcome::Waiting)
                    }
                    Err(e) => self.apply_failure(record, stage, e),
                }
            }
            Err(e) => self.apply_failure(record, stage, e),
        }
    }

    /// AWAITING_SCHEDULE_APPROVAL -> SCHEDULED, gated
    async fn transition_book(&self, mut record: LeadRecord) -> Result<StepOutcome> {
        let stage = Stage::AwaitingScheduleApproval;
        let slot = match record.meeting_slot {
            Some(s) => s,
            None => {
                return self.apply_failure(
                    record,
                    stage,
                    Error::Validation("no meeting slot proposed".to_string()),
                )
            }
        };

        if !record.approved(stage) {
            let payload = format!(
                "Book discovery call with {} <{}> at {}",
                record.profile.company_name, record.profile.contact_email, slot
            );
            let token = self.gate.request(record.id, stage, &payload).await?;

            match self.gate.status(token)? {
                GateStatus::Pending => {
                    self.sync_run(&record, Some(PendingAction::Approval { token }));
                    return Ok(StepOutcome::Waiting);
                }
                GateStatus::Rejected => {
                    record.last_error = Some("booking approval rejected".to_string());
                    return self.commit(record, Stage::Abandoned);
                }
                GateStatus::Approved => {
                    record.record_approval(stage)?;
                }
            }
        }

        let token = record.idempotency_token(stage);
        match self
            .timed(self.ports.scheduling.book(record.id, slot, &token))
            .await
        {
            Ok(receipt) => {
                record.booking_receipt = Some(receipt.event_id);
                self.commit(record, Stage::Scheduled)
            }
            Err(e) => self.apply_failure(record, stage, e),
        }
    }

    // ------------------------------------------------------------------
    // Reply polling and abandonment
    // ------------------------------------------------------------------

    /// Poll the outreach port for replies and apply them to waiting leads.
    /// Returns how many leads advanced. The cursor only moves past a reply
    /// once it has been applied (or had no matching lead), so a conflicted
    /// application is retried on the next poll.
    pub async fn poll_replies(&self) -> Result<usize> {
        let since = *self.reply_cursor.lock().unwrap();
        let replies = self.timed(self.ports.outreach.poll_replies(since)).await?;
        if replies.is_empty() {
            return Ok(0);
        }

        let mut advanced = 0;
        let mut cursor = since;

        'replies: for reply in replies {
            // Waiting leads advance to REPLY_RECEIVED
            for mut record in self.store.list_by_stage(Stage::AwaitingReply) {
                if record.profile.contact_email == reply.contact_email {
                    record.reply = Some(reply.body.clone());
                    record.reply_sentiment = None;
                    match self.commit(record, Stage::ReplyReceived)? {
                        StepOutcome::Advanced(_) => advanced += 1,
                        StepOutcome::Conflict => break 'replies,
                        _ => {}
                    }
                    cursor = cursor.max(reply.received_at);
                    continue 'replies;
                }
            }

            // A newer reply replaces the one a follow-up is waiting on
            for mut record in self.store.list_by_stage(Stage::ReplyReceived) {
                if record.profile.contact_email == reply.contact_email
                    && record.reply.as_deref() != Some(reply.body.as_str())
                {
                    record.reply = Some(reply.body.clone());
                    record.reply_sentiment = None;
                    record.meeting_slot = None;
                    match self.save_in_place(record) {
                        Ok(_) => {}
                        Err(Error::Conflict(_)) => break 'replies,
                        Err(e) => return Err(e),
                    }
                    cursor = cursor.max(reply.received_at);
                    continue 'replies;
                }
            }

            // No matching lead; skip past it
            cursor = cursor.max(reply.received_at);
        }

        *self.reply_cursor.lock().unwrap() = cursor;
        self.persist_cursor(cursor)?;
        Ok(advanced)
    }

    /// Move leads stuck in AWAITING_REPLY past the configured window to
    /// ABANDONED. Returns the leads abandoned this sweep.
    pub fn sweep_reply_timeouts(&self) -> Result<Vec<LeadId>> {
        let deadline = chrono::Duration::from_std(self.config.scheduler.reply_abandon_after)
            .map_err(|e| Error::Config(format!("reply_abandon_after: {}", e)))?;
        let now = Utc::now();

        let mut abandoned = Vec::new();
        for mut record in self.store.list_by_stage(Stage::AwaitingReply) {
            let waiting_since = record.sent_at.unwrap_or(record.updated_at);
            if now - waiting_since > deadline {
                let id = record.id;
                record.last_error = Some(format!(
                    "no reply within {}",
                    humantime::format_duration(self.config.scheduler.reply_abandon_after)
                ));
                match self.commit(record, Stage::Abandoned)? {
                    StepOutcome::Advanced(_) => {
                        info!("Abandoned {} after reply timeout", id);
                        abandoned.push(id);
                    }
                    _ => {}
                }
            }
        }
        Ok(abandoned)
    }

    // ------------------------------------------------------------------
    // Manual operations
    // ------------------------------------------------------------------

    /// Force a lead to ABANDONED from any non-terminal stage,
    /// short-circuiting pending retries and polls.
    pub fn abandon(&self, lead_id: LeadId) -> Result<()> {
        for _ in 0..3 {
            let mut record = self.store.get(lead_id)?;
            if record.stage == Stage::Abandoned {
                return Ok(());
            }
            if record.stage.is_terminal() {
                return Err(Error::Validation(format!(
                    "lead {} is terminal ({})",
                    lead_id, record.stage
                )));
            }
            record.last_error = Some("abandoned by operator".to_string());
            record.advance(Stage::Abandoned)?;
            match self.store.save(&record) {
                Ok(committed) => {
                    self.sync_run(&committed, None);
                    info!("Abandoned lead {}", lead_id);
                    return Ok(());
                }
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(lead_id.to_string()))
    }

    /// Manually re-trigger a FAILED lead, returning it to the stage it
    /// failed out of with a cleared attempt counter. The one deliberate
    /// exception to the forward-only transition table.
    pub fn reset(&self, lead_id: LeadId) -> Result<Stage> {
        let mut record = self.store.get(lead_id)?;
        if record.stage != Stage::Failed {
            return Err(Error::Validation(format!(
                "lead {} is not failed ({})",
                lead_id, record.stage
            )));
        }
        let resume_at = record.failed_from.ok_or_else(|| {
            Error::Validation(format!("lead {} has no recorded failure stage", lead_id))
        })?;

        record.stage = resume_at;
        record.attempts.remove(&resume_at);
        record.next_attempt_at = None;
        record.failed_from = None;
        record.updated_at = Utc::now();

        let committed = self.store.save(&record)?;
        self.sync_run(&committed, None);
        info!("Reset lead {} back to {}", lead_id, resume_at);
        Ok(resume_at)
    }

    // ------------------------------------------------------------------
    // Analytics sub-workflow
    // ------------------------------------------------------------------

    /// Attach a transcript reference to a lead, making it eligible for
    /// analysis
    pub fn attach_transcript(&self, lead_id: LeadId, transcript_ref: &str) -> Result<()> {
        let mut record = self.store.get(lead_id)?;
        record.transcript_ref = Some(transcript_ref.to_string());
        record.updated_at = Utc::now();
        let committed = self.store.save(&record)?;
        self.sync_run(&committed, None);
        Ok(())
    }

    /// Whether the analytics branch still has work to do for a record
    pub fn analytics_eligible(&self, record: &LeadRecord) -> bool {
        record.transcript_ref.is_some()
            && record.analytics.is_none()
            && record.attempts_at(Stage::Analyzed) < self.config.retry.max_attempts
            && record.retry_due(Utc::now())
    }

    /// Run transcript analysis for one lead. Independent of the main chain:
    /// failures back off under their own counter and never move the lead to
    /// FAILED.
    pub async fn run_analytics(&self, lead_id: LeadId) -> Result<StepOutcome> {
        let mut record = self.store.get(lead_id)?;

        if record.analytics.is_some() {
            return Ok(StepOutcome::Idle);
        }
        let transcript_ref = match record.transcript_ref.clone() {
            Some(r) => r,
            None => {
                return Err(Error::Validation(format!(
                    "lead {} has no transcript",
                    lead_id
                )))
            }
        };

        let text = std::fs::read_to_string(&transcript_ref).map_err(|e| {
            Error::Validation(format!("transcript {} unreadable: {}", transcript_ref, e))
        })?;
        let transcript = CallTranscript {
            company_name: record.profile.company_name.clone(),
            industry: record.profile.industry.clone(),
            text,
        };

        match self.timed(self.ports.analytics.analyze(&transcript)).await {
            Ok(summary) => {
                record.analytics = Some(summary);
                if record.stage.can_advance_to(Stage::Analyzed) {
                    self.commit(record, Stage::Analyzed)
                } else {
                    // Terminal leads keep their stage; the summary is still
                    // recorded
                    let committed = self.save_in_place(record)?;
                    self.sync_run(&committed, None);
                    Ok(StepOutcome::Idle)
                }
            }
            Err(e) if e.is_transient() => {
                let failures = record.record_failure(Stage::Analyzed, &e.to_string());
                record.next_attempt_at =
                    Some(Utc::now() + backoff_delay(&self.config, failures)?);
                let committed = self.save_in_place(record)?;
                self.sync_run(&committed, None);
                if failures >= self.config.retry.max_attempts {
                    warn!("Analytics retries exhausted for {}", lead_id);
                }
                Ok(StepOutcome::Backoff)
            }
            Err(e) => {
                record.record_failure(Stage::Analyzed, &e.to_string());
                // Deterministic failure: pin the counter so the scheduler
                // stops retrying
                record
                    .attempts
                    .insert(Stage::Analyzed, self.config.retry.max_attempts);
                let committed = self.save_in_place(record)?;
                self.sync_run(&committed, None);
                Ok(StepOutcome::Backoff)
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Commit `record` into `next`. A conflict aborts without retrying.
    fn commit(&self, mut record: LeadRecord, next: Stage) -> Result<StepOutcome> {
        record.advance(next)?;
        match self.store.save(&record) {
            Ok(committed) => {
                let pending = match next {
                    Stage::AwaitingReply => Some(PendingAction::Reply {
                        since: committed.sent_at.unwrap_or(committed.updated_at),
                    }),
                    _ => None,
                };
                self.sync_run(&committed, pending);
                info!("Lead {} -> {}", committed.id, next);
                Ok(StepOutcome::Advanced(next))
            }
            Err(Error::Conflict(id)) => {
                warn!("Conflict committing {} -> {}, will re-evaluate", id, next);
                Ok(StepOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Save without a stage change, surfacing conflicts to the caller
    fn save_in_place(&self, record: LeadRecord) -> Result<LeadRecord> {
        self.store.save(&record)
    }

    /// Classify a port failure into a state mutation: backoff in place for
    /// transient errors with budget left, FAILED otherwise.
    fn apply_failure(
        &self,
        mut record: LeadRecord,
        stage: Stage,
        error: Error,
    ) -> Result<StepOutcome> {
        let failures = record.record_failure(stage, &error.to_string());

        let exhausted = failures >= self.config.retry.max_attempts;
        if error.is_transient() && !exhausted {
            record.next_attempt_at = Some(Utc::now() + backoff_delay(&self.config, failures)?);
            match self.store.save(&record) {
                Ok(committed) => {
                    self.sync_run(&committed, None);
                    debug!(
                        "Lead {} attempt {} at {} failed: {}",
                        committed.id, failures, stage, error
                    );
                    Ok(StepOutcome::Backoff)
                }
                Err(Error::Conflict(_)) => Ok(StepOutcome::Conflict),
                Err(e) => Err(e),
            }
        } else {
            let reason = if error.is_transient() {
                Error::RetryExhausted {
                    attempts: failures,
                    last_error: error.to_string(),
                }
                .to_string()
            } else {
                error.to_string()
            };
            record.last_error = Some(reason.clone());
            record.failed_from = Some(stage);
            let id = record.id;
            let outcome = self.commit(record, Stage::Failed)?;
            if let StepOutcome::Advanced(_) = outcome {
                warn!("Lead {} failed at {}: {}", id, stage, reason);
            }
            Ok(outcome)
        }
    }

    /// Keep the per-lead orchestration session in sync with the record
    fn sync_run(&self, record: &LeadRecord, pending: Option<PendingAction>) {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .entry(record.id)
            .or_insert_with(|| WorkflowRun::new(record.id, record.stage));
        run.stage = record.stage;
        run.pending = pending;
        if let Some(PendingAction::Reply { since }) = &run.pending {
            run.resume_cursor = Some(*since);
        }
    }

    /// Apply the configured per-call timeout to a port future
    async fn timed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.scheduler.port_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        }
    }

    fn load_cursor(config: &Config) -> Option<DateTime<Utc>> {
        let path = config.cursor_path();
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    fn persist_cursor(&self, cursor: DateTime<Utc>) -> Result<()> {
        let path = self.config.cursor_path();
        if let Some(parent) = path.parent() {
            if parent.exists() {
                let content = serde_yaml::to_string(&cursor)?;
                std::fs::write(path, content)?;
            }
        }
        Ok(())
    }
}

/// Exponential backoff with the configured base and cap
fn backoff_delay(config: &Config, failures: u32) -> Result<chrono::Duration> {
    chrono::Duration::from_std(config.retry.backoff_after(failures))
        .map_err(|e| Error::Config(format!("backoff delay: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SimAnalytics, SimOutreach, SimScheduling, SimScoring};

    struct Harness {
        orchestrator: Orchestrator,
        gate: Arc<ApprovalGate>,
        scoring: Arc<SimScoring>,
        outreach: Arc<SimOutreach>,
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.retry.max_attempts = 2;
        config.retry.backoff_base = std::time::Duration::ZERO;
        config.shortlist.top_k = 1;
        config.scheduler.port_timeout = std::time::Duration::from_secs(1);

        let store = Arc::new(LeadStore::in_memory());
        let gate = Arc::new(ApprovalGate::in_memory());
        let scoring = Arc::new(SimScoring::default());
        let outreach = Arc::new(SimOutreach::default());
        let ports = Ports {
            scoring: scoring.clone(),
            outreach: outreach.clone(),
            scheduling: Arc::new(SimScheduling::default()),
            analytics: Arc::new(SimAnalytics),
        };

        Harness {
            orchestrator: Orchestrator::new(store, gate.clone(), ports, config),
            gate,
            scoring,
            outreach,
        }
    }

    fn profile(name: &str) -> LeadProfile {
        LeadProfile {
            company_name: name.to_string(),
            company_description: "Cloud tooling".to_string(),
            industry: "SaaS".to_string(),
            location: None,
            contact_email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    /// Drive a fresh lead up to the send gate
    async fn park_at_send_gate(h: &Harness) -> LeadId {
        let id = h.orchestrator.discover(profile("Acme")).unwrap();
        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Scored)
        );
        assert_eq!(h.orchestrator.shortlist().unwrap(), vec![id]);
        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Drafted)
        );
        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::AwaitingSendApproval)
        );
        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Waiting);
        id
    }

    #[tokio::test]
    async fn test_scoring_records_score() {
        let h = harness();
        h.scoring.set_score("Acme", 0.9);
        let id = h.orchestrator.discover(profile("Acme")).unwrap();

        let outcome = h.orchestrator.step(id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Advanced(Stage::Scored));

        let record = h.orchestrator.status(id).unwrap();
        assert_eq!(record.intent_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_retry_bound_routes_to_failed() {
        let h = harness();
        h.scoring.always_fail();
        let id = h.orchestrator.discover(profile("Acme")).unwrap();

        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Backoff);
        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Failed)
        );

        let record = h.orchestrator.status(id).unwrap();
        assert_eq!(record.stage, Stage::Failed);
        assert_eq!(record.failed_from, Some(Stage::Discovered));
        assert!(record
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("Retries exhausted"));

        // Terminal: no further automatic retries
        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Idle);
        assert_eq!(h.scoring.calls(), 2);
    }

    #[tokio::test]
    async fn test_send_requires_approval() {
        let h = harness();
        let id = park_at_send_gate(&h).await;

        // Still waiting until someone resolves the gate
        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Waiting);
        assert_eq!(h.outreach.external_sends(), 0);

        let entry = h.gate.find(id, Stage::AwaitingSendApproval).unwrap();
        h.gate.resolve(entry.token, true, None).unwrap();

        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Sent)
        );
        assert_eq!(h.outreach.external_sends(), 1);

        let record = h.orchestrator.status(id).unwrap();
        assert!(record.approved(Stage::AwaitingSendApproval));
        assert!(record.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_rejection_routes_to_abandoned() {
        let h = harness();
        let id = park_at_send_gate(&h).await;

        let entry = h.gate.find(id, Stage::AwaitingSendApproval).unwrap();
        h.gate
            .resolve(entry.token, false, Some("tone is off".to_string()))
            .unwrap();

        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Abandoned)
        );
        assert_eq!(h.outreach.external_sends(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_approval_and_retries() {
        let h = harness();
        let id = park_at_send_gate(&h).await;

        let entry = h.gate.find(id, Stage::AwaitingSendApproval).unwrap();
        h.gate.resolve(entry.token, true, None).unwrap();

        h.outreach.fail_sends(1);
        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Backoff);

        let record = h.orchestrator.status(id).unwrap();
        assert_eq!(record.stage, Stage::AwaitingSendApproval);
        assert!(record.approved(Stage::AwaitingSendApproval));
        assert_eq!(record.attempts_at(Stage::AwaitingSendApproval), 1);

        // Next attempt uses a fresh token and succeeds without re-approval
        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Sent)
        );
        assert_eq!(h.outreach.external_sends(), 1);
    }

    #[tokio::test]
    async fn test_abandon_short_circuits() {
        let h = harness();
        let id = h.orchestrator.discover(profile("Acme")).unwrap();

        h.orchestrator.abandon(id).unwrap();
        let record = h.orchestrator.status(id).unwrap();
        assert_eq!(record.stage, Stage::Abandoned);

        // Abandoning again is a no-op; other terminal stages refuse
        h.orchestrator.abandon(id).unwrap();
        assert_eq!(h.orchestrator.step(id).await.unwrap(), StepOutcome::Idle);
    }

    #[tokio::test]
    async fn test_reset_resumes_failed_stage() {
        let h = harness();
        h.scoring.always_fail();
        let id = h.orchestrator.discover(profile("Acme")).unwrap();

        h.orchestrator.step(id).await.unwrap();
        h.orchestrator.step(id).await.unwrap();
        assert_eq!(h.orchestrator.status(id).unwrap().stage, Stage::Failed);

        // Reset is refused for non-failed leads, accepted here
        h.scoring.fail_times(0);
        let resumed = h.orchestrator.reset(id).unwrap();
        assert_eq!(resumed, Stage::Discovered);

        assert_eq!(
            h.orchestrator.step(id).await.unwrap(),
            StepOutcome::Advanced(Stage::Scored)
        );
    }

    #[tokio::test]
    async fn test_shortlist_promotes_top_k_over_threshold() {
        let h = harness();
        h.scoring.set_score("High", 0.9);
        h.scoring.set_score("Mid", 0.6);
        h.scoring.set_score("Low", 0.2);

        let high = h.orchestrator.discover(profile("High")).unwrap();
        let mid = h.orchestrator.discover(profile("Mid")).unwrap();
        let low = h.orchestrator.discover(profile("Low")).unwrap();

        for id in [high, mid, low] {
            h.orchestrator.step(id).await.unwrap();
        }

        // top_k = 1 in the test config
        let promoted = h.orchestrator.shortlist().unwrap();
        assert_eq!(promoted, vec![high]);
        assert_eq!(h.orchestrator.status(mid).unwrap().stage, Stage::Scored);
        assert_eq!(h.orchestrator.status(low).unwrap().stage, Stage::Scored);
    }
}
