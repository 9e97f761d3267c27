//! Simulated port implementations
//!
//! In-memory scripted doubles for the four ports, used by the test suite and
//! by `leadflow run --demo`. They honor the same idempotency contract as
//! real adapters: side effects are counted once per token, and repeated
//! calls with a known token return the recorded receipt.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    AnalyticsPort, BookingReceipt, CallSummary, CallTranscript, EmailDraft, IdempotencyToken,
    InboundReply, OutreachPort, SchedulingPort, ScoringPort, SendReceipt, Sentiment, SlotCandidate,
};
use crate::pipeline::{LeadId, LeadProfile};
use crate::{Error, Result};

/// Scripted intent scoring with failure injection
#[derive(Default)]
pub struct SimScoring {
    scores: Mutex<HashMap<String, f64>>,
    failures_remaining: Mutex<u32>,
    calls: Mutex<u32>,
}

impl SimScoring {
    /// Fix the score returned for a company
    pub fn set_score(&self, company_name: &str, score: f64) {
        self.scores
            .lock()
            .unwrap()
            .insert(company_name.to_string(), score);
    }

    /// Fail the next `n` scoring calls with a service error
    pub fn fail_times(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    /// Fail every scoring call, forever
    pub fn always_fail(&self) {
        *self.failures_remaining.lock().unwrap() = u32::MAX;
    }

    /// How many scoring calls have been made
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ScoringPort for SimScoring {
    async fn score(&self, profile: &LeadProfile) -> Result<f64> {
        *self.calls.lock().unwrap() += 1;

        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                if *failures != u32::MAX {
                    *failures -= 1;
                }
                return Err(Error::Service("scoring service unavailable".to_string()));
            }
        }

        let scores = self.scores.lock().unwrap();
        Ok(scores.get(&profile.company_name).copied().unwrap_or(0.5))
    }
}

/// Scripted mail transport with per-token send deduplication
#[derive(Default)]
pub struct SimOutreach {
    drafts: Mutex<HashMap<IdempotencyToken, EmailDraft>>,
    sends: Mutex<HashMap<IdempotencyToken, SendReceipt>>,
    external_sends: Mutex<u32>,
    send_failures: Mutex<u32>,
    replies: Mutex<Vec<InboundReply>>,
}

impl SimOutreach {
    /// Queue a reply for the next inbox poll
    pub fn queue_reply(&self, contact_email: &str, body: &str) {
        self.replies.lock().unwrap().push(InboundReply {
            contact_email: contact_email.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        });
    }

    /// Fail the next `n` send calls with a service error
    pub fn fail_sends(&self, n: u32) {
        *self.send_failures.lock().unwrap() = n;
    }

    /// Number of emails that actually left the building
    pub fn external_sends(&self) -> u32 {
        *self.external_sends.lock().unwrap()
    }
}

#[async_trait]
impl OutreachPort for SimOutreach {
    async fn draft(&self, profile: &LeadProfile, token: &IdempotencyToken) -> Result<EmailDraft> {
        let mut drafts = self.drafts.lock().unwrap();
        if let Some(existing) = drafts.get(token) {
            return Ok(existing.clone());
        }

        let draft = EmailDraft {
            subject: format!("Exploring a partnership with {}", profile.company_name),
            body: format!(
                "Hi,\n\nWe work with {} companies like {} and would love to set up \
                 a short discovery call.\n\nBest regards",
                profile.industry, profile.company_name
            ),
        };
        drafts.insert(token.clone(), draft.clone());
        Ok(draft)
    }

    async fn send(
        &self,
        _lead: LeadId,
        _to: &str,
        _draft: &EmailDraft,
        token: &IdempotencyToken,
    ) -> Result<SendReceipt> {
        let mut sends = self.sends.lock().unwrap();
        if let Some(receipt) = sends.get(token) {
            // Duplicate delivery attempt for a committed token
            return Ok(receipt.clone());
        }

        {
            let mut failures = self.send_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Service("smtp connection refused".to_string()));
            }
        }

        *self.external_sends.lock().unwrap() += 1;
        let receipt = SendReceipt {
            message_id: format!("msg-{}", token),
            sent_at: Utc::now(),
        };
        sends.insert(token.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn poll_replies(&self, since: DateTime<Utc>) -> Result<Vec<InboundReply>> {
        let replies = self.replies.lock().unwrap();
        let mut out: Vec<InboundReply> = replies
            .iter()
            .filter(|r| r.received_at > since)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.received_at);
        Ok(out)
    }
}

/// Scripted availability parsing and calendar booking
#[derive(Default)]
pub struct SimScheduling {
    bookings: Mutex<HashMap<IdempotencyToken, BookingReceipt>>,
    external_bookings: Mutex<u32>,
    book_failures: Mutex<u32>,
}

impl SimScheduling {
    /// Fail the next `n` booking calls with a service error
    pub fn fail_bookings(&self, n: u32) {
        *self.book_failures.lock().unwrap() = n;
    }

    /// Number of calendar events actually created
    pub fn external_bookings(&self) -> u32 {
        *self.external_bookings.lock().unwrap()
    }
}

#[async_trait]
impl SchedulingPort for SimScheduling {
    async fn classify_sentiment(&self, reply: &str) -> Result<Sentiment> {
        Ok(keyword_sentiment(reply))
    }

    async fn extract_slots(&self, reply: &str) -> Result<Vec<SlotCandidate>> {
        extract_slots_from_text(reply, Utc::now())
    }

    async fn book(
        &self,
        _lead: LeadId,
        slot: DateTime<Utc>,
        token: &IdempotencyToken,
    ) -> Result<BookingReceipt> {
        let mut bookings = self.bookings.lock().unwrap();
        if let Some(receipt) = bookings.get(token) {
            return Ok(receipt.clone());
        }

        {
            let mut failures = self.book_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Service("calendar service unavailable".to_string()));
            }
        }

        *self.external_bookings.lock().unwrap() += 1;
        let receipt = BookingReceipt {
            event_id: format!("evt-{}", token),
            slot,
        };
        bookings.insert(token.clone(), receipt.clone());
        Ok(receipt)
    }
}

/// Canned transcript analysis
#[derive(Default)]
pub struct SimAnalytics;

#[async_trait]
impl AnalyticsPort for SimAnalytics {
    async fn analyze(&self, transcript: &CallTranscript) -> Result<CallSummary> {
        let text = transcript.text.to_lowercase();
        let themes: Vec<String> = ["cloud", "migration", "data", "security", "cost", "ai"]
            .iter()
            .filter(|kw| text.contains(**kw))
            .map(|kw| kw.to_string())
            .collect();

        let pain_points: Vec<String> = transcript
            .text
            .split(['.', '\n'])
            .filter(|s| {
                let lower = s.to_lowercase();
                ["struggle", "problem", "challenge", "pain", "slow"]
                    .iter()
                    .any(|kw| lower.contains(kw))
            })
            .map(|s| s.trim().to_string())
            .take(3)
            .collect();

        let first_sentence = transcript
            .text
            .split('.')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();

        Ok(CallSummary {
            summary: format!(
                "Discovery call with {} ({}): {}",
                transcript.company_name, transcript.industry, first_sentence
            ),
            top_themes: themes,
            pain_points,
            next_best_actions: vec![
                "Send a written recap of the call".to_string(),
                "Share a tailored proposal".to_string(),
            ],
            sentiment: keyword_sentiment(&transcript.text),
            notable_quotes: Vec::new(),
        })
    }
}

/// Keyword-rule sentiment, mirroring the tone rules the real service applies
fn keyword_sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();

    const NEGATIVE: &[&str] = &[
        "not interested",
        "no thanks",
        "decline",
        "unsubscribe",
        "stop emailing",
        "remove me",
    ];
    if NEGATIVE.iter().any(|kw| lower.contains(kw)) {
        return Sentiment::Negative;
    }

    const POSITIVE: &[&str] = &[
        "works",
        "available",
        "sounds good",
        "happy to",
        "interested",
        "yes",
        "sure",
        "let's",
    ];
    if POSITIVE.iter().any(|kw| lower.contains(kw)) {
        return Sentiment::Positive;
    }

    Sentiment::Neutral
}

/// Parse candidate meeting times out of free-form reply text.
///
/// Handles "tomorrow", weekday names, and am/pm or HH:MM clock times, all
/// relative to `now`. A weekday matching today resolves to next week.
fn extract_slots_from_text(reply: &str, now: DateTime<Utc>) -> Result<Vec<SlotCandidate>> {
    let lower = reply.to_lowercase();

    let time_re = Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b|\b(\d{1,2}):(\d{2})\b")
        .map_err(|e| Error::Service(format!("slot pattern: {}", e)))?;

    let time = time_re.captures(&lower).and_then(|caps| {
        if let Some(hour) = caps.get(1) {
            let mut h: u32 = hour.as_str().parse().ok()?;
            let m: u32 = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            match caps.get(3).map(|p| p.as_str()) {
                Some("pm") if h < 12 => h += 12,
                Some("am") if h == 12 => h = 0,
                _ => {}
            }
            NaiveTime::from_hms_opt(h, m, 0)
        } else {
            let h: u32 = caps.get(4)?.as_str().parse().ok()?;
            let m: u32 = caps.get(5)?.as_str().parse().ok()?;
            NaiveTime::from_hms_opt(h, m, 0)
        }
    });
    let time = time
        .or_else(|| NaiveTime::from_hms_opt(9, 0, 0))
        .unwrap_or(NaiveTime::MIN);

    let mut slots = Vec::new();

    if lower.contains("tomorrow") {
        let date = (now + ChronoDuration::days(1)).date_naive();
        slots.push(date.and_time(time).and_utc());
    }

    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if let Some(target) = weekday_from_word(word) {
            let today = now.date_naive().weekday().num_days_from_monday();
            let mut ahead =
                (target.num_days_from_monday() as i64 - today as i64).rem_euclid(7);
            if ahead == 0 {
                ahead = 7;
            }
            let date = (now + ChronoDuration::days(ahead)).date_naive();
            slots.push(date.and_time(time).and_utc());
        }
    }

    slots.sort();
    slots.dedup();
    Ok(slots)
}

fn weekday_from_word(word: &str) -> Option<Weekday> {
    if word.len() < 3 || !word.is_char_boundary(3) {
        return None;
    }
    match &word[..3] {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LeadProfile {
        LeadProfile {
            company_name: "SecureNet Systems".to_string(),
            company_description: "Cloud threat intelligence".to_string(),
            industry: "Cybersecurity".to_string(),
            location: None,
            contact_email: "cto@securenet.example".to_string(),
        }
    }

    fn token(attempt: u32) -> IdempotencyToken {
        IdempotencyToken {
            lead: "lead-1".to_string(),
            stage: "awaiting_send_approval".to_string(),
            attempt,
        }
    }

    #[tokio::test]
    async fn test_send_is_idempotent_per_token() {
        let outreach = SimOutreach::default();
        let draft = EmailDraft {
            subject: "hello".to_string(),
            body: "world".to_string(),
        };

        let lead = LeadId::new();
        let r1 = outreach
            .send(lead, "a@b.c", &draft, &token(0))
            .await
            .unwrap();
        let r2 = outreach
            .send(lead, "a@b.c", &draft, &token(0))
            .await
            .unwrap();

        assert_eq!(r1.message_id, r2.message_id);
        assert_eq!(outreach.external_sends(), 1);

        // A new attempt counter means a genuinely new send
        outreach
            .send(lead, "a@b.c", &draft, &token(1))
            .await
            .unwrap();
        assert_eq!(outreach.external_sends(), 2);
    }

    #[tokio::test]
    async fn test_draft_cached_by_token() {
        let outreach = SimOutreach::default();
        let d1 = outreach.draft(&profile(), &token(0)).await.unwrap();
        let d2 = outreach.draft(&profile(), &token(0)).await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn test_scoring_failure_injection() {
        let scoring = SimScoring::default();
        scoring.set_score("SecureNet Systems", 0.9);
        scoring.fail_times(2);

        assert!(scoring.score(&profile()).await.is_err());
        assert!(scoring.score(&profile()).await.is_err());
        let score = scoring.score(&profile()).await.unwrap();
        assert!((score - 0.9).abs() < f64::EPSILON);
        assert_eq!(scoring.calls(), 3);
    }

    #[tokio::test]
    async fn test_booking_deduplicates() {
        let scheduling = SimScheduling::default();
        let lead = LeadId::new();
        let slot = Utc::now();

        scheduling.book(lead, slot, &token(0)).await.unwrap();
        scheduling.book(lead, slot, &token(0)).await.unwrap();
        assert_eq!(scheduling.external_bookings(), 1);
    }

    #[test]
    fn test_sentiment_rules() {
        assert_eq!(
            keyword_sentiment("Tuesday 3pm works for me"),
            Sentiment::Positive
        );
        assert_eq!(
            keyword_sentiment("We are not interested, please remove me"),
            Sentiment::Negative
        );
        assert_eq!(keyword_sentiment("Who is this?"), Sentiment::Neutral);
    }

    #[test]
    fn test_extract_weekday_slot() {
        let now = Utc::now();
        let slots = extract_slots_from_text("Tuesday 3pm works", now).unwrap();
        assert_eq!(slots.len(), 1);
        let slot = slots[0];
        assert_eq!(slot.date_naive().weekday(), Weekday::Tue);
        assert_eq!(slot.time(), NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert!(slot > now);
    }

    #[test]
    fn test_extract_tomorrow_slot() {
        let now = Utc::now();
        let slots = extract_slots_from_text("can we talk tomorrow at 10:30?", now).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date_naive(), (now + ChronoDuration::days(1)).date_naive());
        assert_eq!(slots[0].time(), NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    }

    #[test]
    fn test_no_slot_in_vague_reply() {
        let slots = extract_slots_from_text("sounds interesting, tell me more", Utc::now()).unwrap();
        assert!(slots.is_empty());
    }
}
