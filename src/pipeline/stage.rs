//! Pipeline stages and the legal transitions between them
//!
//! The stage graph is fixed at compile time. Every mutation of a lead's
//! stage goes through [`Stage::can_advance_to`], so no code path can move a
//! lead along an edge that is not declared here.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A lead's position in the acquisition pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Newly ingested, not yet scored
    Discovered,
    /// Intent score recorded, awaiting batch shortlisting
    Scored,
    /// Promoted by the batch shortlist rule
    Shortlisted,
    /// Outreach email drafted
    Drafted,
    /// Draft awaiting human send approval
    AwaitingSendApproval,
    /// Outreach email sent
    Sent,
    /// Suspended until the inbox poll surfaces a reply
    AwaitingReply,
    /// Reply recorded, slot extraction pending or in progress
    ReplyReceived,
    /// Proposed meeting slot awaiting human booking approval
    AwaitingScheduleApproval,
    /// Meeting booked
    Scheduled,
    /// Call transcript analyzed
    Analyzed,
    /// Retries exhausted or unrecoverable error
    Failed,
    /// Explicitly dropped: rejection, decline, or reply timeout
    Abandoned,
}

impl Stage {
    /// Whether a lead in this stage can legally move to `next`.
    ///
    /// Edges: the forward chain, abandonment from any non-terminal stage,
    /// failure from any stage whose transition performs port calls, and the
    /// analytics branch (legal once a transcript reference exists, which the
    /// orchestrator checks separately).
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;

        match (self, next) {
            // Forward chain
            (Discovered, Scored)
            | (Scored, Shortlisted)
            | (Shortlisted, Drafted)
            | (Drafted, AwaitingSendApproval)
            | (AwaitingSendApproval, Sent)
            | (Sent, AwaitingReply)
            | (AwaitingReply, ReplyReceived)
            | (ReplyReceived, AwaitingScheduleApproval)
            | (AwaitingScheduleApproval, Scheduled) => true,

            // Port-calling transitions can exhaust their retries
            (Discovered, Failed)
            | (Shortlisted, Failed)
            | (AwaitingSendApproval, Failed)
            | (ReplyReceived, Failed)
            | (AwaitingScheduleApproval, Failed) => true,

            // Abandonment is always available before a terminal stage
            (from, Abandoned) => !from.is_terminal(),

            // Analytics runs as a parallel branch: any lead holding a
            // transcript may finish here, including after booking
            (Scheduled, Analyzed) => true,
            (from, Analyzed) => !from.is_terminal(),

            _ => false,
        }
    }

    /// Validate a transition, for callers that want an error instead of a bool
    pub fn check_advance_to(self, next: Stage) -> Result<()> {
        if self.can_advance_to(next) {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "illegal stage transition {self} -> {next}"
            )))
        }
    }

    /// Terminal stages accept no further transitions (except the analytics
    /// branch out of `Scheduled`)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Scheduled | Stage::Analyzed | Stage::Failed | Stage::Abandoned
        )
    }

    /// Stages that hold a pending human decision
    pub fn requires_approval(self) -> bool {
        matches!(
            self,
            Stage::AwaitingSendApproval | Stage::AwaitingScheduleApproval
        )
    }

    /// Stages that wait on an external signal rather than autonomous work
    pub fn is_suspended(self) -> bool {
        self.requires_approval() || self == Stage::AwaitingReply
    }

    /// Stages the scheduler re-evaluates without any external signal.
    /// `Scored` is excluded: it only leaves via the batch shortlist.
    pub fn is_autonomous(self) -> bool {
        matches!(
            self,
            Stage::Discovered | Stage::Shortlisted | Stage::Drafted | Stage::Sent
                | Stage::ReplyReceived
        )
    }

    /// All stages, in pipeline order
    pub fn all() -> &'static [Stage] {
        use Stage::*;
        &[
            Discovered,
            Scored,
            Shortlisted,
            Drafted,
            AwaitingSendApproval,
            Sent,
            AwaitingReply,
            ReplyReceived,
            AwaitingScheduleApproval,
            Scheduled,
            Analyzed,
            Failed,
            Abandoned,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::Scored => "scored",
            Stage::Shortlisted => "shortlisted",
            Stage::Drafted => "drafted",
            Stage::AwaitingSendApproval => "awaiting_send_approval",
            Stage::Sent => "sent",
            Stage::AwaitingReply => "awaiting_reply",
            Stage::ReplyReceived => "reply_received",
            Stage::AwaitingScheduleApproval => "awaiting_schedule_approval",
            Stage::Scheduled => "scheduled",
            Stage::Analyzed => "analyzed",
            Stage::Failed => "failed",
            Stage::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "discovered" => Ok(Stage::Discovered),
            "scored" => Ok(Stage::Scored),
            "shortlisted" => Ok(Stage::Shortlisted),
            "drafted" => Ok(Stage::Drafted),
            "awaiting_send_approval" => Ok(Stage::AwaitingSendApproval),
            "sent" => Ok(Stage::Sent),
            "awaiting_reply" => Ok(Stage::AwaitingReply),
            "reply_received" => Ok(Stage::ReplyReceived),
            "awaiting_schedule_approval" => Ok(Stage::AwaitingScheduleApproval),
            "scheduled" => Ok(Stage::Scheduled),
            "analyzed" => Ok(Stage::Analyzed),
            "failed" => Ok(Stage::Failed),
            "abandoned" => Ok(Stage::Abandoned),
            _ => Err(Error::Validation(format!("unknown stage: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain() {
        assert!(Stage::Discovered.can_advance_to(Stage::Scored));
        assert!(Stage::Scored.can_advance_to(Stage::Shortlisted));
        assert!(Stage::Shortlisted.can_advance_to(Stage::Drafted));
        assert!(Stage::Drafted.can_advance_to(Stage::AwaitingSendApproval));
        assert!(Stage::AwaitingSendApproval.can_advance_to(Stage::Sent));
        assert!(Stage::Sent.can_advance_to(Stage::AwaitingReply));
        assert!(Stage::AwaitingReply.can_advance_to(Stage::ReplyReceived));
        assert!(Stage::ReplyReceived.can_advance_to(Stage::AwaitingScheduleApproval));
        assert!(Stage::AwaitingScheduleApproval.can_advance_to(Stage::Scheduled));
    }

    #[test]
    fn test_no_skipping_or_backtracking() {
        assert!(!Stage::Discovered.can_advance_to(Stage::Shortlisted));
        assert!(!Stage::Scored.can_advance_to(Stage::Sent));
        assert!(!Stage::Sent.can_advance_to(Stage::Drafted));
        assert!(!Stage::ReplyReceived.can_advance_to(Stage::AwaitingReply));
        assert!(!Stage::Scheduled.can_advance_to(Stage::Discovered));
    }

    #[test]
    fn test_terminal_stages_are_closed() {
        for terminal in [Stage::Analyzed, Stage::Failed, Stage::Abandoned] {
            for &next in Stage::all() {
                assert!(
                    !terminal.can_advance_to(next),
                    "{terminal} -> {next} should be illegal"
                );
            }
        }
        // Scheduled is terminal for the pipeline but open to analytics
        assert!(Stage::Scheduled.can_advance_to(Stage::Analyzed));
        assert!(!Stage::Scheduled.can_advance_to(Stage::Abandoned));
    }

    #[test]
    fn test_abandonment_from_any_active_stage() {
        for &stage in Stage::all() {
            if !stage.is_terminal() {
                assert!(stage.can_advance_to(Stage::Abandoned), "{stage}");
            }
        }
    }

    #[test]
    fn test_approval_stages() {
        assert!(Stage::AwaitingSendApproval.requires_approval());
        assert!(Stage::AwaitingScheduleApproval.requires_approval());
        assert!(!Stage::AwaitingReply.requires_approval());
        assert!(Stage::AwaitingReply.is_suspended());
    }

    #[test]
    fn test_roundtrip_display_fromstr() {
        for &stage in Stage::all() {
            let parsed: Stage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
        assert!("nonsense".parse::<Stage>().is_err());
    }
}
