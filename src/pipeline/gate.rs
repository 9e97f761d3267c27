//! Approval gate for side-effecting transitions
//!
//! The gate is a state register plus a notification hook, nothing more.
//! The orchestrator registers a pending approval before a gated side effect
//! and re-checks its status each tick; a human resolves it through the CLI
//! (`leadflow resolve <token> --approve|--reject`). Terminal resolutions are
//! immutable.
//!
//! The register is file-backed so an approval granted in a second process
//! reaches a waiting orchestrator after its next read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use tracing::{info, warn};

use super::notify::ApprovalNotifier;
use super::record::LeadId;
use super::stage::Stage;
use crate::{Error, Result};

/// Opaque handle for one pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateToken(pub Uuid);

impl GateToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GateToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GateToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(GateToken)
            .map_err(|e| Error::Validation(format!("invalid gate token '{}': {}", s, e)))
    }
}

/// Status of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Waiting for a human decision
    Pending,
    /// Approved
    Approved,
    /// Rejected
    Rejected,
}

impl GateStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GateStatus::Pending)
    }
}

/// One registered approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEntry {
    pub token: GateToken,
    pub lead_id: LeadId,
    pub stage: Stage,
    /// Human-readable description of what is being approved
    pub payload: String,
    pub status: GateStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Optional note from the approver
    pub message: Option<String>,
}

/// Blocking checkpoint requiring human confirmation
pub struct ApprovalGate {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<GateToken, GateEntry>>,
    notifiers: Vec<Box<dyn ApprovalNotifier>>,
}

impl ApprovalGate {
    /// Memory-only gate, used by tests
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
            notifiers: Vec::new(),
        }
    }

    /// Open a file-backed gate, loading any persisted register
    pub fn open(path: &Path, notifiers: Vec<Box<dyn ApprovalNotifier>>) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let list: Vec<GateEntry> = serde_yaml::from_str(&content)?;
            list.into_iter().map(|e| (e.token, e)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
            notifiers,
        })
    }

    fn persist(&self, entries: &HashMap<GateToken, GateEntry>) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut list: Vec<&GateEntry> = entries.values().collect();
            list.sort_by_key(|e| e.requested_at);
            let content = serde_yaml::to_string(&list)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    /// Register an approval request for (lead, stage).
    ///
    /// Idempotent per (lead, stage): a request that already exists returns
    /// its token without re-notifying, so the scheduler can call this every
    /// tick while suspended.
    pub async fn request(
        &self,
        lead_id: LeadId,
        stage: Stage,
        payload: &str,
    ) -> Result<GateToken> {
        let entry = {
            let mut entries = self.entries.lock().unwrap();

            if let Some(existing) = entries
                .values()
                .find(|e| e.lead_id == lead_id && e.stage == stage)
            {
                return Ok(existing.token);
            }

            let entry = GateEntry {
                token: GateToken::new(),
                lead_id,
                stage,
                payload: payload.to_string(),
                status: GateStatus::Pending,
                requested_at: Utc::now(),
                resolved_at: None,
                message: None,
            };
            entries.insert(entry.token, entry.clone());
            self.persist(&entries)?;
            entry
        };

        info!(
            "Approval requested: lead {} at {} (token {})",
            entry.lead_id, entry.stage, entry.token
        );

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&entry).await {
                warn!("Failed to notify via {}: {}", notifier.name(), e);
            }
        }

        Ok(entry.token)
    }

    /// Record a human decision. A terminal resolution cannot be changed.
    pub fn resolve(
        &self,
        token: GateToken,
        approved: bool,
        message: Option<String>,
    ) -> Result<GateStatus> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&token)
            .ok_or_else(|| Error::NotFound(token.to_string()))?;

        if entry.status.is_terminal() {
            return Err(Error::Validation(format!(
                "approval {} already resolved as {:?}",
                token, entry.status
            )));
        }

        entry.status = if approved {
            GateStatus::Approved
        } else {
            GateStatus::Rejected
        };
        entry.resolved_at = Some(Utc::now());
        entry.message = message;
        let status = entry.status;

        self.persist(&entries)?;
        Ok(status)
    }

    /// Status of one approval
    pub fn status(&self, token: GateToken) -> Result<GateStatus> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&token)
            .map(|e| e.status)
            .ok_or_else(|| Error::NotFound(token.to_string()))
    }

    /// The entry registered for (lead, stage), if any
    pub fn find(&self, lead_id: LeadId, stage: Stage) -> Option<GateEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .find(|e| e.lead_id == lead_id && e.stage == stage)
            .cloned()
    }

    /// All unresolved approvals, oldest first
    pub fn pending(&self) -> Vec<GateEntry> {
        let entries = self.entries.lock().unwrap();
        let mut out: Vec<GateEntry> = entries
            .values()
            .filter(|e| e.status == GateStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.requested_at);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_is_idempotent_per_lead_stage() {
        let gate = ApprovalGate::in_memory();
        let lead = LeadId::new();

        let t1 = gate
            .request(lead, Stage::AwaitingSendApproval, "draft preview")
            .await
            .unwrap();
        let t2 = gate
            .request(lead, Stage::AwaitingSendApproval, "draft preview")
            .await
            .unwrap();
        assert_eq!(t1, t2);
        assert_eq!(gate.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_terminal() {
        let gate = ApprovalGate::in_memory();
        let lead = LeadId::new();
        let token = gate
            .request(lead, Stage::AwaitingSendApproval, "draft")
            .await
            .unwrap();

        assert_eq!(gate.status(token).unwrap(), GateStatus::Pending);
        gate.resolve(token, true, None).unwrap();
        assert_eq!(gate.status(token).unwrap(), GateStatus::Approved);

        // No flip-flopping after a terminal resolution
        assert!(gate.resolve(token, false, None).is_err());
        assert_eq!(gate.status(token).unwrap(), GateStatus::Approved);
    }

    #[tokio::test]
    async fn test_rejection_recorded_with_message() {
        let gate = ApprovalGate::in_memory();
        let lead = LeadId::new();
        let token = gate
            .request(lead, Stage::AwaitingScheduleApproval, "slot")
            .await
            .unwrap();

        gate.resolve(token, false, Some("wrong contact".to_string()))
            .unwrap();
        let entry = gate.find(lead, Stage::AwaitingScheduleApproval).unwrap();
        assert_eq!(entry.status, GateStatus::Rejected);
        assert_eq!(entry.message.as_deref(), Some("wrong contact"));
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn test_register_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("approvals.yaml");
        let lead = LeadId::new();

        let token = {
            let gate = ApprovalGate::open(&path, Vec::new()).unwrap();
            gate.request(lead, Stage::AwaitingSendApproval, "draft")
                .await
                .unwrap()
        };

        let reopened = ApprovalGate::open(&path, Vec::new()).unwrap();
        assert_eq!(reopened.status(token).unwrap(), GateStatus::Pending);
        reopened.resolve(token, true, None).unwrap();

        let third = ApprovalGate::open(&path, Vec::new()).unwrap();
        assert_eq!(third.status(token).unwrap(), GateStatus::Approved);
    }
}
