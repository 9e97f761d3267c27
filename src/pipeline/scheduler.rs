//! Cooperative scheduler loop
//!
//! Periodically re-evaluates every lead whose stage can make progress, in
//! place of blocking waits:
//! 1. Step autonomous and approval-suspended leads (concurrently; per-lead
//!    serialization comes from the store's versioned save)
//! 2. Run the batch shortlist once scoring has settled
//! 3. Poll the outreach port for replies on its own cadence
//! 4. Sweep reply timeouts into abandonment
//! 5. Advance the analytics branch for transcript-bearing leads
//!
//! Suspended leads cost one cheap re-examination per tick; nothing ever
//! parks a thread on a gate or an inbox.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::orchestrator::{Orchestrator, StepOutcome};
use super::stage::Stage;
use super::store::LeadStore;
use crate::config::Config;
use crate::Result;

/// What one tick accomplished
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Leads examined
    pub stepped: usize,
    /// Transitions committed
    pub advanced: usize,
    /// Leads promoted by the batch shortlist
    pub shortlisted: usize,
    /// Leads advanced by a polled reply
    pub replied: usize,
    /// Leads abandoned by the reply timeout sweep
    pub abandoned: usize,
    /// Analytics summaries recorded
    pub analyzed: usize,
}

impl TickReport {
    /// Whether the tick changed anything
    pub fn is_quiet(&self) -> bool {
        self.advanced == 0
            && self.shortlisted == 0
            && self.replied == 0
            && self.abandoned == 0
            && self.analyzed == 0
    }
}

/// Drives the orchestrator on a fixed cadence
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<LeadStore>,
    config: Config,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<LeadStore>, config: Config) -> Self {
        Self {
            orchestrator,
            store,
            config,
        }
    }

    /// Run until shutdown is signalled, every active lead is terminal, or
    /// `max_ticks` elapses.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        max_ticks: Option<u64>,
    ) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.scheduler.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut next_poll = tokio::time::Instant::now();
        let mut ticks = 0u64;

        info!(
            "Scheduler starting (tick every {})",
            humantime::format_duration(self.config.scheduler.tick_interval)
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown requested, stopping scheduler");
                        break;
                    }
                }
            }

            let poll_due = tokio::time::Instant::now() >= next_poll;
            if poll_due {
                next_poll = tokio::time::Instant::now() + self.config.scheduler.reply_poll_interval;
            }

            match self.tick(poll_due).await {
                Ok(report) => {
                    if !report.is_quiet() {
                        info!(
                            "Tick: {} advanced, {} shortlisted, {} replied, {} abandoned, {} analyzed",
                            report.advanced,
                            report.shortlisted,
                            report.replied,
                            report.abandoned,
                            report.analyzed
                        );
                    }
                }
                Err(e) => {
                    warn!("Tick failed: {}", e);
                }
            }

            ticks += 1;
            if let Some(max) = max_ticks {
                if ticks >= max {
                    info!("Reached max ticks: {}", max);
                    break;
                }
            }

            // Suspended leads keep the loop alive (approvals and replies can
            // still arrive); a fully terminal book has nothing left to do
            let leads = self.store.all();
            if !leads.is_empty() && leads.iter().all(|r| r.stage.is_terminal()) {
                info!("Every lead is terminal, stopping scheduler");
                break;
            }
        }

        info!("Scheduler stopped after {} ticks", ticks);
        Ok(())
    }

    /// One re-evaluation pass over every lead
    pub async fn tick(&self, poll_replies: bool) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Phase 1: step every lead that can progress or is gate-suspended
        let candidates: Vec<_> = self
            .store
            .all()
            .into_iter()
            .filter(|r| r.stage.is_autonomous() || r.stage.requires_approval())
            .map(|r| r.id)
            .collect();

        report.stepped = candidates.len();

        let steps = candidates.iter().map(|&id| self.orchestrator.step(id));
        for (id, outcome) in candidates.iter().zip(join_all(steps).await) {
            match outcome {
                Ok(StepOutcome::Advanced(_)) => report.advanced += 1,
                Ok(_) => {}
                Err(e) => warn!("Step failed for {}: {}", id, e),
            }
        }

        // Phase 2: batch shortlist once no lead is still being scored
        if self.store.list_by_stage(Stage::Discovered).is_empty() {
            match self.orchestrator.shortlist() {
                Ok(promoted) => report.shortlisted = promoted.len(),
                Err(e) => warn!("Shortlist pass failed: {}", e),
            }
        } else {
            debug!("Shortlist deferred: scoring still in progress");
        }

        // Phase 3: reply polling on its own cadence
        if poll_replies {
            match self.orchestrator.poll_replies().await {
                Ok(n) => report.replied = n,
                Err(e) => warn!("Reply poll failed: {}", e),
            }
        }

        // Phase 4: abandonment sweep
        match self.orchestrator.sweep_reply_timeouts() {
            Ok(ids) => report.abandoned = ids.len(),
            Err(e) => warn!("Abandonment sweep failed: {}", e),
        }

        // Phase 5: analytics branch
        let eligible: Vec<_> = self
            .store
            .all()
            .into_iter()
            .filter(|r| self.orchestrator.analytics_eligible(r))
            .map(|r| r.id)
            .collect();

        let analyses = eligible.iter().map(|&id| self.orchestrator.run_analytics(id));
        for (id, outcome) in eligible.iter().zip(join_all(analyses).await) {
            match outcome {
                Ok(StepOutcome::Advanced(_)) | Ok(StepOutcome::Idle) => report.analyzed += 1,
                Ok(_) => {}
                Err(e) => warn!("Analytics failed for {}: {}", id, e),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ApprovalGate, LeadProfile, LeadStore};
    use crate::ports::{
        Ports, SimAnalytics, SimOutreach, SimScheduling, SimScoring,
    };

    fn test_config() -> Config {
        let mut config = Config::default();
        config.scheduler.port_timeout = std::time::Duration::from_secs(1);
        config.shortlist.top_k = 1;
        config
    }

    fn harness() -> (Scheduler, Arc<Orchestrator>, Arc<LeadStore>, Arc<SimScoring>) {
        let store = Arc::new(LeadStore::in_memory());
        let gate = Arc::new(ApprovalGate::in_memory());
        let config = test_config();
        let scoring = Arc::new(SimScoring::default());
        let ports = Ports {
            scoring: scoring.clone(),
            outreach: Arc::new(SimOutreach::default()),
            scheduling: Arc::new(SimScheduling::default()),
            analytics: Arc::new(SimAnalytics),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            gate,
            ports,
            config.clone(),
        ));
        (
            Scheduler::new(orchestrator.clone(), store.clone(), config.clone()),
            orchestrator,
            store,
            scoring,
        )
    }

    fn profile(name: &str) -> LeadProfile {
        LeadProfile {
            company_name: name.to_string(),
            company_description: "desc".to_string(),
            industry: "SaaS".to_string(),
            location: None,
            contact_email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    #[tokio::test]
    async fn test_tick_scores_and_shortlists_once_settled() {
        let (scheduler, orchestrator, store, _) = harness();
        let id = orchestrator.discover(profile("Acme")).unwrap();

        // Scoring settles within the tick, so the batch runs right after
        let report = scheduler.tick(false).await.unwrap();
        assert_eq!(report.advanced, 1);
        assert_eq!(report.shortlisted, 1);
        assert_eq!(store.get(id).unwrap().stage, Stage::Shortlisted);

        // Next tick drafts and parks the lead at the send gate
        scheduler.tick(false).await.unwrap();
        scheduler.tick(false).await.unwrap();
        assert_eq!(
            store.get(id).unwrap().stage,
            Stage::AwaitingSendApproval
        );
    }

    #[tokio::test]
    async fn test_shortlist_deferred_while_scoring_backs_off() {
        let (scheduler, orchestrator, store, scoring) = harness();
        orchestrator.discover(profile("First")).unwrap();
        orchestrator.discover(profile("Second")).unwrap();

        // One of the two scoring calls fails and backs off in Discovered
        scoring.fail_times(1);

        let report = scheduler.tick(false).await.unwrap();
        assert_eq!(report.shortlisted, 0);
        assert_eq!(store.list_by_stage(Stage::Discovered).len(), 1);
        assert_eq!(store.list_by_stage(Stage::Scored).len(), 1);
    }

    #[tokio::test]
    async fn test_quiet_tick_on_empty_store() {
        let (scheduler, _, _, _) = harness();
        let report = scheduler.tick(true).await.unwrap();
        assert!(report.is_quiet());
        assert_eq!(report.stepped, 0);
    }
}
