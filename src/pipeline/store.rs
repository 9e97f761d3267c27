//! Versioned lead persistence
//!
//! Tracks every lead as one YAML file under the state directory, allowing:
//! - Resume from the last committed stage after a restart
//! - Inspection of any lead with a text editor
//! - Optimistic concurrency across concurrent transitions
//!
//! `save` refuses to overwrite a record whose stored version has advanced
//! since the caller's last `get`, so two racing transitions for the same
//! lead can never both commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::record::{LeadId, LeadRecord};
use super::stage::Stage;
use crate::{Error, Result};

/// Durable store for lead records
pub struct LeadStore {
    dir: Option<PathBuf>,
    leads: Mutex<HashMap<LeadId, LeadRecord>>,
}

impl LeadStore {
    /// Memory-only store, used by tests
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            leads: Mutex::new(HashMap::new()),
        }
    }

    /// Open a store rooted at `dir`, loading every persisted lead
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut leads = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "yaml").unwrap_or(false) {
                match Self::load_record(&path) {
                    Ok(record) => {
                        leads.insert(record.id, record);
                    }
                    Err(e) => {
                        warn!("Skipping unreadable lead file {}: {}", path.display(), e);
                    }
                }
            }
        }

        debug!("Loaded {} leads from {}", leads.len(), dir.display());

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            leads: Mutex::new(leads),
        })
    }

    fn load_record(path: &Path) -> Result<LeadRecord> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn record_path(&self, id: LeadId) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.yaml", id)))
    }

    fn persist(&self, record: &LeadRecord) -> Result<()> {
        if let Some(path) = self.record_path(record.id) {
            let content = serde_yaml::to_string(record)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    /// Register a newly discovered lead
    pub fn insert(&self, record: LeadRecord) -> Result<LeadId> {
        let mut leads = self.leads.lock().unwrap();
        if leads.contains_key(&record.id) {
            return Err(Error::Validation(format!(
                "lead {} already exists",
                record.id
            )));
        }
        self.persist(&record)?;
        let id = record.id;
        leads.insert(id, record);
        Ok(id)
    }

    /// Fetch a lead by id
    pub fn get(&self, id: LeadId) -> Result<LeadRecord> {
        let leads = self.leads.lock().unwrap();
        leads
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Commit a mutated record.
    ///
    /// Fails with `Conflict` if the stored version has advanced since the
    /// caller's `get`; the caller must re-read and re-evaluate rather than
    /// overwrite concurrent progress. On success the committed record (with
    /// its bumped version) is returned.
    pub fn save(&self, record: &LeadRecord) -> Result<LeadRecord> {
        let mut leads = self.leads.lock().unwrap();

        let stored = leads
            .get(&record.id)
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;

        if stored.version != record.version {
            return Err(Error::Conflict(record.id.to_string()));
        }

        let mut committed = record.clone();
        committed.version += 1;
        self.persist(&committed)?;
        leads.insert(committed.id, committed.clone());
        Ok(committed)
    }

    /// All leads currently in `stage`
    pub fn list_by_stage(&self, stage: Stage) -> Vec<LeadRecord> {
        let leads = self.leads.lock().unwrap();
        let mut out: Vec<LeadRecord> = leads
            .values()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Snapshot of every lead
    pub fn all(&self) -> Vec<LeadRecord> {
        let leads = self.leads.lock().unwrap();
        let mut out: Vec<LeadRecord> = leads.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Lead counts per stage, in pipeline order
    pub fn counts_by_stage(&self) -> Vec<(Stage, usize)> {
        let leads = self.leads.lock().unwrap();
        Stage::all()
            .iter()
            .map(|&stage| (stage, leads.values().filter(|r| r.stage == stage).count()))
            .collect()
    }

    /// Remove a lead permanently. The only way a record is destroyed.
    pub fn archive(&self, id: LeadId) -> Result<LeadRecord> {
        let mut leads = self.leads.lock().unwrap();
        let record = leads
            .remove(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Some(path) = self.record_path(id) {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::LeadProfile;

    fn new_lead(name: &str) -> LeadRecord {
        LeadRecord::new(LeadProfile {
            company_name: name.to_string(),
            company_description: "desc".to_string(),
            industry: "SaaS".to_string(),
            location: None,
            contact_email: format!("{}@example.com", name.to_lowercase()),
        })
    }

    #[test]
    fn test_insert_and_get() {
        let store = LeadStore::in_memory();
        let id = store.insert(new_lead("Acme")).unwrap();
        let record = store.get(id).unwrap();
        assert_eq!(record.profile.company_name, "Acme");
        assert!(store.get(LeadId::new()).is_err());
    }

    #[test]
    fn test_save_bumps_version() {
        let store = LeadStore::in_memory();
        let id = store.insert(new_lead("Acme")).unwrap();

        let mut record = store.get(id).unwrap();
        record.intent_score = Some(0.7);
        let committed = store.save(&record).unwrap();
        assert_eq!(committed.version, 1);
        assert_eq!(store.get(id).unwrap().version, 1);
    }

    #[test]
    fn test_stale_save_conflicts() {
        let store = LeadStore::in_memory();
        let id = store.insert(new_lead("Acme")).unwrap();

        // Two readers hold the same version
        let mut first = store.get(id).unwrap();
        let mut second = store.get(id).unwrap();

        first.intent_score = Some(0.9);
        store.save(&first).unwrap();

        second.intent_score = Some(0.1);
        match store.save(&second) {
            Err(Error::Conflict(_)) => {}
            other => panic!("expected conflict, got {:?}", other.map(|r| r.version)),
        }

        // The first write won
        assert_eq!(store.get(id).unwrap().intent_score, Some(0.9));
    }

    #[test]
    fn test_list_by_stage() {
        let store = LeadStore::in_memory();
        let a = store.insert(new_lead("A")).unwrap();
        store.insert(new_lead("B")).unwrap();

        let mut record = store.get(a).unwrap();
        record.advance(Stage::Scored).unwrap();
        store.save(&record).unwrap();

        assert_eq!(store.list_by_stage(Stage::Scored).len(), 1);
        assert_eq!(store.list_by_stage(Stage::Discovered).len(), 1);
        assert_eq!(store.list_by_stage(Stage::Sent).len(), 0);
    }

    #[test]
    fn test_counts_by_stage() {
        let store = LeadStore::in_memory();
        store.insert(new_lead("A")).unwrap();
        store.insert(new_lead("B")).unwrap();

        let counts = store.counts_by_stage();
        let discovered = counts
            .iter()
            .find(|(s, _)| *s == Stage::Discovered)
            .map(|(_, n)| *n);
        assert_eq!(discovered, Some(2));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let id;
        {
            let store = LeadStore::open(tmp.path()).unwrap();
            id = store.insert(new_lead("Durable")).unwrap();
            let mut record = store.get(id).unwrap();
            record.advance(Stage::Scored).unwrap();
            record.intent_score = Some(0.8);
            store.save(&record).unwrap();
        }

        let reopened = LeadStore::open(tmp.path()).unwrap();
        let record = reopened.get(id).unwrap();
        assert_eq!(record.stage, Stage::Scored);
        assert_eq!(record.intent_score, Some(0.8));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_archive_removes_record_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LeadStore::open(tmp.path()).unwrap();
        let id = store.insert(new_lead("Gone")).unwrap();

        store.archive(id).unwrap();
        assert!(store.get(id).is_err());
        assert!(!tmp.path().join(format!("{}.yaml", id)).exists());
    }
}
