use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use casewatch_core::{read_json_file, write_json_atomic};
use serde::{Deserialize, Serialize};

use crate::case_record::{CaseRecord, CaseType, ThreadEntry};

pub const CASE_STORE_SCHEMA_VERSION: u32 = 1;

/// Record store handle shared by the intake, the scanner and the commands.
pub type SharedCaseRecordStore = Arc<Mutex<CaseRecordStore>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseStoreFile {
    schema_version: u32,
    #[serde(default)]
    records: Vec<CaseRecord>,
}

impl Default for CaseStoreFile {
    fn default() -> Self {
        Self {
            schema_version: CASE_STORE_SCHEMA_VERSION,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A thread to attach to the record keyed by `profile_id`.
pub struct ThreadFiling {
    pub profile_id: String,
    pub display_name: String,
    /// When false an existing record keeps its stored display name.
    pub overwrite_display_name: bool,
    pub case_type: CaseType,
    pub entry: ThreadEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilingOutcome {
    Inserted,
    Appended,
    AlreadyListed,
}

#[derive(Debug)]
/// Flat-file store of case records keyed by profile id.
///
/// Every mutation rewrites the whole file.
pub struct CaseRecordStore {
    path: PathBuf,
    records: Vec<CaseRecord>,
}

impl CaseRecordStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let file = read_json_file::<CaseStoreFile>(&path)?.unwrap_or_default();
        if file.schema_version != CASE_STORE_SCHEMA_VERSION {
            bail!(
                "unsupported case store schema: expected {}, found {}",
                CASE_STORE_SCHEMA_VERSION,
                file.schema_version
            );
        }

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(file.records.len());
        for record in file.records {
            let profile_id = record.profile_id.trim().to_string();
            if profile_id.is_empty() {
                tracing::warn!(path = %path.display(), "dropping case record without profile id");
                continue;
            }
            if !seen.insert(profile_id.clone()) {
                tracing::warn!(
                    path = %path.display(),
                    profile_id = %profile_id,
                    "dropping duplicate case record"
                );
                continue;
            }
            records.push(CaseRecord {
                profile_id,
                ..record
            });
        }

        Ok(Self { path, records })
    }

    pub fn shared(self) -> SharedCaseRecordStore {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn all(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn find(&self, profile_id: &str) -> Option<&CaseRecord> {
        self.records
            .iter()
            .find(|record| record.profile_id == profile_id)
    }

    pub fn by_type(&self, case_type: CaseType) -> Vec<&CaseRecord> {
        self.records
            .iter()
            .filter(|record| record.case_type == case_type)
            .collect()
    }

    /// Records with at least one thread carrying `tag_id`.
    pub fn by_tag(&self, tag_id: &str) -> Vec<&CaseRecord> {
        self.records
            .iter()
            .filter(|record| {
                record
                    .threads
                    .iter()
                    .any(|entry| entry.tags.iter().any(|tag| tag == tag_id))
            })
            .collect()
    }

    /// Record listing `thread_id`, if any.
    pub fn by_thread(&self, thread_id: &str) -> Option<&CaseRecord> {
        self.records
            .iter()
            .find(|record| record.has_thread(thread_id))
    }

    /// Inserts or replaces the record with the same profile id.
    pub fn upsert(&mut self, record: CaseRecord) -> Result<()> {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.profile_id == record.profile_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.save()
    }

    /// Attaches a thread to the profile's record, creating the record when absent.
    ///
    /// Appending overwrites the case type. A thread already listed leaves the
    /// record untouched and skips the write.
    pub fn record_thread(&mut self, filing: ThreadFiling) -> Result<FilingOutcome> {
        let ThreadFiling {
            profile_id,
            display_name,
            overwrite_display_name,
            case_type,
            entry,
        } = filing;

        let outcome = match self
            .records
            .iter_mut()
            .find(|record| record.profile_id == profile_id)
        {
            Some(record) => {
                if !record.push_thread(entry) {
                    return Ok(FilingOutcome::AlreadyListed);
                }
                record.case_type = case_type;
                if overwrite_display_name {
                    record.display_name = display_name;
                }
                FilingOutcome::Appended
            }
            None => {
                self.records
                    .push(CaseRecord::new(profile_id, display_name, case_type, entry));
                FilingOutcome::Inserted
            }
        };
        self.save()?;
        Ok(outcome)
    }

    /// Drops the listed threads from a record and returns the updated record.
    ///
    /// A record left without threads stays in the store.
    pub fn prune_threads(
        &mut self,
        profile_id: &str,
        thread_ids: &[String],
    ) -> Result<Option<CaseRecord>> {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|record| record.profile_id == profile_id)
        else {
            return Ok(None);
        };
        let removed = record.remove_threads(thread_ids);
        let updated = record.clone();
        if removed > 0 {
            self.save()?;
        }
        Ok(Some(updated))
    }

    /// Clears every record and returns how many were removed.
    pub fn remove_all(&mut self) -> Result<usize> {
        let removed = self.records.len();
        self.records.clear();
        self.save()?;
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        let file = CaseStoreFile {
            schema_version: CASE_STORE_SCHEMA_VERSION,
            records: self.records.clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}
