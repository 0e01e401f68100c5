use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{bail, Context, Result};
use casewatch_core::{read_json_file, write_json_atomic};
use serde::{Deserialize, Serialize};

pub const SCAN_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Messages that currently hold the published scan report.
pub struct ReportMessages {
    pub channel_id: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScannedThread {
    thread_id: String,
    has_profile_link: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScanStateFile {
    schema_version: u32,
    #[serde(default)]
    threads: Vec<ScannedThread>,
    #[serde(default)]
    report: Option<ReportMessages>,
}

#[derive(Debug)]
/// Cache of already-scanned threads plus report message bookkeeping.
pub struct ScanStateStore {
    path: PathBuf,
    links: BTreeMap<String, bool>,
    report: Option<ReportMessages>,
}

impl ScanStateStore {
    /// Loads the cache; an empty record store drops the thread links so every
    /// thread is re-read, while the report bookkeeping is kept.
    pub fn load(path: PathBuf, record_store_is_empty: bool) -> Result<Self> {
        let mut store = Self {
            path,
            links: BTreeMap::new(),
            report: None,
        };
        let Some(file) = read_json_file::<ScanStateFile>(&store.path)? else {
            return Ok(store);
        };
        if file.schema_version != SCAN_STATE_SCHEMA_VERSION {
            if record_store_is_empty {
                tracing::info!(
                    path = %store.path.display(),
                    found = file.schema_version,
                    "replacing scan state with an unsupported schema because the case store is empty"
                );
                return Ok(store);
            }
            bail!(
                "unsupported scan state schema: expected {}, found {}",
                SCAN_STATE_SCHEMA_VERSION,
                file.schema_version
            );
        }
        store.report = file.report;
        if record_store_is_empty {
            if !file.threads.is_empty() {
                store.save().with_context(|| {
                    format!("failed to reset scan cache {}", store.path.display())
                })?;
                tracing::info!(
                    path = %store.path.display(),
                    "discarded scan cache because the case store is empty"
                );
            }
            return Ok(store);
        }
        store.links = file
            .threads
            .into_iter()
            .map(|thread| (thread.thread_id, thread.has_profile_link))
            .collect();
        Ok(store)
    }

    /// `Some(true)` when the thread is known to carry a profile link.
    pub fn status(&self, thread_id: &str) -> Option<bool> {
        self.links.get(thread_id).copied()
    }

    pub fn mark(&mut self, thread_id: &str, has_profile_link: bool) {
        self.links.insert(thread_id.to_string(), has_profile_link);
    }

    pub fn forget(&mut self, thread_id: &str) -> bool {
        self.links.remove(thread_id).is_some()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn report_messages(&self) -> Option<&ReportMessages> {
        self.report.as_ref()
    }

    pub fn set_report_messages(&mut self, report: Option<ReportMessages>) {
        self.report = report;
    }

    pub fn save(&self) -> Result<()> {
        let file = ScanStateFile {
            schema_version: SCAN_STATE_SCHEMA_VERSION,
            threads: self
                .links
                .iter()
                .map(|(thread_id, has_profile_link)| ScannedThread {
                    thread_id: thread_id.clone(),
                    has_profile_link: *has_profile_link,
                })
                .collect(),
            report: self.report.clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}
