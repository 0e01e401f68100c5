//! Forum reconciliation: walks both case forums, links threads to records,
//! prunes references to threads that are gone and reports drift.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use casewatch_core::utc_now;
use casewatch_records::{
    near_duplicate_pairs, CaseRecord, CaseType, FilingOutcome, NearDuplicatePair, ScanStateStore,
    SharedCaseRecordStore, ThreadEntry, ThreadFiling, NEAR_DUPLICATE_THRESHOLD,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use thiserror::Error;

use crate::case_filing::{lock_records, ForumLayout};
use crate::discord_helpers::snowflake_timestamp;
use crate::forum_report::{publish_report, render_scan_report};
use crate::profile_extractor::{ProfileExtractor, ProfileMatch};
use crate::transport::{is_missing_resource, CaseTransport, ThreadHandle};

#[derive(Debug, Error)]
#[error("a forum scan is already running")]
pub struct ScanAlreadyRunning;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannerConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub shallow_message_limit: usize,
    pub deep_message_limit: usize,
    pub similarity_threshold: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_secs(1),
            shallow_message_limit: 10,
            deep_message_limit: 50,
            similarity_threshold: NEAR_DUPLICATE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Ignore the scanned-thread cache.
    pub force_rescan: bool,
    /// Remove every record first; implies `force_rescan`.
    pub rebuild: bool,
    /// Where to publish the report, if anywhere.
    pub report_channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkedThread {
    pub thread_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-forum scan counts.
pub struct ForumScanSummary {
    pub case_type: CaseType,
    pub total_threads: usize,
    pub linked: usize,
    pub newly_linked: usize,
    pub unlinked: Vec<UnlinkedThread>,
    pub deleted: Vec<String>,
    pub failed: usize,
}

impl ForumScanSummary {
    fn new(case_type: CaseType) -> Self {
        Self {
            case_type,
            total_threads: 0,
            linked: 0,
            newly_linked: 0,
            unlinked: Vec::new(),
            deleted: Vec::new(),
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A record with more than one live thread in the forum of its case type.
pub struct DuplicateThreadGroup {
    pub profile_id: String,
    pub display_name: String,
    pub case_type: CaseType,
    pub thread_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Records removed by a rebuild.
    pub rebuilt_records: Option<usize>,
    pub forums: Vec<ForumScanSummary>,
    /// Record thread references pruned because the thread no longer exists.
    pub orphaned_threads: Vec<String>,
    pub orphan_probe_failures: usize,
    pub duplicate_threads: Vec<DuplicateThreadGroup>,
    pub near_duplicates: Vec<NearDuplicatePair>,
    pub record_count: usize,
}

impl ScanReport {
    pub fn total_failed(&self) -> usize {
        self.forums.iter().map(|forum| forum.failed).sum::<usize>() + self.orphan_probe_failures
    }
}

#[derive(Debug)]
enum ThreadScanResult {
    Linked(ProfileMatch),
    Unlinked,
    Deleted,
    Failed(anyhow::Error),
}

/// Runs reconciliation scans; at most one at a time.
pub struct ForumScanner {
    transport: Arc<dyn CaseTransport>,
    records: SharedCaseRecordStore,
    forums: ForumLayout,
    config: ScannerConfig,
    state: tokio::sync::Mutex<ScanStateStore>,
}

impl ForumScanner {
    pub fn new(
        transport: Arc<dyn CaseTransport>,
        records: SharedCaseRecordStore,
        forums: ForumLayout,
        config: ScannerConfig,
        state: ScanStateStore,
    ) -> Self {
        Self {
            transport,
            records,
            forums,
            config,
            state: tokio::sync::Mutex::new(state),
        }
    }

    /// Runs one scan. Fails fast when another scan holds the state.
    pub async fn run(&self, request: ScanRequest) -> Result<ScanReport> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| ScanAlreadyRunning)?;
        let started = Instant::now();
        tracing::info!(
            force_rescan = request.force_rescan,
            rebuild = request.rebuild,
            "forum scan started"
        );

        let outcome = self.scan(&mut state, &request, started).await;
        let outcome = match (outcome, request.report_channel_id.as_deref()) {
            (Ok(report), Some(channel_id)) => {
                let chunks = render_scan_report(&report);
                publish_report(self.transport.as_ref(), &mut state, channel_id, &chunks)
                    .await
                    .map(|_| report)
            }
            (outcome, _) => outcome,
        };
        let saved = state.save();

        let report = outcome?;
        saved?;
        tracing::info!(
            records = report.record_count,
            orphaned = report.orphaned_threads.len(),
            duplicates = report.duplicate_threads.len(),
            near_duplicates = report.near_duplicates.len(),
            failed = report.total_failed(),
            duration_ms = report.duration.as_millis() as u64,
            "forum scan finished"
        );
        Ok(report)
    }

    async fn scan(
        &self,
        state: &mut ScanStateStore,
        request: &ScanRequest,
        started: Instant,
    ) -> Result<ScanReport> {
        let started_at = utc_now();
        let rebuilt_records = if request.rebuild {
            let removed = lock_records(&self.records)?.remove_all()?;
            tracing::warn!(removed, "case store cleared for rebuild");
            Some(removed)
        } else {
            None
        };
        if request.force_rescan || request.rebuild {
            state.clear();
        }

        let mut forums = Vec::new();
        let mut listed: BTreeMap<CaseType, BTreeSet<String>> = BTreeMap::new();
        for case_type in CaseType::ALL {
            let forum_id = self.forums.forum_for(case_type);
            let threads = self
                .transport
                .forum_threads(forum_id)
                .await
                .with_context(|| format!("failed to list {} forum threads", case_type.as_str()))?;
            forums.push(self.scan_forum(state, case_type, &threads).await?);
            listed.insert(case_type, threads.into_iter().map(|thread| thread.id).collect());
        }

        let (orphaned_threads, orphan_probe_failures) =
            self.repair_orphans(state, &listed).await?;
        let (duplicate_threads, near_duplicates, record_count) = {
            let records = lock_records(&self.records)?;
            (
                duplicate_thread_groups(records.all(), &listed),
                near_duplicate_pairs(records.all(), self.config.similarity_threshold),
                records.len(),
            )
        };

        Ok(ScanReport {
            started_at,
            duration: started.elapsed(),
            rebuilt_records,
            forums,
            orphaned_threads,
            orphan_probe_failures,
            duplicate_threads,
            near_duplicates,
            record_count,
        })
    }

    async fn scan_forum(
        &self,
        state: &mut ScanStateStore,
        case_type: CaseType,
        threads: &[ThreadHandle],
    ) -> Result<ForumScanSummary> {
        let mut summary = ForumScanSummary::new(case_type);
        summary.total_threads = threads.len();

        let mut pending = Vec::new();
        for thread in threads {
            match state.status(&thread.id) {
                Some(true) => summary.linked += 1,
                Some(false) => summary.unlinked.push(UnlinkedThread {
                    thread_id: thread.id.clone(),
                    name: thread.name.clone(),
                }),
                None => pending.push(thread),
            }
        }

        let batch_size = self.config.batch_size.max(1);
        let batch_count = pending.len().div_ceil(batch_size);
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            let results =
                join_all(batch.iter().map(|thread| self.classify_thread(thread))).await;
            for (thread, result) in batch.iter().zip(results) {
                self.apply_result(state, &mut summary, case_type, thread, result)?;
            }
            tracing::debug!(
                forum = case_type.forum_label(),
                batch = index + 1,
                batches = batch_count,
                "scan batch processed"
            );
            if index + 1 < batch_count {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }
        Ok(summary)
    }

    async fn classify_thread(&self, thread: &ThreadHandle) -> ThreadScanResult {
        match self.find_profile_link(thread).await {
            Ok(Some(profile)) => ThreadScanResult::Linked(profile),
            Ok(None) => ThreadScanResult::Unlinked,
            Err(error) if is_missing_resource(&error) => ThreadScanResult::Deleted,
            Err(error) => ThreadScanResult::Failed(error),
        }
    }

    async fn find_profile_link(&self, thread: &ThreadHandle) -> Result<Option<ProfileMatch>> {
        let shallow = self
            .transport
            .earliest_messages(&thread.id, self.config.shallow_message_limit)
            .await?;
        if let Some(profile) = shallow.iter().find_map(ProfileExtractor::extract_from_snapshot) {
            return Ok(Some(profile));
        }
        if shallow.len() < self.config.shallow_message_limit {
            return Ok(None);
        }

        let checked = shallow
            .iter()
            .map(|message| message.id.as_str())
            .collect::<HashSet<_>>();
        let deep = self
            .transport
            .earliest_messages(&thread.id, self.config.deep_message_limit)
            .await?;
        Ok(deep
            .iter()
            .filter(|message| !checked.contains(message.id.as_str()))
            .find_map(ProfileExtractor::extract_from_snapshot))
    }

    fn apply_result(
        &self,
        state: &mut ScanStateStore,
        summary: &mut ForumScanSummary,
        case_type: CaseType,
        thread: &ThreadHandle,
        result: ThreadScanResult,
    ) -> Result<()> {
        match result {
            ThreadScanResult::Linked(profile) => {
                let created_at = thread
                    .created_at
                    .or_else(|| snowflake_timestamp(&thread.id))
                    .unwrap_or_else(utc_now);
                let filing = ThreadFiling {
                    profile_id: profile.profile_id.clone(),
                    display_name: profile.display_name.clone(),
                    overwrite_display_name: profile.name_from_preview,
                    case_type,
                    entry: ThreadEntry::new(thread.id.clone(), &thread.applied_tags, created_at),
                };
                match lock_records(&self.records)?.record_thread(filing) {
                    Ok(FilingOutcome::AlreadyListed) => {}
                    Ok(_) => {
                        summary.newly_linked += 1;
                        tracing::debug!(
                            thread_id = %thread.id,
                            profile_id = %profile.profile_id,
                            "linked thread to case record"
                        );
                    }
                    Err(error) => {
                        summary.failed += 1;
                        tracing::warn!(
                            thread_id = %thread.id,
                            error = %error,
                            "failed to record scanned thread"
                        );
                        return Ok(());
                    }
                }
                summary.linked += 1;
                state.mark(&thread.id, true);
            }
            ThreadScanResult::Unlinked => {
                summary.unlinked.push(UnlinkedThread {
                    thread_id: thread.id.clone(),
                    name: thread.name.clone(),
                });
                state.mark(&thread.id, false);
            }
            ThreadScanResult::Deleted => {
                summary.deleted.push(thread.id.clone());
                state.forget(&thread.id);
                self.prune_thread_reference(&thread.id)?;
            }
            ThreadScanResult::Failed(error) => {
                summary.failed += 1;
                tracing::warn!(
                    thread_id = %thread.id,
                    error = %error,
                    "failed to scan thread"
                );
            }
        }
        Ok(())
    }

    fn prune_thread_reference(&self, thread_id: &str) -> Result<bool> {
        let mut records = lock_records(&self.records)?;
        let Some(profile_id) = records
            .by_thread(thread_id)
            .map(|record| record.profile_id.clone())
        else {
            return Ok(false);
        };
        records.prune_threads(&profile_id, &[thread_id.to_string()])?;
        Ok(true)
    }

    /// Probes record threads missing from every forum listing and prunes the gone ones.
    async fn repair_orphans(
        &self,
        state: &mut ScanStateStore,
        listed: &BTreeMap<CaseType, BTreeSet<String>>,
    ) -> Result<(Vec<String>, usize)> {
        let orphans = {
            let records = lock_records(&self.records)?;
            records
                .all()
                .iter()
                .flat_map(|record| record.threads.iter())
                .map(|entry| entry.thread_id.clone())
                .filter(|thread_id| !listed.values().any(|ids| ids.contains(thread_id)))
                .collect::<BTreeSet<_>>()
        };

        let mut pruned = Vec::new();
        let mut failures = 0;
        let orphans = orphans.into_iter().collect::<Vec<_>>();
        for batch in orphans.chunks(self.config.batch_size.max(1)) {
            let probes = join_all(
                batch
                    .iter()
                    .map(|thread_id| self.transport.fetch_thread(thread_id)),
            )
            .await;
            for (thread_id, probe) in batch.iter().zip(probes) {
                let gone = match probe {
                    Ok(Some(_)) => false,
                    Ok(None) => true,
                    Err(error) if is_missing_resource(&error) => true,
                    Err(error) => {
                        failures += 1;
                        tracing::warn!(
                            thread_id = %thread_id,
                            error = %error,
                            "failed to probe orphaned thread"
                        );
                        false
                    }
                };
                if gone {
                    state.forget(thread_id);
                    if self.prune_thread_reference(thread_id)? {
                        pruned.push(thread_id.clone());
                    }
                }
            }
        }
        if !pruned.is_empty() {
            tracing::info!(pruned = pruned.len(), "pruned orphaned thread references");
        }
        Ok((pruned, failures))
    }
}

fn duplicate_thread_groups(
    records: &[CaseRecord],
    listed: &BTreeMap<CaseType, BTreeSet<String>>,
) -> Vec<DuplicateThreadGroup> {
    records
        .iter()
        .filter_map(|record| {
            let forum_threads = listed.get(&record.case_type)?;
            let thread_ids = record
                .threads
                .iter()
                .filter(|entry| forum_threads.contains(&entry.thread_id))
                .map(|entry| entry.thread_id.clone())
                .collect::<Vec<_>>();
            (thread_ids.len() > 1).then(|| DuplicateThreadGroup {
                profile_id: record.profile_id.clone(),
                display_name: record.display_name.clone(),
                case_type: record.case_type,
                thread_ids,
            })
        })
        .collect()
}
