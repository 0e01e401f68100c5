//! Thread creation and record write shared by every way of filing a case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use casewatch_access::{Actor, PermissionPolicy};
use casewatch_core::utc_now;
use casewatch_records::{
    CaseRecord, CaseRecordStore, CaseType, FilingOutcome, SharedCaseRecordStore, ThreadEntry,
    ThreadFiling,
};
use futures_util::future::join_all;
use tokio::sync::OwnedMutexGuard;

use crate::discord_helpers::truncate_chars;
use crate::profile_extractor::profile_url;
use crate::transport::{is_missing_resource, CaseTransport, NewThread, ThreadHandle};

pub const THREAD_TITLE_MAX_CHARS: usize = 100;
pub const MAX_CASE_TAGS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Destination forum per case type.
pub struct ForumLayout {
    pub suspect_forum_id: String,
    pub banned_forum_id: String,
}

impl ForumLayout {
    pub fn forum_for(&self, case_type: CaseType) -> &str {
        match case_type {
            CaseType::Suspect => &self.suspect_forum_id,
            CaseType::Banned => &self.banned_forum_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRequest {
    pub actor: Actor,
    pub profile_id: String,
    pub display_name: String,
    pub case_type: CaseType,
    pub tag_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseFilingOutcome {
    Filed {
        thread: ThreadHandle,
        record_outcome: FilingOutcome,
    },
    /// A live thread already exists for the profile; nothing was created.
    AlreadyActive { live_thread_ids: Vec<String> },
    PermissionDenied { reason_code: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A record after its threads were checked against the live forums.
pub struct ThreadReconciliation {
    pub record: CaseRecord,
    pub live_thread_ids: Vec<String>,
    pub pruned_thread_ids: Vec<String>,
}

pub(crate) fn lock_records(
    store: &SharedCaseRecordStore,
) -> Result<MutexGuard<'_, CaseRecordStore>> {
    store
        .lock()
        .map_err(|_| anyhow!("case record store mutex is poisoned"))
}

#[derive(Default)]
/// One async lock per profile id.
pub struct ProfileLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProfileLocks {
    pub async fn acquire(&self, profile_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(profile_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

/// Creates case threads and keeps the record store in step with them.
pub struct CaseFiler {
    transport: Arc<dyn CaseTransport>,
    records: SharedCaseRecordStore,
    permissions: Arc<PermissionPolicy>,
    forums: ForumLayout,
    locks: ProfileLocks,
}

impl CaseFiler {
    pub fn new(
        transport: Arc<dyn CaseTransport>,
        records: SharedCaseRecordStore,
        permissions: Arc<PermissionPolicy>,
        forums: ForumLayout,
    ) -> Self {
        Self {
            transport,
            records,
            permissions,
            forums,
            locks: ProfileLocks::default(),
        }
    }

    pub fn forums(&self) -> &ForumLayout {
        &self.forums
    }

    pub fn permissions(&self) -> &PermissionPolicy {
        &self.permissions
    }

    pub fn records(&self) -> &SharedCaseRecordStore {
        &self.records
    }

    /// Probes every thread of the profile's record and prunes the ones that are gone.
    ///
    /// Transient probe failures abort without pruning anything.
    pub async fn reconcile_threads(
        &self,
        profile_id: &str,
    ) -> Result<Option<ThreadReconciliation>> {
        let Some(record) = lock_records(&self.records)?.find(profile_id).cloned() else {
            return Ok(None);
        };

        let probes = join_all(record.threads.iter().map(|entry| async move {
            let outcome = self.transport.fetch_thread(&entry.thread_id).await;
            (entry.thread_id.clone(), outcome)
        }))
        .await;

        let mut live_thread_ids = Vec::new();
        let mut pruned_thread_ids = Vec::new();
        for (thread_id, outcome) in probes {
            match outcome {
                Ok(Some(_)) => live_thread_ids.push(thread_id),
                Ok(None) => pruned_thread_ids.push(thread_id),
                Err(error) if is_missing_resource(&error) => pruned_thread_ids.push(thread_id),
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("failed to check thread {thread_id}"));
                }
            }
        }

        let record = if pruned_thread_ids.is_empty() {
            record
        } else {
            tracing::info!(
                profile_id = %profile_id,
                pruned = pruned_thread_ids.len(),
                "pruning threads that no longer exist"
            );
            lock_records(&self.records)?
                .prune_threads(profile_id, &pruned_thread_ids)?
                .unwrap_or(record)
        };
        Ok(Some(ThreadReconciliation {
            record,
            live_thread_ids,
            pruned_thread_ids,
        }))
    }

    /// Files a case: permission check, live-thread re-check, thread creation, record write.
    ///
    /// Holds the profile's lock throughout so two concurrent filings cannot both
    /// create a thread. A failed thread creation writes nothing.
    pub async fn file_case(&self, request: &FilingRequest) -> Result<CaseFilingOutcome> {
        let decision = self
            .permissions
            .authorize_case_type(&request.actor, request.case_type);
        if !decision.is_allowed() {
            return Ok(CaseFilingOutcome::PermissionDenied {
                reason_code: decision.reason_code().to_string(),
            });
        }

        let _guard = self.locks.acquire(&request.profile_id).await;
        if let Some(reconciled) = self.reconcile_threads(&request.profile_id).await? {
            if !reconciled.live_thread_ids.is_empty() {
                return Ok(CaseFilingOutcome::AlreadyActive {
                    live_thread_ids: reconciled.live_thread_ids,
                });
            }
        }

        let tag_ids = request
            .tag_ids
            .iter()
            .take(MAX_CASE_TAGS)
            .cloned()
            .collect::<Vec<_>>();
        let forum_id = self.forums.forum_for(request.case_type);
        let thread = self
            .transport
            .create_thread(
                forum_id,
                &NewThread {
                    title: truncate_chars(&request.display_name, THREAD_TITLE_MAX_CHARS),
                    body: render_case_seed_message(request),
                    tag_ids: tag_ids.clone(),
                },
            )
            .await
            .with_context(|| format!("failed to create case thread in forum {forum_id}"))?;

        let entry = ThreadEntry::new(
            thread.id.clone(),
            &tag_ids,
            thread.created_at.unwrap_or_else(utc_now),
        );
        let record_outcome = lock_records(&self.records)?.record_thread(ThreadFiling {
            profile_id: request.profile_id.clone(),
            display_name: request.display_name.clone(),
            overwrite_display_name: true,
            case_type: request.case_type,
            entry,
        })?;
        tracing::info!(
            profile_id = %request.profile_id,
            case_type = request.case_type.as_str(),
            thread_id = %thread.id,
            reporter_id = %request.actor.user_id,
            "case thread created"
        );
        Ok(CaseFilingOutcome::Filed {
            thread,
            record_outcome,
        })
    }
}

/// First message of a case thread.
pub fn render_case_seed_message(request: &FilingRequest) -> String {
    format!(
        "**New {} report**\n\n\
         **Player:** {}\n\
         **Profile:** {}\n\
         **ID:** `{}`\n\
         **Reported by:** <@{}>\n\n\
         **Please add:**\n\
         • A detailed description of the behavior\n\
         • Screenshots of the player\n\
         • Evidence of the behavior\n\
         • Any relevant information",
        request.case_type.as_str(),
        request.display_name,
        profile_url(&request.profile_id),
        request.profile_id,
        request.actor.user_id,
    )
}
