use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard,
};

use casewatch_records::CaseType;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
/// An intake prompt waiting for the reporter to pick a case type.
pub struct PendingIntake {
    pub message_id: String,
    pub channel_id: String,
    pub profile_id: String,
    pub display_name: String,
    pub reporter_id: String,
    /// Case types the reporter was offered buttons for.
    pub offered_types: Vec<CaseType>,
    /// Text of the report message, used for tag suggestions.
    pub report_text: String,
    pub created_at: DateTime<Utc>,
    /// Generation of this registration; set by [`PendingIntakes::register`].
    pub token: u64,
}

#[derive(Default)]
/// Pending intakes keyed by prompt message id. In memory only.
pub struct PendingIntakes {
    entries: Mutex<HashMap<String, PendingIntake>>,
    next_token: AtomicU64,
}

impl PendingIntakes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `intake` under a fresh generation token, replacing any earlier registration.
    pub fn register(&self, mut intake: PendingIntake) -> PendingIntake {
        intake.token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock_entries()
            .insert(intake.message_id.clone(), intake.clone());
        intake
    }

    pub fn take(&self, message_id: &str) -> Option<PendingIntake> {
        self.lock_entries().remove(message_id)
    }

    /// Removes the entry only if it is still the registration identified by `token`.
    pub fn take_if_current(&self, message_id: &str, token: u64) -> Option<PendingIntake> {
        let mut entries = self.lock_entries();
        if entries.get(message_id).map(|entry| entry.token) != Some(token) {
            return None;
        }
        entries.remove(message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<PendingIntake> {
        self.lock_entries().get(message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, PendingIntake>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
