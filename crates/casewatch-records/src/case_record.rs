use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Moderation category of a case; each maps to one destination forum.
pub enum CaseType {
    Suspect,
    #[serde(alias = "ban")]
    Banned,
}

impl CaseType {
    pub const ALL: [CaseType; 2] = [CaseType::Suspect, CaseType::Banned];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspect => "suspect",
            Self::Banned => "banned",
        }
    }

    /// Human label used in Discord messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Suspect => "Suspect",
            Self::Banned => "Banned",
        }
    }

    pub fn forum_label(self) -> &'static str {
        match self {
            Self::Suspect => "suspects",
            Self::Banned => "banned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "suspect" => Some(Self::Suspect),
            "ban" | "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One discussion thread filed for a case.
pub struct ThreadEntry {
    pub thread_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadEntry {
    /// Builds an entry, keeping the first occurrence of each tag id.
    pub fn new(thread_id: impl Into<String>, tags: &[String], created_at: DateTime<Utc>) -> Self {
        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() || unique_tags.iter().any(|existing| existing == tag) {
                continue;
            }
            unique_tags.push(tag.to_string());
        }
        Self {
            thread_id: thread_id.into(),
            tags: unique_tags,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Persistent entry linking an external profile to its moderation threads.
pub struct CaseRecord {
    pub profile_id: String,
    pub display_name: String,
    pub case_type: CaseType,
    #[serde(default)]
    pub threads: Vec<ThreadEntry>,
}

impl CaseRecord {
    pub fn new(
        profile_id: impl Into<String>,
        display_name: impl Into<String>,
        case_type: CaseType,
        entry: ThreadEntry,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            display_name: display_name.into(),
            case_type,
            threads: vec![entry],
        }
    }

    pub fn has_thread(&self, thread_id: &str) -> bool {
        self.threads.iter().any(|entry| entry.thread_id == thread_id)
    }

    /// Appends `entry` unless the thread is already listed; returns whether it was added.
    pub fn push_thread(&mut self, entry: ThreadEntry) -> bool {
        if self.has_thread(&entry.thread_id) {
            return false;
        }
        self.threads.push(entry);
        true
    }

    /// Removes the listed thread ids and returns how many entries were dropped.
    pub fn remove_threads(&mut self, thread_ids: &[String]) -> usize {
        let before = self.threads.len();
        self.threads
            .retain(|entry| !thread_ids.iter().any(|id| id == &entry.thread_id));
        before - self.threads.len()
    }

    pub fn first_thread(&self) -> Option<&ThreadEntry> {
        self.threads.first()
    }

    pub fn latest_thread_at(&self) -> Option<DateTime<Utc>> {
        self.threads.iter().map(|entry| entry.created_at).max()
    }
}
