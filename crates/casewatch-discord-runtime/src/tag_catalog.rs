use std::path::Path;

use anyhow::{bail, Result};
use casewatch_core::read_json_file;
use casewatch_records::CaseType;
use serde::{Deserialize, Serialize};

use crate::transport::ForumTag;

const TAG_CATALOG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Catalog entry describing one moderation tag and the words that suggest it.
pub struct CatalogTag {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CatalogTag {
    fn new(name: &str, value: &str, emoji: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            emoji: Some(emoji.to_string()),
            keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
        }
    }

    fn matches_text(&self, lowered_text: &str) -> bool {
        self.keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .any(|keyword| lowered_text.contains(&keyword))
            || lowered_text.contains(&self.name.to_lowercase())
            || lowered_text.contains(&self.value.to_lowercase())
    }

    /// Whether a forum tag is the live counterpart of this entry.
    pub fn describes(&self, forum_tag: &ForumTag) -> bool {
        let forum_name = forum_tag.name.trim().to_lowercase();
        forum_name == self.name.trim().to_lowercase()
            || forum_name == self.value.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCatalog {
    schema_version: u32,
    #[serde(default)]
    pub suspect: Vec<CatalogTag>,
    #[serde(default)]
    pub banned: Vec<CatalogTag>,
}

impl Default for TagCatalog {
    fn default() -> Self {
        Self {
            schema_version: TAG_CATALOG_SCHEMA_VERSION,
            suspect: vec![
                CatalogTag::new(
                    "Toxic behavior",
                    "toxic",
                    "⚠️",
                    &["toxic", "insult", "aggressive", "rude"],
                ),
                CatalogTag::new(
                    "Harassment",
                    "harassment",
                    "⚠️",
                    &["harass", "stalking", "following", "insistent"],
                ),
                CatalogTag::new(
                    "Hate speech",
                    "hate_speech",
                    "⚠️",
                    &["hate", "racism", "racist", "discrimination"],
                ),
                CatalogTag::new("Spam", "spam", "⚠️", &["spam", "flood", "spammer"]),
                CatalogTag::new("Crash", "crash", "⚠️", &["crash", "lag", "freeze"]),
                CatalogTag::new(
                    "NSFW avatar",
                    "nsfw_avatar",
                    "⚠️",
                    &["nsfw", "avatar", "inappropriate"],
                ),
                CatalogTag::new("Threats", "threats", "⚠️", &["threat", "intimidation"]),
            ],
            banned: vec![
                CatalogTag::new(
                    "Repeat offender",
                    "repeat_offender",
                    "🚫",
                    &["repeat", "again", "multiple"],
                ),
                CatalogTag::new(
                    "Malicious crash",
                    "malicious_crash",
                    "🚫",
                    &["crash", "malicious", "intentional"],
                ),
                CatalogTag::new(
                    "Severe harassment",
                    "severe_harassment",
                    "🚫",
                    &["harass", "severe"],
                ),
                CatalogTag::new(
                    "Extreme behavior",
                    "extreme_behavior",
                    "🚫",
                    &["extreme", "danger"],
                ),
                CatalogTag::new(
                    "Severe threats",
                    "severe_threats",
                    "🚫",
                    &["threat", "severe", "danger"],
                ),
            ],
        }
    }
}

impl TagCatalog {
    /// Loads a catalog file, falling back to the built-in catalog when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(catalog) = read_json_file::<TagCatalog>(path)? else {
            tracing::info!(path = %path.display(), "tag catalog not found; using built-in tags");
            return Ok(Self::default());
        };
        if catalog.schema_version != TAG_CATALOG_SCHEMA_VERSION {
            bail!(
                "unsupported tag catalog schema: expected {}, found {}",
                TAG_CATALOG_SCHEMA_VERSION,
                catalog.schema_version
            );
        }
        Ok(catalog)
    }

    pub fn tags_for(&self, case_type: CaseType) -> &[CatalogTag] {
        match case_type {
            CaseType::Suspect => &self.suspect,
            CaseType::Banned => &self.banned,
        }
    }

    /// Catalog entries suggested by `text` for the given case type.
    pub fn find_matching_tags(&self, text: &str, case_type: CaseType) -> Vec<&CatalogTag> {
        let lowered = text.to_lowercase();
        self.tags_for(case_type)
            .iter()
            .filter(|tag| tag.matches_text(&lowered))
            .collect()
    }

    /// Ids of forum tags to pre-select for a report, at most `limit`.
    pub fn preselected_forum_tags(
        &self,
        text: &str,
        case_type: CaseType,
        forum_tags: &[ForumTag],
        limit: usize,
    ) -> Vec<String> {
        let suggested = self.find_matching_tags(text, case_type);
        forum_tags
            .iter()
            .filter(|forum_tag| suggested.iter().any(|tag| tag.describes(forum_tag)))
            .map(|forum_tag| forum_tag.id.clone())
            .take(limit)
            .collect()
    }
}
