use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::transport::{CaseTransport, ChatMessage};

pub const PROFILE_URL_BASE: &str = "https://vrchat.com/home/user/";
const PROFILE_ID_PREFIX: &str = "usr_";

fn profile_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:https?://)?vrchat\.com/home/user/([A-Za-z0-9_-]+)")
            .expect("profile link regex should compile")
    })
}

/// First profile id linked in `text`.
pub fn match_profile_id(text: &str) -> Option<String> {
    profile_link_pattern()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

pub fn profile_url(profile_id: &str) -> String {
    format!("{PROFILE_URL_BASE}{profile_id}")
}

/// Display name used when no link preview could be read.
pub fn fallback_display_name(profile_id: &str) -> String {
    profile_id
        .strip_prefix(PROFILE_ID_PREFIX)
        .unwrap_or(profile_id)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMatch {
    pub profile_id: String,
    pub display_name: String,
    /// False when `display_name` is the id fallback.
    pub name_from_preview: bool,
}

impl ProfileMatch {
    fn from_parts(profile_id: String, preview_title: Option<&str>) -> Self {
        match preview_title {
            Some(title) => Self {
                profile_id,
                display_name: title.to_string(),
                name_from_preview: true,
            },
            None => Self {
                display_name: fallback_display_name(&profile_id),
                profile_id,
                name_from_preview: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileExtractorConfig {
    pub embed_wait: Duration,
    pub max_attempts: usize,
}

impl Default for ProfileExtractorConfig {
    fn default() -> Self {
        Self {
            embed_wait: Duration::from_millis(450),
            max_attempts: 2,
        }
    }
}

impl ProfileExtractorConfig {
    fn attempt_timeout(&self) -> Duration {
        self.embed_wait.saturating_mul(3) / 2
    }

    /// Upper bound for the whole polling loop.
    pub fn overall_deadline(&self) -> Duration {
        self.attempt_timeout()
            .saturating_mul(self.max_attempts.max(1) as u32)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Finds profile links in messages and resolves a display name from the link preview.
pub struct ProfileExtractor {
    config: ProfileExtractorConfig,
}

impl ProfileExtractor {
    pub fn new(config: ProfileExtractorConfig) -> Self {
        Self { config }
    }

    /// Reads only what `message` already carries.
    pub fn extract_from_snapshot(message: &ChatMessage) -> Option<ProfileMatch> {
        let profile_id = match_profile_id(&message.content)?;
        Some(ProfileMatch::from_parts(
            profile_id,
            message.first_embed_title(),
        ))
    }

    /// Extracts the profile id, polling the message a bounded number of times
    /// for the preview title the platform attaches after posting.
    pub async fn extract(
        &self,
        transport: &dyn CaseTransport,
        message: &ChatMessage,
    ) -> Option<ProfileMatch> {
        let profile_id = match_profile_id(&message.content)?;
        if let Some(title) = message.first_embed_title() {
            return Some(ProfileMatch::from_parts(profile_id, Some(title)));
        }

        let polled = tokio::time::timeout(
            self.config.overall_deadline(),
            self.poll_preview_title(transport, message),
        )
        .await
        .ok()
        .flatten();
        if polled.is_none() {
            tracing::debug!(
                message_id = %message.id,
                profile_id = %profile_id,
                "link preview title unavailable; using id fallback"
            );
        }
        Some(ProfileMatch::from_parts(profile_id, polled.as_deref()))
    }

    async fn poll_preview_title(
        &self,
        transport: &dyn CaseTransport,
        message: &ChatMessage,
    ) -> Option<String> {
        for attempt in 1..=self.config.max_attempts.max(1) {
            let fetched = tokio::time::timeout(self.config.attempt_timeout(), async {
                tokio::time::sleep(self.config.embed_wait).await;
                transport
                    .fetch_message(&message.channel_id, &message.id)
                    .await
            })
            .await;
            match fetched {
                Ok(Ok(refreshed)) => {
                    if let Some(title) = refreshed.first_embed_title() {
                        return Some(title.to_string());
                    }
                }
                Ok(Err(error)) => {
                    tracing::debug!(
                        message_id = %message.id,
                        attempt,
                        error = %error,
                        "link preview fetch failed"
                    );
                }
                Err(_) => {
                    tracing::debug!(
                        message_id = %message.id,
                        attempt,
                        "link preview fetch timed out"
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_match_profile_id_accepts_bare_and_schemed_links() {
        assert_eq!(
            match_profile_id("see https://vrchat.com/home/user/usr_ABC123 please"),
            Some("usr_ABC123".to_string())
        );
        assert_eq!(
            match_profile_id("vrchat.com/home/user/usr_a-b_c"),
            Some("usr_a-b_c".to_string())
        );
        assert_eq!(match_profile_id("https://vrchat.com/home/world/wrld_1"), None);
        assert_eq!(match_profile_id("no link here"), None);
    }

    #[test]
    fn unit_fallback_display_name_strips_profile_prefix_once() {
        assert_eq!(fallback_display_name("usr_ABC123"), "ABC123");
        assert_eq!(fallback_display_name("legacyName"), "legacyName");
        assert_eq!(profile_url("usr_x"), "https://vrchat.com/home/user/usr_x");
    }

    #[test]
    fn unit_extract_from_snapshot_prefers_preview_title() {
        let message = ChatMessage {
            id: "m1".to_string(),
            content: "https://vrchat.com/home/user/usr_ABC123".to_string(),
            embed_titles: vec![Some("Alice".to_string())],
            ..ChatMessage::default()
        };
        let matched = ProfileExtractor::extract_from_snapshot(&message).expect("match");
        assert_eq!(matched.display_name, "Alice");
        assert!(matched.name_from_preview);

        let bare = ChatMessage {
            embed_titles: Vec::new(),
            ..message
        };
        let matched = ProfileExtractor::extract_from_snapshot(&bare).expect("match");
        assert_eq!(matched.display_name, "ABC123");
        assert!(!matched.name_from_preview);
    }

    #[test]
    fn unit_overall_deadline_covers_every_attempt() {
        let config = ProfileExtractorConfig::default();
        assert_eq!(config.overall_deadline(), Duration::from_millis(1350));
    }
}
