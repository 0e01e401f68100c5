//! Chat transport seam used by the intake, the scanner and the commands.
//!
//! The production implementation talks to the Discord REST API; tests swap in
//! an in-memory fake.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use casewatch_access::Actor;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Platform answers that mean the target no longer exists for the bot.
pub enum TransportError {
    #[error("{operation} target was not found (code {code}): {reason}")]
    NotFound {
        operation: String,
        code: u64,
        reason: String,
    },
    #[error("{operation} target is not accessible (code {code}): {reason}")]
    Inaccessible {
        operation: String,
        code: u64,
        reason: String,
    },
}

/// True when `error` says the resource is gone rather than temporarily unreachable.
pub fn is_missing_resource(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.downcast_ref::<TransportError>().is_some())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_is_bot: bool,
    pub content: String,
    /// Titles of the link previews attached to the message, in order.
    pub embed_titles: Vec<Option<String>>,
    pub member_role_ids: Vec<String>,
}

impl ChatMessage {
    pub fn first_embed_title(&self) -> Option<&str> {
        self.embed_titles
            .first()
            .and_then(|title| title.as_deref())
            .map(str::trim)
            .filter(|title| !title.is_empty())
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.author_id.clone(), self.member_role_ids.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub applied_tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A tag from a forum's tag vocabulary.
pub struct ForumTag {
    pub id: String,
    pub name: String,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThread {
    pub title: String,
    pub body: String,
    pub tag_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub emoji: Option<String>,
    pub style: ButtonStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
    pub emoji: Option<String>,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectMenu {
    pub custom_id: String,
    pub placeholder: String,
    pub min_values: usize,
    pub max_values: usize,
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRow {
    Buttons(Vec<Button>),
    Select(SelectMenu),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub components: Vec<ActionRow>,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_components(mut self, components: Vec<ActionRow>) -> Self {
        self.components = components;
        self
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Handle needed to answer an interaction and edit its reply later.
pub struct InteractionRef {
    pub id: String,
    pub token: String,
    pub application_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionReply {
    /// Acknowledge now and fill the reply in later.
    Deferred { ephemeral: bool },
    /// Acknowledge a component click without changing its message.
    DeferredUpdate,
    Message {
        message: OutboundMessage,
        ephemeral: bool,
    },
    /// Replace the message the clicked component belongs to.
    Update(OutboundMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A button click or menu selection.
pub struct ComponentEvent {
    pub interaction: InteractionRef,
    pub custom_id: String,
    pub values: Vec<String>,
    pub actor: Actor,
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq)]
/// A slash command invocation.
pub struct CommandEvent {
    pub interaction: InteractionRef,
    pub name: String,
    pub options: BTreeMap<String, Value>,
    pub actor: Actor,
    pub channel_id: String,
    /// Role ids of members referenced by user options.
    pub resolved_member_roles: BTreeMap<String, Vec<String>>,
}

impl CommandEvent {
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn option_bool(&self, name: &str) -> bool {
        self.options
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[async_trait]
/// Chat platform operations the moderation flows depend on.
pub trait CaseTransport: Send + Sync {
    async fn send_message(&self, channel_id: &str, message: &OutboundMessage)
        -> Result<PostedMessage>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<()>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<ChatMessage>;

    /// Oldest messages of a channel or thread, in posting order.
    async fn earliest_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// `Ok(None)` when the thread no longer exists or cannot be seen.
    async fn fetch_thread(&self, thread_id: &str) -> Result<Option<ThreadHandle>>;

    /// Active and archived threads of a forum.
    async fn forum_threads(&self, forum_id: &str) -> Result<Vec<ThreadHandle>>;

    async fn forum_tags(&self, forum_id: &str) -> Result<Vec<ForumTag>>;

    async fn create_thread(&self, forum_id: &str, thread: &NewThread) -> Result<ThreadHandle>;

    async fn reply_to_interaction(
        &self,
        interaction: &InteractionRef,
        reply: &InteractionReply,
    ) -> Result<()>;

    async fn edit_interaction_reply(
        &self,
        interaction: &InteractionRef,
        message: &OutboundMessage,
    ) -> Result<()>;
}
