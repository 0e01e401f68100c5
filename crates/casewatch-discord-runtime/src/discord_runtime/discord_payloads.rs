//! Discord REST/gateway object shapes and their conversions to transport types.

use std::collections::BTreeMap;

use casewatch_access::Actor;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::discord_helpers::snowflake_timestamp;
use crate::transport::{
    ActionRow, ButtonStyle, ChatMessage, CommandEvent, ComponentEvent, ForumTag, InteractionRef,
    OutboundMessage, ThreadHandle,
};

pub(super) const EPHEMERAL_FLAG: u64 = 1 << 6;
const INTERACTION_TYPE_COMMAND: u64 = 2;
const INTERACTION_TYPE_COMPONENT: u64 = 3;

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordUser {
    pub(super) id: String,
    #[serde(default)]
    pub(super) bot: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordMember {
    #[serde(default)]
    pub(super) user: Option<DiscordUser>,
    #[serde(default)]
    pub(super) roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordEmbed {
    #[serde(default)]
    pub(super) title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordMessage {
    pub(super) id: String,
    pub(super) channel_id: String,
    #[serde(default)]
    pub(super) guild_id: Option<String>,
    pub(super) author: DiscordUser,
    #[serde(default)]
    pub(super) content: String,
    #[serde(default)]
    pub(super) embeds: Vec<DiscordEmbed>,
    #[serde(default)]
    pub(super) member: Option<DiscordMember>,
}

impl DiscordMessage {
    pub(super) fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author_id: self.author.id,
            author_is_bot: self.author.bot,
            content: self.content,
            embed_titles: self.embeds.into_iter().map(|embed| embed.title).collect(),
            member_role_ids: self.member.map(|member| member.roles).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordThreadMetadata {
    #[serde(default)]
    pub(super) archive_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(super) create_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordForumTag {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) emoji_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordChannel {
    pub(super) id: String,
    #[serde(default)]
    pub(super) parent_id: Option<String>,
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) applied_tags: Vec<String>,
    #[serde(default)]
    pub(super) thread_metadata: Option<DiscordThreadMetadata>,
    #[serde(default)]
    pub(super) available_tags: Vec<DiscordForumTag>,
}

impl DiscordChannel {
    pub(super) fn archive_timestamp(&self) -> Option<DateTime<Utc>> {
        self.thread_metadata
            .as_ref()
            .and_then(|metadata| metadata.archive_timestamp)
    }

    pub(super) fn into_thread_handle(self) -> ThreadHandle {
        let created_at = self
            .thread_metadata
            .as_ref()
            .and_then(|metadata| metadata.create_timestamp)
            .or_else(|| snowflake_timestamp(&self.id));
        ThreadHandle {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name.unwrap_or_default(),
            applied_tags: self.applied_tags,
            created_at,
        }
    }

    pub(super) fn into_forum_tags(self) -> Vec<ForumTag> {
        self.available_tags
            .into_iter()
            .map(|tag| ForumTag {
                id: tag.id,
                name: tag.name,
                emoji: tag.emoji_name.filter(|emoji| !emoji.trim().is_empty()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordThreadList {
    #[serde(default)]
    pub(super) threads: Vec<DiscordChannel>,
    #[serde(default)]
    pub(super) has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordGatewayBot {
    pub(super) url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordCommandOption {
    pub(super) name: String,
    #[serde(default)]
    pub(super) value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordResolvedData {
    #[serde(default)]
    pub(super) members: BTreeMap<String, DiscordMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordInteractionData {
    #[serde(default)]
    pub(super) custom_id: Option<String>,
    #[serde(default)]
    pub(super) values: Vec<String>,
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) options: Vec<DiscordCommandOption>,
    #[serde(default)]
    pub(super) resolved: Option<DiscordResolvedData>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordMessageRef {
    pub(super) id: String,
    pub(super) channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordInteraction {
    pub(super) id: String,
    pub(super) application_id: String,
    #[serde(rename = "type")]
    pub(super) interaction_type: u64,
    pub(super) token: String,
    #[serde(default)]
    pub(super) data: Option<DiscordInteractionData>,
    #[serde(default)]
    pub(super) channel_id: Option<String>,
    #[serde(default)]
    pub(super) member: Option<DiscordMember>,
    #[serde(default)]
    pub(super) user: Option<DiscordUser>,
    #[serde(default)]
    pub(super) message: Option<DiscordMessageRef>,
}

#[derive(Debug, Clone, PartialEq)]
/// Interaction kinds the bridge routes.
pub(super) enum InboundInteraction {
    Component(ComponentEvent),
    Command(CommandEvent),
}

impl DiscordInteraction {
    fn actor(&self) -> Option<Actor> {
        let member_user = self
            .member
            .as_ref()
            .and_then(|member| member.user.as_ref());
        let user_id = member_user.or(self.user.as_ref())?.id.clone();
        let roles = self
            .member
            .as_ref()
            .map(|member| member.roles.clone())
            .unwrap_or_default();
        Some(Actor::new(user_id, roles))
    }

    /// Converts the interaction into a routed event; unsupported kinds yield `None`.
    pub(super) fn into_inbound(self) -> Option<InboundInteraction> {
        let actor = self.actor()?;
        let interaction = InteractionRef {
            id: self.id,
            token: self.token,
            application_id: self.application_id,
        };
        let data = self.data.unwrap_or_default();
        match self.interaction_type {
            INTERACTION_TYPE_COMPONENT => {
                let message = self.message?;
                Some(InboundInteraction::Component(ComponentEvent {
                    interaction,
                    custom_id: data.custom_id?,
                    values: data.values,
                    actor,
                    channel_id: self.channel_id.unwrap_or(message.channel_id),
                    message_id: message.id,
                }))
            }
            INTERACTION_TYPE_COMMAND => {
                let options = data
                    .options
                    .into_iter()
                    .filter_map(|option| Some((option.name, option.value?)))
                    .collect();
                let resolved_member_roles = data
                    .resolved
                    .map(|resolved| {
                        resolved
                            .members
                            .into_iter()
                            .map(|(user_id, member)| (user_id, member.roles))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(InboundInteraction::Command(CommandEvent {
                    interaction,
                    name: data.name?,
                    options,
                    actor,
                    channel_id: self.channel_id.unwrap_or_default(),
                    resolved_member_roles,
                }))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct DiscordErrorBody {
    #[serde(default)]
    pub(super) code: Option<u64>,
    #[serde(default)]
    pub(super) message: Option<String>,
}

fn button_style_code(style: ButtonStyle) -> u64 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn emoji_json(emoji: Option<&String>) -> Option<Value> {
    emoji.map(|name| json!({ "name": name }))
}

pub(super) fn render_components(rows: &[ActionRow]) -> Value {
    let rows = rows
        .iter()
        .map(|row| {
            let components = match row {
                ActionRow::Buttons(buttons) => buttons
                    .iter()
                    .map(|button| {
                        let mut value = json!({
                            "type": 2,
                            "style": button_style_code(button.style),
                            "label": button.label,
                            "custom_id": button.custom_id,
                        });
                        if let Some(emoji) = emoji_json(button.emoji.as_ref()) {
                            value["emoji"] = emoji;
                        }
                        value
                    })
                    .collect::<Vec<_>>(),
                ActionRow::Select(menu) => {
                    let options = menu
                        .options
                        .iter()
                        .map(|option| {
                            let mut value = json!({
                                "label": option.label,
                                "value": option.value,
                                "default": option.default,
                            });
                            if let Some(emoji) = emoji_json(option.emoji.as_ref()) {
                                value["emoji"] = emoji;
                            }
                            value
                        })
                        .collect::<Vec<_>>();
                    vec![json!({
                        "type": 3,
                        "custom_id": menu.custom_id,
                        "placeholder": menu.placeholder,
                        "min_values": menu.min_values,
                        "max_values": menu.max_values,
                        "options": options,
                    })]
                }
            };
            json!({ "type": 1, "components": components })
        })
        .collect::<Vec<_>>();
    Value::Array(rows)
}

/// Message body for create/edit calls. Edits always send `components` so
/// stale controls are cleared.
pub(super) fn render_message_body(message: &OutboundMessage, flags: Option<u64>) -> Value {
    let mut body = Map::new();
    body.insert("content".to_string(), Value::String(message.content.clone()));
    body.insert("components".to_string(), render_components(&message.components));
    body.insert("allowed_mentions".to_string(), json!({ "parse": ["users"] }));
    if let Some(reply_to) = message.reply_to.as_ref() {
        body.insert(
            "message_reference".to_string(),
            json!({ "message_id": reply_to, "fail_if_not_exists": false }),
        );
    }
    if let Some(flags) = flags {
        body.insert("flags".to_string(), json!(flags));
    }
    Value::Object(body)
}
