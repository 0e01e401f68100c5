//! Discord REST client used for posting, thread management and interaction replies.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::discord_payloads::{
    render_message_body, DiscordChannel, DiscordErrorBody, DiscordGatewayBot, DiscordMessage,
    DiscordThreadList, EPHEMERAL_FLAG,
};
use crate::discord_helpers::{
    compare_snowflakes, is_retryable_discord_status, is_retryable_transport_error,
    parse_retry_after, retry_delay, truncate_for_error,
};
use crate::transport::{
    CaseTransport, ChatMessage, ForumTag, InteractionRef, InteractionReply, NewThread,
    OutboundMessage, PostedMessage, ThreadHandle, TransportError,
};

const UNKNOWN_CHANNEL_CODE: u64 = 10003;
const UNKNOWN_MESSAGE_CODE: u64 = 10008;
const MISSING_ACCESS_CODE: u64 = 50001;
const MESSAGE_PAGE_LIMIT: usize = 100;
const ARCHIVED_THREAD_PAGE_LIMIT: usize = 100;

const CALLBACK_CHANNEL_MESSAGE: u64 = 4;
const CALLBACK_DEFERRED_MESSAGE: u64 = 5;
const CALLBACK_DEFERRED_UPDATE: u64 = 6;
const CALLBACK_UPDATE_MESSAGE: u64 = 7;

#[derive(Clone)]
pub(super) struct DiscordApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    guild_id: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordApiClient {
    pub(super) fn new(
        api_base: String,
        bot_token: String,
        guild_id: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(
                "DiscordBot (https://github.com/casewatch/casewatch, 0.1)",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create discord api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
            guild_id: guild_id.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(
            reqwest::header::AUTHORIZATION,
            format!("Bot {}", self.bot_token),
        )
    }

    pub(super) async fn gateway_url(&self) -> Result<String> {
        let response: DiscordGatewayBot = self
            .request_json("get gateway", || {
                self.authorized(self.http.get(self.url("/gateway/bot")))
            })
            .await?;
        let url = response.url.trim();
        if url.is_empty() {
            bail!("discord get gateway did not return url");
        }
        Ok(url.to_string())
    }

    pub(super) async fn register_guild_commands(
        &self,
        application_id: &str,
        definitions: &Value,
    ) -> Result<usize> {
        let path = format!(
            "/applications/{application_id}/guilds/{}/commands",
            self.guild_id
        );
        let registered: Vec<Value> = self
            .request_json("register commands", || {
                self.authorized(self.http.put(self.url(&path)).json(definitions))
            })
            .await?;
        Ok(registered.len())
    }

    async fn active_forum_threads(&self, forum_id: &str) -> Result<Vec<DiscordChannel>> {
        let path = format!("/guilds/{}/threads/active", self.guild_id);
        let list: DiscordThreadList = self
            .request_json("list active threads", || {
                self.authorized(self.http.get(self.url(&path)))
            })
            .await?;
        Ok(list
            .threads
            .into_iter()
            .filter(|thread| thread.parent_id.as_deref() == Some(forum_id))
            .collect())
    }

    async fn archived_forum_threads(&self, forum_id: &str) -> Result<Vec<DiscordChannel>> {
        let path = format!("/channels/{forum_id}/threads/archived/public");
        let mut threads = Vec::new();
        let mut before: Option<String> = None;
        loop {
            let mut query = vec![("limit", ARCHIVED_THREAD_PAGE_LIMIT.to_string())];
            if let Some(before) = before.as_ref() {
                query.push(("before", before.clone()));
            }
            let page: DiscordThreadList = self
                .request_json("list archived threads", || {
                    self.authorized(self.http.get(self.url(&path)).query(&query))
                })
                .await?;
            let next_before = page
                .threads
                .last()
                .and_then(DiscordChannel::archive_timestamp)
                .map(|timestamp| timestamp.to_rfc3339());
            let page_len = page.threads.len();
            threads.extend(page.threads);
            match next_before {
                Some(next) if page.has_more && page_len > 0 && before.as_ref() != Some(&next) => {
                    before = Some(next);
                }
                _ => break,
            }
        }
        Ok(threads)
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<DiscordChannel> {
        let path = format!("/channels/{channel_id}");
        self.request_json("get channel", || {
            self.authorized(self.http.get(self.url(&path)))
        })
        .await
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, builder).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode discord {operation}"))
    }

    async fn request_ok<F>(&self, operation: &str, builder: F) -> Result<()>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.send_with_retry(operation, builder).await?;
        Ok(())
    }

    async fn send_with_retry<F>(&self, operation: &str, mut builder: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(
                    "x-casewatch-retry-attempt",
                    attempt.saturating_sub(1).to_string(),
                )
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_discord_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    let failure = format!(
                        "discord api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                    return match classify_missing_resource(operation, status.as_u16(), &body) {
                        Some(missing) => Err(anyhow::Error::new(missing).context(failure)),
                        None => bail!(failure),
                    };
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("discord api {operation} request failed"));
                }
            }
        }
    }
}

/// Maps "gone" answers onto [`TransportError`].
pub(super) fn classify_missing_resource(
    operation: &str,
    status: u16,
    body: &str,
) -> Option<TransportError> {
    let error_body = serde_json::from_str::<DiscordErrorBody>(body).unwrap_or_default();
    let code = error_body.code.unwrap_or(0);
    let reason = error_body
        .message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("http status {status}"));
    let operation = operation.to_string();
    match (status, code) {
        (_, UNKNOWN_CHANNEL_CODE | UNKNOWN_MESSAGE_CODE) | (404, _) => {
            Some(TransportError::NotFound {
                operation,
                code,
                reason,
            })
        }
        (_, MISSING_ACCESS_CODE) | (403, _) => Some(TransportError::Inaccessible {
            operation,
            code,
            reason,
        }),
        _ => None,
    }
}

fn interaction_callback_body(reply: &InteractionReply) -> Value {
    match reply {
        InteractionReply::Deferred { ephemeral } => {
            let mut body = json!({ "type": CALLBACK_DEFERRED_MESSAGE });
            if *ephemeral {
                body["data"] = json!({ "flags": EPHEMERAL_FLAG });
            }
            body
        }
        InteractionReply::DeferredUpdate => json!({ "type": CALLBACK_DEFERRED_UPDATE }),
        InteractionReply::Message { message, ephemeral } => json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": render_message_body(message, ephemeral.then_some(EPHEMERAL_FLAG)),
        }),
        InteractionReply::Update(message) => json!({
            "type": CALLBACK_UPDATE_MESSAGE,
            "data": render_message_body(message, None),
        }),
    }
}

#[async_trait]
impl CaseTransport for DiscordApiClient {
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<PostedMessage> {
        let path = format!("/channels/{channel_id}/messages");
        let body = render_message_body(message, None);
        let posted: DiscordMessage = self
            .request_json("create message", || {
                self.authorized(self.http.post(self.url(&path)).json(&body))
            })
            .await?;
        Ok(PostedMessage {
            id: posted.id,
            channel_id: posted.channel_id,
        })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<()> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let mut body = render_message_body(message, None);
        if let Some(object) = body.as_object_mut() {
            object.remove("message_reference");
        }
        self.request_ok("edit message", || {
            self.authorized(self.http.patch(self.url(&path)).json(&body))
        })
        .await
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        self.request_ok("delete message", || {
            self.authorized(self.http.delete(self.url(&path)))
        })
        .await
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<ChatMessage> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let message: DiscordMessage = self
            .request_json("get message", || {
                self.authorized(self.http.get(self.url(&path)))
            })
            .await?;
        Ok(message.into_chat_message())
    }

    async fn earliest_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let path = format!("/channels/{channel_id}/messages");
        let limit = limit.clamp(1, MESSAGE_PAGE_LIMIT);
        let query = [("after", "0".to_string()), ("limit", limit.to_string())];
        let mut messages: Vec<DiscordMessage> = self
            .request_json("list messages", || {
                self.authorized(self.http.get(self.url(&path)).query(&query))
            })
            .await?;
        messages.sort_by(|left, right| compare_snowflakes(&left.id, &right.id));
        messages.truncate(limit);
        Ok(messages
            .into_iter()
            .map(DiscordMessage::into_chat_message)
            .collect())
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Option<ThreadHandle>> {
        match self.fetch_channel(thread_id).await {
            Ok(channel) => Ok(Some(channel.into_thread_handle())),
            Err(error) if crate::transport::is_missing_resource(&error) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn forum_threads(&self, forum_id: &str) -> Result<Vec<ThreadHandle>> {
        let mut threads = self.active_forum_threads(forum_id).await?;
        let archived = self.archived_forum_threads(forum_id).await?;
        for thread in archived {
            if !threads.iter().any(|known| known.id == thread.id) {
                threads.push(thread);
            }
        }
        threads.sort_by(|left, right| compare_snowflakes(&left.id, &right.id));
        Ok(threads
            .into_iter()
            .map(DiscordChannel::into_thread_handle)
            .collect())
    }

    async fn forum_tags(&self, forum_id: &str) -> Result<Vec<ForumTag>> {
        Ok(self.fetch_channel(forum_id).await?.into_forum_tags())
    }

    async fn create_thread(&self, forum_id: &str, thread: &NewThread) -> Result<ThreadHandle> {
        let path = format!("/channels/{forum_id}/threads");
        let body = json!({
            "name": thread.title,
            "applied_tags": thread.tag_ids,
            "message": {
                "content": thread.body,
                "allowed_mentions": { "parse": [] },
            },
        });
        let created: DiscordChannel = self
            .request_json("create thread", || {
                self.authorized(self.http.post(self.url(&path)).json(&body))
            })
            .await?;
        Ok(created.into_thread_handle())
    }

    async fn reply_to_interaction(
        &self,
        interaction: &InteractionRef,
        reply: &InteractionReply,
    ) -> Result<()> {
        let path = format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        );
        let body = interaction_callback_body(reply);
        self.request_ok("interaction callback", || {
            self.http.post(self.url(&path)).json(&body)
        })
        .await
    }

    async fn edit_interaction_reply(
        &self,
        interaction: &InteractionRef,
        message: &OutboundMessage,
    ) -> Result<()> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            interaction.application_id, interaction.token
        );
        let body = render_message_body(message, None);
        self.request_ok("edit interaction reply", || {
            self.http.patch(self.url(&path)).json(&body)
        })
        .await
    }
}
