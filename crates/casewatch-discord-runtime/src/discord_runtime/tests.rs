//! Tests for the Discord bridge runtime: moderation flows, gateway frames and the REST client.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use casewatch_access::{Actor, PermissionPolicy};
use casewatch_records::{
    CaseRecord, CaseRecordStore, CaseType, ScanStateStore, ThreadEntry, ThreadFiling,
};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::tempdir;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::discord_gateway::{
    event_dedup_key, gateway_connect_url, heartbeat_payload, identify_payload,
    normalize_gateway_frame, parse_gateway_message, GatewayEvent, GATEWAY_INTENTS,
};
use super::{
    build_bridge_services, route_event, BridgeServices, DiscordApiClient,
    DiscordBridgeRuntimeConfig, DiscordBridgeStateStore, InboundInteraction,
    TransportHealthSnapshot, CASE_STORE_FILE, SCAN_STATE_FILE,
};
use crate::case_filing::{CaseFilingOutcome, FilingRequest, ForumLayout};
use crate::forum_report::publish_report;
use crate::forum_scanner::{ScanAlreadyRunning, ScanRequest, ScannerConfig};
use crate::intake::{ComponentOutcome, IntakeOutcome};
use crate::profile_extractor::ProfileExtractorConfig;
use crate::transport::{
    ActionRow, CaseTransport, ChatMessage, CommandEvent, ComponentEvent, ForumTag, InteractionRef,
    InteractionReply, NewThread, OutboundMessage, PostedMessage, ThreadHandle, TransportError,
};

const INTAKE_CHANNEL: &str = "100";
const SUSPECT_FORUM: &str = "200";
const BANNED_FORUM: &str = "300";
const SUSPECT_ROLE: &str = "role-suspect";
const BAN_ROLE: &str = "role-ban";
const ADMIN_USER: &str = "u-admin";

#[derive(Debug, Clone)]
struct StoredMessage {
    message: ChatMessage,
    components: Vec<ActionRow>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    messages: Vec<StoredMessage>,
    edits: Vec<(String, OutboundMessage)>,
    deleted: Vec<String>,
    threads: BTreeMap<String, ThreadHandle>,
    forum_listing: BTreeMap<String, Vec<String>>,
    forum_tags: BTreeMap<String, Vec<ForumTag>>,
    missing: BTreeSet<String>,
    unreachable: BTreeSet<String>,
    created_threads: Vec<(String, NewThread)>,
    history_requests: Vec<(String, usize)>,
    interaction_replies: Vec<(String, InteractionReply)>,
    interaction_edits: Vec<(String, OutboundMessage)>,
    reject_deferred_replies: bool,
    send_budget: Option<usize>,
}

impl FakeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        (5_000 + self.next_id).to_string()
    }
}

#[derive(Default)]
/// In-memory chat platform. `latency` delays history reads and thread creation.
struct FakeTransport {
    state: Mutex<FakeState>,
    latency: Duration,
}

fn not_found(operation: &str) -> anyhow::Error {
    anyhow::Error::new(TransportError::NotFound {
        operation: operation.to_string(),
        code: 10003,
        reason: "Unknown Channel".to_string(),
    })
}

impl FakeTransport {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake transport state")
    }

    fn add_thread(&self, forum_id: &str, thread_id: &str, name: &str) {
        let mut state = self.lock();
        state.threads.insert(
            thread_id.to_string(),
            ThreadHandle {
                id: thread_id.to_string(),
                parent_id: Some(forum_id.to_string()),
                name: name.to_string(),
                applied_tags: Vec::new(),
                created_at: None,
            },
        );
        state
            .forum_listing
            .entry(forum_id.to_string())
            .or_default()
            .push(thread_id.to_string());
    }

    fn add_unlisted_thread(&self, parent_id: &str, thread_id: &str) {
        self.lock().threads.insert(
            thread_id.to_string(),
            ThreadHandle {
                id: thread_id.to_string(),
                parent_id: Some(parent_id.to_string()),
                name: "elsewhere".to_string(),
                applied_tags: Vec::new(),
                created_at: None,
            },
        );
    }

    fn add_message(&self, channel_id: &str, content: &str, embed_title: Option<&str>) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.messages.push(StoredMessage {
            message: ChatMessage {
                id: id.clone(),
                channel_id: channel_id.to_string(),
                author_id: "u-poster".to_string(),
                content: content.to_string(),
                embed_titles: embed_title
                    .map(|title| vec![Some(title.to_string())])
                    .unwrap_or_default(),
                ..ChatMessage::default()
            },
            components: Vec::new(),
        });
        id
    }

    fn set_forum_tags(&self, forum_id: &str, tags: Vec<ForumTag>) {
        self.lock().forum_tags.insert(forum_id.to_string(), tags);
    }

    fn reject_deferred_replies(&self, reject: bool) {
        self.lock().reject_deferred_replies = reject;
    }

    /// Lets `budget` more messages through, then fails every send.
    fn limit_sends(&self, budget: Option<usize>) {
        self.lock().send_budget = budget;
    }

    fn mark_missing(&self, channel_id: &str) {
        self.lock().missing.insert(channel_id.to_string());
    }

    fn mark_unreachable(&self, channel_id: &str) {
        self.lock().unreachable.insert(channel_id.to_string());
    }

    fn message(&self, message_id: &str) -> Option<StoredMessage> {
        self.lock()
            .messages
            .iter()
            .find(|stored| stored.message.id == message_id)
            .cloned()
    }

    fn channel_messages(&self, channel_id: &str) -> Vec<StoredMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|stored| stored.message.channel_id == channel_id)
            .cloned()
            .collect()
    }

    fn edit_count(&self) -> usize {
        self.lock().edits.len()
    }

    fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    fn created_threads(&self) -> Vec<(String, NewThread)> {
        self.lock().created_threads.clone()
    }

    fn history_requests(&self, channel_id: &str) -> Vec<usize> {
        self.lock()
            .history_requests
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, limit)| *limit)
            .collect()
    }

    fn interaction_replies(&self, interaction_id: &str) -> Vec<InteractionReply> {
        self.lock()
            .interaction_replies
            .iter()
            .filter(|(id, _)| id == interaction_id)
            .map(|(_, reply)| reply.clone())
            .collect()
    }

    fn interaction_edits(&self, interaction_id: &str) -> Vec<OutboundMessage> {
        self.lock()
            .interaction_edits
            .iter()
            .filter(|(id, _)| id == interaction_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl CaseTransport for FakeTransport {
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<PostedMessage> {
        let mut state = self.lock();
        if state.missing.contains(channel_id) {
            return Err(not_found("create message"));
        }
        if let Some(budget) = state.send_budget.as_mut() {
            if *budget == 0 {
                return Err(anyhow!("create message failed with status 500"));
            }
            *budget -= 1;
        }
        let id = state.allocate_id();
        state.messages.push(StoredMessage {
            message: ChatMessage {
                id: id.clone(),
                channel_id: channel_id.to_string(),
                author_id: "u-bot".to_string(),
                author_is_bot: true,
                content: message.content.clone(),
                ..ChatMessage::default()
            },
            components: message.components.clone(),
        });
        Ok(PostedMessage {
            id,
            channel_id: channel_id.to_string(),
        })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<()> {
        let mut state = self.lock();
        let Some(stored) = state.messages.iter_mut().find(|stored| {
            stored.message.id == message_id && stored.message.channel_id == channel_id
        }) else {
            return Err(not_found("edit message"));
        };
        stored.message.content = message.content.clone();
        stored.components = message.components.clone();
        state
            .edits
            .push((message_id.to_string(), message.clone()));
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let mut state = self.lock();
        let before = state.messages.len();
        state.messages.retain(|stored| {
            !(stored.message.id == message_id && stored.message.channel_id == channel_id)
        });
        if state.messages.len() == before {
            return Err(not_found("delete message"));
        }
        state.deleted.push(message_id.to_string());
        Ok(())
    }

    async fn fetch_message(&self, _channel_id: &str, message_id: &str) -> Result<ChatMessage> {
        self.message(message_id)
            .map(|stored| stored.message)
            .ok_or_else(|| not_found("get message"))
    }

    async fn earliest_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.lock();
        state
            .history_requests
            .push((channel_id.to_string(), limit));
        if state.missing.contains(channel_id) {
            return Err(not_found("list messages"));
        }
        if state.unreachable.contains(channel_id) {
            return Err(anyhow!("connection reset by peer"));
        }
        Ok(state
            .messages
            .iter()
            .filter(|stored| stored.message.channel_id == channel_id)
            .take(limit)
            .map(|stored| stored.message.clone())
            .collect())
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Option<ThreadHandle>> {
        let state = self.lock();
        if state.unreachable.contains(thread_id) {
            return Err(anyhow!("discord api get channel failed with status 502"));
        }
        if state.missing.contains(thread_id) {
            return Ok(None);
        }
        Ok(state.threads.get(thread_id).cloned())
    }

    async fn forum_threads(&self, forum_id: &str) -> Result<Vec<ThreadHandle>> {
        let state = self.lock();
        Ok(state
            .forum_listing
            .get(forum_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.threads.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn forum_tags(&self, forum_id: &str) -> Result<Vec<ForumTag>> {
        Ok(self
            .lock()
            .forum_tags
            .get(forum_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_thread(&self, forum_id: &str, thread: &NewThread) -> Result<ThreadHandle> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.lock();
        let id = state.allocate_id();
        let handle = ThreadHandle {
            id: id.clone(),
            parent_id: Some(forum_id.to_string()),
            name: thread.title.clone(),
            applied_tags: thread.tag_ids.clone(),
            created_at: Some(Utc::now()),
        };
        state.threads.insert(id.clone(), handle.clone());
        state
            .forum_listing
            .entry(forum_id.to_string())
            .or_default()
            .push(id.clone());
        let seed_id = state.allocate_id();
        state.messages.push(StoredMessage {
            message: ChatMessage {
                id: seed_id,
                channel_id: id,
                author_id: "u-bot".to_string(),
                author_is_bot: true,
                content: thread.body.clone(),
                ..ChatMessage::default()
            },
            components: Vec::new(),
        });
        state
            .created_threads
            .push((forum_id.to_string(), thread.clone()));
        Ok(handle)
    }

    async fn reply_to_interaction(
        &self,
        interaction: &InteractionRef,
        reply: &InteractionReply,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.reject_deferred_replies && matches!(reply, InteractionReply::Deferred { .. }) {
            return Err(anyhow!("interaction callback failed with status 500"));
        }
        state
            .interaction_replies
            .push((interaction.id.clone(), reply.clone()));
        Ok(())
    }

    async fn edit_interaction_reply(
        &self,
        interaction: &InteractionRef,
        message: &OutboundMessage,
    ) -> Result<()> {
        self.lock()
            .interaction_edits
            .push((interaction.id.clone(), message.clone()));
        Ok(())
    }
}

fn test_config(state_dir: &Path) -> DiscordBridgeRuntimeConfig {
    DiscordBridgeRuntimeConfig {
        api_base: "http://127.0.0.1:9".to_string(),
        gateway_url: None,
        bot_token: "bot-token".to_string(),
        application_id: Some("app".to_string()),
        guild_id: "guild".to_string(),
        intake_channel_id: INTAKE_CHANNEL.to_string(),
        forums: ForumLayout {
            suspect_forum_id: SUSPECT_FORUM.to_string(),
            banned_forum_id: BANNED_FORUM.to_string(),
        },
        report_channel_id: None,
        state_dir: state_dir.to_path_buf(),
        permissions_path: state_dir.join("permissions.json"),
        tag_catalog_path: state_dir.join("tags.json"),
        abandon_timeout: Duration::from_secs(30),
        tag_selection_timeout: Duration::from_secs(30),
        extractor: ProfileExtractorConfig::default(),
        scanner: ScannerConfig {
            batch_pause: Duration::from_millis(1),
            ..ScannerConfig::default()
        },
        scan_interval: Duration::from_secs(3_600),
        register_commands: false,
        processed_event_cap: 64,
        request_timeout_ms: 2_000,
        retry_max_attempts: 3,
        retry_base_delay_ms: 1,
        reconnect_delay: Duration::from_millis(10),
    }
}

fn build_services(
    config: &DiscordBridgeRuntimeConfig,
    transport: &Arc<FakeTransport>,
) -> BridgeServices {
    PermissionPolicy::new(
        [BAN_ROLE.to_string()],
        [SUSPECT_ROLE.to_string()],
        [ADMIN_USER.to_string()],
    )
    .save(&config.permissions_path)
    .expect("save permission policy");
    let transport: Arc<dyn CaseTransport> = transport.clone();
    build_bridge_services(config, transport).expect("build services")
}

fn seed_record(state_dir: &Path, profile_id: &str, case_type: CaseType, thread_ids: &[&str]) {
    let mut store = CaseRecordStore::load(state_dir.join(CASE_STORE_FILE)).expect("load store");
    let created_at = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("timestamp");
    for thread_id in thread_ids {
        store
            .record_thread(ThreadFiling {
                profile_id: profile_id.to_string(),
                display_name: profile_id.to_string(),
                overwrite_display_name: false,
                case_type,
                entry: ThreadEntry::new(*thread_id, &[], created_at),
            })
            .expect("seed record");
    }
}

fn stored_record(services: &BridgeServices, profile_id: &str) -> Option<CaseRecord> {
    services
        .filer
        .records()
        .lock()
        .expect("records")
        .find(profile_id)
        .cloned()
}

fn thread_ids(record: &CaseRecord) -> Vec<&str> {
    record
        .threads
        .iter()
        .map(|entry| entry.thread_id.as_str())
        .collect()
}

fn forum_tag(id: &str, name: &str) -> ForumTag {
    ForumTag {
        id: id.to_string(),
        name: name.to_string(),
        emoji: None,
    }
}

fn intake_message(author: &Actor, content: &str, embed_title: Option<&str>) -> ChatMessage {
    ChatMessage {
        id: "7001".to_string(),
        channel_id: INTAKE_CHANNEL.to_string(),
        guild_id: Some("guild".to_string()),
        author_id: author.user_id.clone(),
        author_is_bot: false,
        content: content.to_string(),
        embed_titles: embed_title
            .map(|title| vec![Some(title.to_string())])
            .unwrap_or_default(),
        member_role_ids: author.role_ids.clone(),
    }
}

fn component_click(
    interaction_id: &str,
    custom_id: &str,
    values: &[&str],
    actor: &Actor,
    message_id: &str,
) -> ComponentEvent {
    ComponentEvent {
        interaction: InteractionRef {
            id: interaction_id.to_string(),
            token: format!("token-{interaction_id}"),
            application_id: "app".to_string(),
        },
        custom_id: custom_id.to_string(),
        values: values.iter().map(|value| value.to_string()).collect(),
        actor: actor.clone(),
        channel_id: INTAKE_CHANNEL.to_string(),
        message_id: message_id.to_string(),
    }
}

fn button_ids(stored: &StoredMessage) -> Vec<String> {
    stored
        .components
        .iter()
        .flat_map(|row| match row {
            ActionRow::Buttons(buttons) => buttons
                .iter()
                .map(|button| button.custom_id.clone())
                .collect::<Vec<_>>(),
            ActionRow::Select(_) => Vec::new(),
        })
        .collect()
}

async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn open_prompt(services: &BridgeServices, reporter: &Actor, profile_id: &str) -> String {
    let content = format!("https://vrchat.com/home/user/{profile_id} keeps spamming the lobby");
    let outcome = services
        .intake
        .handle_message(&intake_message(reporter, &content, Some("Alice")))
        .await;
    let IntakeOutcome::AwaitingTypeChoice {
        prompt_message_id, ..
    } = outcome.clone()
    else {
        panic!("expected a type prompt, got {outcome:?}");
    };
    prompt_message_id
}

#[tokio::test]
async fn functional_suspect_reporter_files_case_through_buttons_and_tag_menu() {
    let temp = tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let transport = Arc::new(FakeTransport::default());
    transport.set_forum_tags(
        SUSPECT_FORUM,
        vec![forum_tag("801", "Spam"), forum_tag("802", "Crash")],
    );
    let services = build_services(&config, &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_ABC123").await;
    let prompt = transport.message(&prompt_id).expect("prompt posted");
    assert!(prompt.message.content.contains("Alice"));
    assert_eq!(
        button_ids(&prompt),
        vec!["case:suspect:usr_ABC123", "case:ignore:usr_ABC123"]
    );
    assert!(services.intake.pending().get(&prompt_id).is_some());

    let click = component_click("9001", "case:suspect:usr_ABC123", &[], &reporter, &prompt_id);
    let intake = Arc::clone(&services.intake);
    let filing = tokio::spawn(async move { intake.handle_component(&click).await });
    assert!(wait_until(|| services.collector.waiting() == 1).await);

    let tag_prompt = transport
        .interaction_edits("9001")
        .last()
        .cloned()
        .expect("tag prompt");
    let ActionRow::Select(menu) = &tag_prompt.components[0] else {
        panic!("expected a tag menu");
    };
    assert_eq!(menu.custom_id, "case-tags:9001");
    assert!(menu.options[0].default, "spam keyword preselects the Spam tag");
    assert!(!menu.options[1].default);

    let selection = component_click("9002", "case-tags:9001", &["801"], &reporter, "5999");
    route_event(
        &services,
        GatewayEvent::Interaction(InboundInteraction::Component(selection)),
    )
    .await;
    let outcome = filing.await.expect("filing task");
    let ComponentOutcome::Filed { thread_id } = outcome.clone() else {
        panic!("expected a filed case, got {outcome:?}");
    };

    let created = transport.created_threads();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, SUSPECT_FORUM);
    assert_eq!(created[0].1.title, "Alice");
    assert_eq!(created[0].1.tag_ids, vec!["801"]);
    assert!(created[0].1.body.contains("usr_ABC123"));
    assert!(created[0].1.body.contains("<@u-reporter>"));

    let record = stored_record(&services, "usr_ABC123").expect("record");
    assert_eq!(record.case_type, CaseType::Suspect);
    assert_eq!(record.display_name, "Alice");
    assert_eq!(thread_ids(&record), vec![thread_id.as_str()]);
    assert!(services.intake.pending().is_empty());

    let persisted =
        CaseRecordStore::load(temp.path().join(CASE_STORE_FILE)).expect("reload store");
    assert!(persisted.find("usr_ABC123").is_some());
    assert_eq!(
        transport.interaction_replies("9001"),
        vec![InteractionReply::Deferred { ephemeral: true }]
    );
    assert_eq!(
        transport.interaction_replies("9002"),
        vec![InteractionReply::DeferredUpdate]
    );
    let prompt = transport.message(&prompt_id).expect("prompt kept");
    assert!(prompt.message.content.contains("case filed"));
}

#[tokio::test]
async fn functional_reporter_without_roles_is_refused() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let stranger = Actor::new("u-stranger", Vec::new());

    let outcome = services
        .intake
        .handle_message(&intake_message(
            &stranger,
            "vrchat.com/home/user/usr_ABC123",
            None,
        ))
        .await;
    assert_eq!(outcome, IntakeOutcome::PermissionDenied);
    let notices = transport.channel_messages(INTAKE_CHANNEL);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.content.contains("permission"));
    assert!(services.intake.pending().is_empty());
}

#[tokio::test]
async fn functional_messages_outside_intake_or_without_links_are_ignored() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let mut elsewhere = intake_message(&reporter, "vrchat.com/home/user/usr_A", None);
    elsewhere.channel_id = "999".to_string();
    assert_eq!(
        services.intake.handle_message(&elsewhere).await,
        IntakeOutcome::Ignored
    );
    let no_link = intake_message(&reporter, "has anyone seen usr_A today?", None);
    assert_eq!(
        services.intake.handle_message(&no_link).await,
        IntakeOutcome::Ignored
    );
    assert!(transport.channel_messages(INTAKE_CHANNEL).is_empty());
}

#[tokio::test]
async fn functional_existing_case_with_live_thread_is_shown_instead_of_prompt() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_KNOWN", CaseType::Suspect, &["3001"]);
    let transport = Arc::new(FakeTransport::default());
    transport.add_thread(SUSPECT_FORUM, "3001", "Known");
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let outcome = services
        .intake
        .handle_message(&intake_message(
            &reporter,
            "https://vrchat.com/home/user/usr_KNOWN",
            None,
        ))
        .await;
    assert_eq!(
        outcome,
        IntakeOutcome::ExistingCaseShown {
            live_thread_ids: vec!["3001".to_string()]
        }
    );
    let notices = transport.channel_messages(INTAKE_CHANNEL);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.content.contains("<#3001>"));
    assert!(notices[0].components.is_empty());
}

#[tokio::test]
async fn regression_record_whose_threads_are_gone_is_pruned_and_reoffered() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_STALE", CaseType::Suspect, &["3002"]);
    let transport = Arc::new(FakeTransport::default());
    transport.mark_missing("3002");
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let outcome = services
        .intake
        .handle_message(&intake_message(
            &reporter,
            "https://vrchat.com/home/user/usr_STALE",
            Some("Stale Name"),
        ))
        .await;
    let IntakeOutcome::AwaitingTypeChoice {
        prompt_message_id,
        previous_threads_gone,
    } = outcome
    else {
        panic!("expected a type prompt");
    };
    assert!(previous_threads_gone);
    let prompt = transport.message(&prompt_message_id).expect("prompt");
    assert!(prompt.message.content.contains("no longer exist"));
    let record = stored_record(&services, "usr_STALE").expect("record kept");
    assert!(record.threads.is_empty());
}

#[tokio::test]
async fn functional_banned_profile_needs_ban_capability() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_BANNED", CaseType::Banned, &["3003"]);
    let transport = Arc::new(FakeTransport::default());
    transport.add_thread(BANNED_FORUM, "3003", "Banned");
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let outcome = services
        .intake
        .handle_message(&intake_message(
            &reporter,
            "https://vrchat.com/home/user/usr_BANNED",
            None,
        ))
        .await;
    assert_eq!(outcome, IntakeOutcome::EscalationRequired);
    let notices = transport.channel_messages(INTAKE_CHANNEL);
    assert!(notices[0].message.content.contains("already banned"));
}

#[tokio::test]
async fn regression_unanswered_prompt_is_struck_through_after_timeout() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.abandon_timeout = Duration::from_millis(50);
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&config, &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_SLOW").await;
    let struck = wait_until(|| {
        transport
            .message(&prompt_id)
            .map(|stored| stored.message.content.contains("You forgot to answer me"))
            .unwrap_or(false)
    })
    .await;
    assert!(struck);

    let prompt = transport.message(&prompt_id).expect("prompt");
    assert!(prompt.message.content.starts_with("~~# Player `Alice`"));
    assert!(prompt.components.is_empty());
    assert!(services.intake.pending().is_empty());

    let late_click = component_click("9101", "case:suspect:usr_SLOW", &[], &reporter, &prompt_id);
    assert_eq!(
        services.intake.handle_component(&late_click).await,
        ComponentOutcome::PromptExpired
    );
    assert!(matches!(
        transport.interaction_replies("9101").as_slice(),
        [InteractionReply::Message { ephemeral: true, .. }]
    ));
}

#[tokio::test]
async fn regression_failed_type_click_acknowledgement_keeps_prompt_expirable() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.abandon_timeout = Duration::from_millis(150);
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&config, &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_STRAND").await;
    transport.reject_deferred_replies(true);
    let click = component_click("9151", "case:suspect:usr_STRAND", &[], &reporter, &prompt_id);
    assert_eq!(
        services.intake.handle_component(&click).await,
        ComponentOutcome::Failed
    );
    assert!(services.intake.pending().get(&prompt_id).is_some());
    assert!(transport.created_threads().is_empty());

    let struck = wait_until(|| {
        transport
            .message(&prompt_id)
            .map(|stored| stored.message.content.contains("You forgot to answer me"))
            .unwrap_or(false)
    })
    .await;
    assert!(struck);
    assert!(services.intake.pending().is_empty());
    let prompt = transport.message(&prompt_id).expect("prompt");
    assert!(prompt.components.is_empty());
}

#[tokio::test]
async fn functional_type_click_is_rechecked_against_clicker_capabilities() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_FORGED").await;
    let click = component_click("9161", "case:banned:usr_FORGED", &[], &reporter, &prompt_id);
    assert_eq!(
        services.intake.handle_component(&click).await,
        ComponentOutcome::PermissionDenied
    );

    assert!(matches!(
        transport.interaction_replies("9161").as_slice(),
        [InteractionReply::Message { ephemeral: true, .. }]
    ));
    assert!(services.intake.pending().get(&prompt_id).is_some());
    assert!(transport.created_threads().is_empty());
    assert!(stored_record(&services, "usr_FORGED").is_none());
    let prompt = transport.message(&prompt_id).expect("prompt");
    assert_eq!(
        button_ids(&prompt),
        vec!["case:suspect:usr_FORGED", "case:ignore:usr_FORGED"]
    );
}

#[tokio::test]
async fn regression_filing_before_abandonment_window_survives_timer() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.abandon_timeout = Duration::from_millis(200);
    let transport = Arc::new(FakeTransport::default());
    transport.set_forum_tags(SUSPECT_FORUM, vec![forum_tag("801", "Spam")]);
    let services = build_services(&config, &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_QUICK").await;
    let click = component_click("9171", "case:suspect:usr_QUICK", &[], &reporter, &prompt_id);
    let intake = Arc::clone(&services.intake);
    let filing = tokio::spawn(async move { intake.handle_component(&click).await });
    assert!(wait_until(|| services.collector.waiting() == 1).await);

    let selection = component_click("9172", "case-tags:9171", &["801"], &reporter, "5999");
    route_event(
        &services,
        GatewayEvent::Interaction(InboundInteraction::Component(selection)),
    )
    .await;
    let outcome = filing.await.expect("filing task");
    assert!(matches!(outcome, ComponentOutcome::Filed { .. }));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let prompt = transport.message(&prompt_id).expect("prompt kept");
    assert!(prompt.message.content.contains("case filed"));
    assert!(!prompt.message.content.contains("~~"));
    assert!(!prompt.message.content.contains("You forgot to answer me"));
    assert_eq!(transport.created_threads().len(), 1);
    assert!(services.intake.pending().is_empty());
}

#[tokio::test]
async fn functional_tag_selection_timeout_restores_type_prompt() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.tag_selection_timeout = Duration::from_millis(50);
    let transport = Arc::new(FakeTransport::default());
    transport.set_forum_tags(SUSPECT_FORUM, vec![forum_tag("801", "Spam")]);
    let services = build_services(&config, &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_IDLE").await;
    let click = component_click("9201", "case:suspect:usr_IDLE", &[], &reporter, &prompt_id);
    assert_eq!(
        services.intake.handle_component(&click).await,
        ComponentOutcome::TagSelectionExpired
    );

    assert!(transport.created_threads().is_empty());
    assert!(services.intake.pending().get(&prompt_id).is_some());
    let prompt = transport.message(&prompt_id).expect("prompt");
    assert_eq!(
        button_ids(&prompt),
        vec!["case:suspect:usr_IDLE", "case:ignore:usr_IDLE"]
    );
    let last_edit = transport
        .interaction_edits("9201")
        .last()
        .cloned()
        .expect("expiry notice");
    assert!(last_edit.content.contains("Tag selection expired"));
    assert_eq!(services.collector.waiting(), 0);
}

#[tokio::test]
async fn functional_ignore_button_deletes_prompt() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let prompt_id = open_prompt(&services, &reporter, "usr_NOPE").await;
    let click = component_click("9301", "case:ignore:usr_NOPE", &[], &reporter, &prompt_id);
    assert_eq!(
        services.intake.handle_component(&click).await,
        ComponentOutcome::Dismissed
    );
    assert!(transport.message(&prompt_id).is_none());
    assert!(services.intake.pending().is_empty());
}

#[tokio::test]
async fn regression_concurrent_filings_for_one_profile_create_one_thread() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::with_latency(Duration::from_millis(50)));
    let services = build_services(&test_config(temp.path()), &transport);
    let request = FilingRequest {
        actor: Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]),
        profile_id: "usr_RACE".to_string(),
        display_name: "Racer".to_string(),
        case_type: CaseType::Suspect,
        tag_ids: Vec::new(),
    };

    let (first, second) = tokio::join!(
        services.filer.file_case(&request),
        services.filer.file_case(&request)
    );
    let outcomes = [first.expect("first filing"), second.expect("second filing")];
    let filed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CaseFilingOutcome::Filed { .. }))
        .count();
    let already_active = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CaseFilingOutcome::AlreadyActive { .. }))
        .count();
    assert_eq!((filed, already_active), (1, 1));
    assert_eq!(transport.created_threads().len(), 1);
    let record = stored_record(&services, "usr_RACE").expect("record");
    assert_eq!(record.threads.len(), 1);
}

#[tokio::test]
async fn functional_file_case_command_files_without_tag_step_when_forum_has_no_tags() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let command = CommandEvent {
        interaction: InteractionRef {
            id: "9401".to_string(),
            token: "token-9401".to_string(),
            application_id: "app".to_string(),
        },
        name: "file-case".to_string(),
        options: BTreeMap::from([
            ("profile".to_string(), json!("https://vrchat.com/home/user/usr_CMD")),
            ("type".to_string(), json!("banned")),
            ("name".to_string(), json!("Cmd Player")),
        ]),
        actor: Actor::new("u-moderator", vec![BAN_ROLE.to_string()]),
        channel_id: INTAKE_CHANNEL.to_string(),
        resolved_member_roles: BTreeMap::new(),
    };

    route_event(
        &services,
        GatewayEvent::Interaction(InboundInteraction::Command(command)),
    )
    .await;

    let created = transport.created_threads();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, BANNED_FORUM);
    assert_eq!(created[0].1.title, "Cmd Player");
    let record = stored_record(&services, "usr_CMD").expect("record");
    assert_eq!(record.case_type, CaseType::Banned);
    let last_edit = transport
        .interaction_edits("9401")
        .last()
        .cloned()
        .expect("reply");
    assert!(last_edit.content.contains("Case thread created"));
}

#[tokio::test]
async fn functional_case_search_command_replies_ephemerally() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_FINDME", CaseType::Suspect, &["3101"]);
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let command = CommandEvent {
        interaction: InteractionRef {
            id: "9501".to_string(),
            token: "token-9501".to_string(),
            application_id: "app".to_string(),
        },
        name: "case-search".to_string(),
        options: BTreeMap::from([("term".to_string(), json!("findme"))]),
        actor: Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]),
        channel_id: INTAKE_CHANNEL.to_string(),
        resolved_member_roles: BTreeMap::new(),
    };

    assert!(services.commands.handle(&command).await);
    let replies = transport.interaction_replies("9501");
    let [InteractionReply::Message { message, ephemeral }] = replies.as_slice() else {
        panic!("expected one message reply, got {replies:?}");
    };
    assert!(*ephemeral);
    assert!(message.content.contains("usr_FINDME"));
}

#[tokio::test]
async fn regression_stale_tag_menu_click_is_answered_ephemerally() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let services = build_services(&test_config(temp.path()), &transport);
    let reporter = Actor::new("u-reporter", vec![SUSPECT_ROLE.to_string()]);

    let stale = component_click("9601", "case-tags:0000", &["801"], &reporter, "5000");
    route_event(
        &services,
        GatewayEvent::Interaction(InboundInteraction::Component(stale)),
    )
    .await;
    let replies = transport.interaction_replies("9601");
    let [InteractionReply::Message { message, ephemeral }] = replies.as_slice() else {
        panic!("expected one message reply, got {replies:?}");
    };
    assert!(*ephemeral);
    assert!(message.content.contains("not waiting"));
}

#[tokio::test]
async fn functional_scan_links_profile_found_deep_in_thread_history() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    transport.add_thread(SUSPECT_FORUM, "4001", "long thread");
    for index in 1..=30 {
        if index == 23 {
            transport.add_message(
                "4001",
                "found them: https://vrchat.com/home/user/usr_DEEP",
                Some("Deep Player"),
            );
        } else {
            transport.add_message("4001", &format!("evidence {index}"), None);
        }
    }
    transport.add_thread(SUSPECT_FORUM, "4002", "no link here");
    transport.add_message("4002", "just chatter", None);
    let services = build_services(&test_config(temp.path()), &transport);

    let report = services
        .scanner
        .run(ScanRequest::default())
        .await
        .expect("scan");
    let suspect = &report.forums[0];
    assert_eq!(suspect.case_type, CaseType::Suspect);
    assert_eq!(suspect.total_threads, 2);
    assert_eq!(suspect.linked, 1);
    assert_eq!(suspect.newly_linked, 1);
    assert_eq!(suspect.unlinked.len(), 1);
    assert_eq!(suspect.unlinked[0].thread_id, "4002");
    assert_eq!(transport.history_requests("4001"), vec![10, 50]);
    assert_eq!(transport.history_requests("4002"), vec![10]);

    let record = stored_record(&services, "usr_DEEP").expect("record");
    assert_eq!(record.display_name, "Deep Player");
    assert_eq!(record.case_type, CaseType::Suspect);
    assert_eq!(thread_ids(&record), vec!["4001"]);

    let second = services
        .scanner
        .run(ScanRequest::default())
        .await
        .expect("second scan");
    assert_eq!(second.forums[0].linked, 1);
    assert_eq!(second.forums[0].newly_linked, 0);
    assert_eq!(transport.history_requests("4001"), vec![10, 50]);
}

#[tokio::test]
async fn functional_scan_prunes_threads_deleted_from_forum() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_GONE", CaseType::Suspect, &["4101"]);
    let transport = Arc::new(FakeTransport::default());
    transport.add_thread(SUSPECT_FORUM, "4101", "deleted meanwhile");
    transport.mark_missing("4101");
    let services = build_services(&test_config(temp.path()), &transport);

    let report = services
        .scanner
        .run(ScanRequest::default())
        .await
        .expect("scan");
    assert_eq!(report.forums[0].deleted, vec!["4101".to_string()]);
    assert_eq!(report.forums[0].failed, 0);
    let record = stored_record(&services, "usr_GONE").expect("record kept");
    assert!(record.threads.is_empty());
}

#[tokio::test]
async fn functional_scan_repairs_orphans_and_keeps_threads_it_cannot_reach() {
    let temp = tempdir().expect("tempdir");
    seed_record(
        temp.path(),
        "usr_ORPH",
        CaseType::Suspect,
        &["4201", "4202", "4203"],
    );
    let transport = Arc::new(FakeTransport::default());
    transport.add_unlisted_thread("999", "4202");
    transport.mark_unreachable("4203");
    let services = build_services(&test_config(temp.path()), &transport);

    let report = services
        .scanner
        .run(ScanRequest::default())
        .await
        .expect("scan");
    assert_eq!(report.orphaned_threads, vec!["4201".to_string()]);
    assert_eq!(report.orphan_probe_failures, 1);
    assert_eq!(report.total_failed(), 1);
    let record = stored_record(&services, "usr_ORPH").expect("record");
    assert_eq!(thread_ids(&record), vec!["4202", "4203"]);
}

#[tokio::test]
async fn functional_scan_report_is_edited_in_place_on_next_run() {
    let temp = tempdir().expect("tempdir");
    seed_record(temp.path(), "usr_REPORTED", CaseType::Suspect, &["4301"]);
    let transport = Arc::new(FakeTransport::default());
    transport.add_thread(SUSPECT_FORUM, "4301", "reported");
    transport.add_message("4301", "https://vrchat.com/home/user/usr_REPORTED", None);
    let services = build_services(&test_config(temp.path()), &transport);
    let request = ScanRequest {
        report_channel_id: Some("reports".to_string()),
        ..ScanRequest::default()
    };

    services.scanner.run(request.clone()).await.expect("first scan");
    let first_ids = transport
        .channel_messages("reports")
        .into_iter()
        .map(|stored| stored.message.id)
        .collect::<Vec<_>>();
    assert!(!first_ids.is_empty());
    let edits_before = transport.edit_count();

    services.scanner.run(request).await.expect("second scan");
    let second_ids = transport
        .channel_messages("reports")
        .into_iter()
        .map(|stored| stored.message.id)
        .collect::<Vec<_>>();
    assert_eq!(second_ids, first_ids);
    assert_eq!(transport.edit_count(), edits_before + first_ids.len());

    let state = ScanStateStore::load(temp.path().join(SCAN_STATE_FILE), false).expect("state");
    let published = state.report_messages().expect("bookkeeping");
    assert_eq!(published.channel_id, "reports");
    assert_eq!(published.message_ids, first_ids);

    services
        .scanner
        .run(ScanRequest {
            report_channel_id: Some("reports-2".to_string()),
            ..ScanRequest::default()
        })
        .await
        .expect("third scan");
    assert!(transport.channel_messages("reports").is_empty());
    assert_eq!(transport.deleted(), first_ids);
    assert!(!transport.channel_messages("reports-2").is_empty());
}

#[tokio::test]
async fn regression_partially_published_report_is_remembered_for_next_run() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let mut state =
        ScanStateStore::load(temp.path().join(SCAN_STATE_FILE), false).expect("state");
    let chunks = vec!["part one".to_string(), "part two".to_string(), "part three".to_string()];

    transport.limit_sends(Some(1));
    let error = publish_report(transport.as_ref(), &mut state, "400", &chunks)
        .await
        .expect_err("second chunk fails");
    assert!(error.to_string().contains("failed to publish scan report to 400"));
    let partial = state.report_messages().cloned().expect("partial bookkeeping");
    assert_eq!(partial.message_ids.len(), 1);
    assert_eq!(transport.channel_messages("400").len(), 1);

    transport.limit_sends(None);
    let published = publish_report(transport.as_ref(), &mut state, "400", &chunks)
        .await
        .expect("publish");
    assert_eq!(published.message_ids.len(), 3);
    assert_eq!(published.message_ids[0], partial.message_ids[0]);
    let posted = transport.channel_messages("400");
    assert_eq!(posted.len(), 3);
    assert_eq!(posted[0].message.content, "part one");
}

#[tokio::test]
async fn regression_second_scan_fails_fast_while_one_is_running() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::with_latency(Duration::from_millis(50)));
    transport.add_thread(SUSPECT_FORUM, "4401", "slow");
    transport.add_message("4401", "nothing to see", None);
    let services = build_services(&test_config(temp.path()), &transport);

    let (first, second) = tokio::join!(
        services.scanner.run(ScanRequest::default()),
        services.scanner.run(ScanRequest::default())
    );
    assert!(first.is_ok());
    let error = second.expect_err("second scan is rejected");
    assert!(error.downcast_ref::<ScanAlreadyRunning>().is_some());
}

#[test]
fn unit_parse_gateway_message_handles_text_binary_and_control_frames() {
    let hello = WsMessage::Text(
        json!({"op": 10, "d": {"heartbeat_interval": 41250}})
            .to_string()
            .into(),
    );
    let frame = parse_gateway_message(hello)
        .expect("parse hello")
        .expect("frame");
    assert_eq!(
        normalize_gateway_frame(frame).expect("normalize"),
        GatewayEvent::Hello {
            heartbeat_interval: Duration::from_millis(41_250)
        }
    );

    let ack = WsMessage::Binary(json!({"op": 11}).to_string().into_bytes().into());
    let frame = parse_gateway_message(ack)
        .expect("parse ack")
        .expect("frame");
    assert_eq!(
        normalize_gateway_frame(frame).expect("normalize"),
        GatewayEvent::HeartbeatAck
    );
    assert!(parse_gateway_message(WsMessage::Ping(vec![].into()))
        .expect("ping")
        .is_none());
    assert!(parse_gateway_message(WsMessage::Text("not json".to_string().into())).is_err());
}

#[test]
fn unit_normalize_gateway_frame_routes_dispatches() {
    let frame = parse_gateway_message(WsMessage::Text(
        json!({
            "op": 0,
            "s": 5,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "61",
                "channel_id": INTAKE_CHANNEL,
                "guild_id": "guild",
                "author": {"id": "u-reporter"},
                "content": "https://vrchat.com/home/user/usr_ABC123",
                "embeds": [{"title": "Alice"}],
                "member": {"roles": [SUSPECT_ROLE]}
            }
        })
        .to_string()
        .into(),
    ))
    .expect("parse")
    .expect("frame");
    assert_eq!(frame.s, Some(5));
    let GatewayEvent::MessageCreate(message) = normalize_gateway_frame(frame).expect("normalize")
    else {
        panic!("expected a message");
    };
    assert_eq!(message.first_embed_title(), Some("Alice"));
    assert_eq!(message.actor().role_ids, vec![SUSPECT_ROLE]);

    let ready = parse_gateway_message(WsMessage::Text(
        json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {"session_id": "sess", "application": {"id": "app"}}
        })
        .to_string()
        .into(),
    ))
    .expect("parse")
    .expect("frame");
    assert_eq!(
        normalize_gateway_frame(ready).expect("normalize"),
        GatewayEvent::Ready {
            application_id: Some("app".to_string()),
            session_id: "sess".to_string()
        }
    );

    let typing = parse_gateway_message(WsMessage::Text(
        json!({"op": 0, "s": 2, "t": "TYPING_START", "d": {}})
            .to_string()
            .into(),
    ))
    .expect("parse")
    .expect("frame");
    assert_eq!(
        normalize_gateway_frame(typing).expect("normalize"),
        GatewayEvent::Ignored
    );
}

#[test]
fn unit_event_dedup_keys_cover_messages_and_interactions() {
    let message = GatewayEvent::MessageCreate(ChatMessage {
        id: "61".to_string(),
        ..ChatMessage::default()
    });
    assert_eq!(event_dedup_key(&message).as_deref(), Some("message:61"));
    let click = GatewayEvent::Interaction(InboundInteraction::Component(component_click(
        "77",
        "case:ignore:usr_a",
        &[],
        &Actor::default(),
        "1",
    )));
    assert_eq!(event_dedup_key(&click).as_deref(), Some("interaction:77"));
    assert_eq!(event_dedup_key(&GatewayEvent::HeartbeatAck), None);
}

#[test]
fn unit_gateway_payloads_carry_intents_and_sequence() {
    let identify: serde_json::Value =
        serde_json::from_str(&identify_payload("bot-token")).expect("identify json");
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "bot-token");
    assert_eq!(identify["d"]["intents"], GATEWAY_INTENTS);
    assert_eq!(GATEWAY_INTENTS, 33_281);

    let heartbeat: serde_json::Value =
        serde_json::from_str(&heartbeat_payload(Some(42))).expect("heartbeat json");
    assert_eq!(heartbeat, json!({"op": 1, "d": 42}));
    let first: serde_json::Value =
        serde_json::from_str(&heartbeat_payload(None)).expect("heartbeat json");
    assert_eq!(first, json!({"op": 1, "d": null}));

    assert_eq!(
        gateway_connect_url("wss://gateway.discord.gg/"),
        "wss://gateway.discord.gg/?v=10&encoding=json"
    );
    assert_eq!(
        gateway_connect_url("wss://gateway.discord.gg/?v=10"),
        "wss://gateway.discord.gg/?v=10"
    );
}

#[test]
fn unit_state_store_caps_processed_keys_and_persists_health() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("bridge-state.json");
    let mut store = DiscordBridgeStateStore::load(path.clone(), 2).expect("load");
    assert!(store.mark_processed("message:1"));
    assert!(!store.mark_processed("message:1"));
    assert!(store.mark_processed("message:2"));
    assert!(store.mark_processed("message:3"));
    assert!(!store.contains("message:1"));
    assert!(store.contains("message:3"));

    let health = TransportHealthSnapshot {
        updated_unix_ms: 10,
        failure_streak: 2,
        last_connected_unix_ms: Some(5),
        last_error: Some("reset".to_string()),
        dispatched_events: 3,
        duplicate_events: 1,
    };
    assert!(store.update_transport_health(health.clone()));
    assert!(!store.update_transport_health(health.clone()));
    store.save().expect("save");

    let reloaded = DiscordBridgeStateStore::load(path.clone(), 2).expect("reload");
    assert!(reloaded.contains("message:2"));
    assert!(reloaded.contains("message:3"));
    assert_eq!(reloaded.transport_health(), &health);

    std::fs::write(&path, r#"{"schema_version": 99}"#).expect("write");
    assert!(DiscordBridgeStateStore::load(path, 2).is_err());
}

#[test]
fn regression_state_store_uses_shared_json_persistence() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("bridge-state.json");
    let mut store = DiscordBridgeStateStore::load(path.clone(), 4).expect("load");
    assert!(store.mark_processed("interaction:9"));
    store.save().expect("save");

    let raw = std::fs::read_to_string(&path).expect("read state");
    assert!(raw.ends_with('\n'));
    let saved = casewatch_core::read_json_file::<serde_json::Value>(&path)
        .expect("parse state")
        .expect("state exists");
    assert_eq!(saved["processed_event_keys"], json!(["interaction:9"]));

    std::fs::write(&path, "not json").expect("write");
    let Err(error) = DiscordBridgeStateStore::load(path.clone(), 4) else {
        panic!("expected a parse failure");
    };
    let rendered = format!("{error:#}");
    assert!(rendered.contains("failed to load discord bridge state"));
    assert!(rendered.contains(&format!("failed to parse {}", path.display())));
}

fn test_client(base_url: String) -> DiscordApiClient {
    DiscordApiClient::new(
        base_url,
        "bot-token".to_string(),
        "G1".to_string(),
        2_000,
        3,
        1,
    )
    .expect("client")
}

#[tokio::test]
async fn integration_discord_api_client_retries_rate_limits() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/channels/C1/messages")
            .header("authorization", "Bot bot-token")
            .header("x-casewatch-retry-attempt", "0");
        then.status(429)
            .header("retry-after", "0")
            .json_body(json!({"message": "You are being rate limited.", "retry_after": 0.0}));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/channels/C1/messages")
            .header("x-casewatch-retry-attempt", "1");
        then.status(200).json_body(json!({
            "id": "M1",
            "channel_id": "C1",
            "author": {"id": "bot", "bot": true},
            "content": "hello"
        }));
    });

    let posted = test_client(server.base_url())
        .send_message("C1", &OutboundMessage::text("hello"))
        .await
        .expect("message eventually posts");
    assert_eq!(posted.id, "M1");
    assert_eq!(posted.channel_id, "C1");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn integration_discord_api_client_reports_missing_threads_as_none() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET).path("/channels/T404");
        then.status(404)
            .json_body(json!({"message": "Unknown Channel", "code": 10003}));
    });
    let forbidden = server.mock(|when, then| {
        when.method(GET).path("/channels/T403/messages/M1");
        then.status(403)
            .json_body(json!({"message": "Missing Access", "code": 50001}));
    });

    let client = test_client(server.base_url());
    assert_eq!(client.fetch_thread("T404").await.expect("thread lookup"), None);
    let error = client
        .fetch_message("T403", "M1")
        .await
        .expect_err("inaccessible message");
    assert!(crate::transport::is_missing_resource(&error));
    assert_eq!(lookup.calls(), 1);
    assert_eq!(forbidden.calls(), 1);
}

#[tokio::test]
async fn integration_discord_api_client_reads_history_oldest_first() {
    let server = MockServer::start();
    let history = server.mock(|when, then| {
        when.method(GET)
            .path("/channels/T1/messages")
            .query_param("after", "0")
            .query_param("limit", "10");
        then.status(200).json_body(json!([
            {"id": "30", "channel_id": "T1", "author": {"id": "u"}, "content": "third"},
            {"id": "100", "channel_id": "T1", "author": {"id": "u"}, "content": "fourth"},
            {"id": "10", "channel_id": "T1", "author": {"id": "u"}, "content": "first"},
            {"id": "20", "channel_id": "T1", "author": {"id": "u"}, "content": "second"}
        ]));
    });

    let messages = test_client(server.base_url())
        .earliest_messages("T1", 10)
        .await
        .expect("history");
    let ids = messages
        .iter()
        .map(|message| message.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["10", "20", "30", "100"]);
    assert_eq!(history.calls(), 1);
}

#[tokio::test]
async fn integration_discord_api_client_merges_active_and_archived_forum_threads() {
    let server = MockServer::start();
    let active = server.mock(|when, then| {
        when.method(GET).path("/guilds/G1/threads/active");
        then.status(200).json_body(json!({
            "threads": [
                {"id": "5", "parent_id": "F1", "name": "open case"},
                {"id": "6", "parent_id": "F2", "name": "other forum"}
            ]
        }));
    });
    let archived = server.mock(|when, then| {
        when.method(GET).path("/channels/F1/threads/archived/public");
        then.status(200).json_body(json!({
            "threads": [
                {
                    "id": "3",
                    "parent_id": "F1",
                    "name": "closed case",
                    "applied_tags": ["801"],
                    "thread_metadata": {
                        "archive_timestamp": "2024-01-02T00:00:00Z",
                        "create_timestamp": "2024-01-01T00:00:00Z"
                    }
                },
                {"id": "5", "parent_id": "F1", "name": "open case"}
            ],
            "has_more": false
        }));
    });

    let threads = test_client(server.base_url())
        .forum_threads("F1")
        .await
        .expect("threads");
    let ids = threads
        .iter()
        .map(|thread| thread.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["3", "5"]);
    assert_eq!(threads[0].applied_tags, vec!["801"]);
    assert_eq!(
        threads[0].created_at,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single()
    );
    assert_eq!(active.calls(), 1);
    assert_eq!(archived.calls(), 1);
}

#[tokio::test]
async fn integration_discord_api_client_registers_guild_commands_and_edits_replies() {
    let server = MockServer::start();
    let register = server.mock(|when, then| {
        when.method(PUT)
            .path("/applications/app/guilds/G1/commands")
            .header("authorization", "Bot bot-token");
        then.status(200)
            .json_body(json!([{"id": "1"}, {"id": "2"}, {"id": "3"}]));
    });
    let edit = server.mock(|when, then| {
        when.method(PATCH)
            .path("/webhooks/app/tok/messages/@original")
            .json_body_includes(json!({"content": "done"}).to_string());
        then.status(200).json_body(json!({}));
    });

    let client = test_client(server.base_url());
    let count = client
        .register_guild_commands("app", &json!([{"name": "case-search"}]))
        .await
        .expect("register");
    assert_eq!(count, 3);
    client
        .edit_interaction_reply(
            &InteractionRef {
                id: "i1".to_string(),
                token: "tok".to_string(),
                application_id: "app".to_string(),
            },
            &OutboundMessage::text("done"),
        )
        .await
        .expect("edit reply");
    assert_eq!(register.calls(), 1);
    assert_eq!(edit.calls(), 1);
}
