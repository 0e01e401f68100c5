//! Case intake: from a profile link posted in the intake channel to a filed case thread.
//!
//! A message with a profile link is checked against the reporter's capabilities
//! and the existing record. When a new case is possible the bot answers with a
//! prompt offering the case types the reporter may file; the prompt is tracked
//! as a [`PendingIntake`] until someone answers it or the abandonment timer
//! strikes it out. Answering leads through tag selection to
//! [`CaseFiler::file_case`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use casewatch_access::{Actor, CapabilitySet};
use casewatch_core::utc_now;
use casewatch_records::{CaseRecord, CaseType};
use serde_json::json;

use crate::audit_log::{record_event, JsonlEventLog};
use crate::case_filing::{
    lock_records, CaseFiler, CaseFilingOutcome, FilingRequest, MAX_CASE_TAGS,
};
use crate::component_collector::ComponentCollector;
use crate::pending_intakes::{PendingIntake, PendingIntakes};
use crate::profile_extractor::{
    fallback_display_name, match_profile_id, profile_url, ProfileExtractor,
    ProfileExtractorConfig, ProfileMatch,
};
use crate::tag_catalog::TagCatalog;
use crate::transport::{
    ActionRow, Button, ButtonStyle, CaseTransport, ChatMessage, ComponentEvent, ForumTag,
    InteractionRef, InteractionReply, OutboundMessage, SelectMenu, SelectOption,
};

const INTAKE_BUTTON_PREFIX: &str = "case";
const TAG_MENU_PREFIX: &str = "case-tags";
const ABANDONED_NOTICE: &str = "## You forgot to answer me";
const GENERIC_FAILURE_NOTICE: &str = "❌ Something went wrong while handling this report. Please try again.";

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub intake_channel_id: String,
    pub abandon_timeout: Duration,
    pub tag_selection_timeout: Duration,
    pub extractor: ProfileExtractorConfig,
}

impl IntakeConfig {
    pub fn new(intake_channel_id: impl Into<String>) -> Self {
        Self {
            intake_channel_id: intake_channel_id.into(),
            abandon_timeout: Duration::from_secs(30),
            tag_selection_timeout: Duration::from_secs(60),
            extractor: ProfileExtractorConfig::default(),
        }
    }
}

/// Shared services the intake works with.
pub struct IntakeServices {
    pub transport: Arc<dyn CaseTransport>,
    pub filer: Arc<CaseFiler>,
    pub tag_catalog: Arc<TagCatalog>,
    pub pending: Arc<PendingIntakes>,
    pub collector: Arc<ComponentCollector>,
    pub audit_log: Option<JsonlEventLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Not an intake message: wrong channel, bot author or no profile link.
    Ignored,
    PermissionDenied,
    /// The profile is banned and the reporter cannot file ban cases.
    EscalationRequired,
    ExistingCaseShown { live_thread_ids: Vec<String> },
    AwaitingTypeChoice {
        prompt_message_id: String,
        previous_threads_gone: bool,
    },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentOutcome {
    NotHandled,
    Dismissed,
    PromptExpired,
    PermissionDenied,
    TagSelectionExpired,
    AlreadyActive { live_thread_ids: Vec<String> },
    Filed { thread_id: String },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExistingCaseReview {
    NoRecord,
    EscalationRequired,
    Active {
        record: CaseRecord,
        live_thread_ids: Vec<String>,
    },
    PreviousThreadsGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntakeAction {
    File(CaseType),
    Ignore,
}

impl IntakeAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::File(case_type) => case_type.as_str(),
            Self::Ignore => "ignore",
        }
    }
}

fn intake_button_id(action: IntakeAction, profile_id: &str) -> String {
    format!("{INTAKE_BUTTON_PREFIX}:{}:{profile_id}", action.as_str())
}

fn parse_intake_button_id(custom_id: &str) -> Option<(IntakeAction, &str)> {
    let mut parts = custom_id.splitn(3, ':');
    if parts.next()? != INTAKE_BUTTON_PREFIX {
        return None;
    }
    let action = match parts.next()? {
        "ignore" => IntakeAction::Ignore,
        raw => IntakeAction::File(CaseType::parse(raw)?),
    };
    let profile_id = parts.next().filter(|id| !id.is_empty())?;
    Some((action, profile_id))
}

fn offered_case_types(capabilities: &CapabilitySet) -> Vec<CaseType> {
    CaseType::ALL
        .into_iter()
        .filter(|case_type| capabilities.allows(*case_type))
        .collect()
}

/// Drives intake prompts for the configured channel.
pub struct CaseIntake {
    config: IntakeConfig,
    transport: Arc<dyn CaseTransport>,
    filer: Arc<CaseFiler>,
    extractor: ProfileExtractor,
    tag_catalog: Arc<TagCatalog>,
    pending: Arc<PendingIntakes>,
    collector: Arc<ComponentCollector>,
    audit_log: Option<JsonlEventLog>,
}

impl CaseIntake {
    pub fn new(config: IntakeConfig, services: IntakeServices) -> Self {
        Self {
            extractor: ProfileExtractor::new(config.extractor),
            config,
            transport: services.transport,
            filer: services.filer,
            tag_catalog: services.tag_catalog,
            pending: services.pending,
            collector: services.collector,
            audit_log: services.audit_log,
        }
    }

    pub fn pending(&self) -> &PendingIntakes {
        &self.pending
    }

    /// Handles a new message; any failure turns into a notice in the channel.
    pub async fn handle_message(&self, message: &ChatMessage) -> IntakeOutcome {
        match self.process_message(message).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %error,
                    "intake failed for message"
                );
                self.notify(message, GENERIC_FAILURE_NOTICE).await;
                IntakeOutcome::Failed
            }
        }
    }

    async fn process_message(&self, message: &ChatMessage) -> Result<IntakeOutcome> {
        if message.channel_id != self.config.intake_channel_id || message.author_is_bot {
            return Ok(IntakeOutcome::Ignored);
        }
        let Some(profile_id) = match_profile_id(&message.content) else {
            return Ok(IntakeOutcome::Ignored);
        };

        let actor = message.actor();
        let capabilities = self.filer.permissions().resolve(&actor);
        if !capabilities.can_file_any() {
            tracing::info!(
                user_id = %actor.user_id,
                profile_id = %profile_id,
                "reporter has no filing capability"
            );
            self.audit("permission_denied", &profile_id, &actor.user_id);
            self.notify(message, "❌ You don't have permission to report players.")
                .await;
            return Ok(IntakeOutcome::PermissionDenied);
        }

        let previous_threads_gone = match self.review_existing(&capabilities, &profile_id).await? {
            ExistingCaseReview::NoRecord => false,
            ExistingCaseReview::PreviousThreadsGone => true,
            ExistingCaseReview::EscalationRequired => {
                self.notify(
                    message,
                    "⚠️ This player is already banned. Only staff who can file ban cases can update this case.",
                )
                .await;
                return Ok(IntakeOutcome::EscalationRequired);
            }
            ExistingCaseReview::Active {
                record,
                live_thread_ids,
            } => {
                self.notify(message, &render_existing_case(&record, &live_thread_ids))
                    .await;
                return Ok(IntakeOutcome::ExistingCaseShown { live_thread_ids });
            }
        };

        let profile = self
            .extractor
            .extract(self.transport.as_ref(), message)
            .await
            .unwrap_or_else(|| ProfileMatch {
                display_name: fallback_display_name(&profile_id),
                profile_id: profile_id.clone(),
                name_from_preview: false,
            });
        let offered_types = offered_case_types(&capabilities);
        let prompt = self
            .transport
            .send_message(
                &message.channel_id,
                &render_type_prompt(
                    &profile.display_name,
                    &profile.profile_id,
                    &offered_types,
                    previous_threads_gone,
                )
                .replying_to(message.id.clone()),
            )
            .await?;

        let registered = self.pending.register(PendingIntake {
            message_id: prompt.id.clone(),
            channel_id: prompt.channel_id.clone(),
            profile_id: profile.profile_id.clone(),
            display_name: profile.display_name.clone(),
            reporter_id: actor.user_id.clone(),
            offered_types,
            report_text: message.content.clone(),
            created_at: utc_now(),
            token: 0,
        });
        self.arm_abandonment(&registered);
        self.audit("prompt_opened", &profile.profile_id, &actor.user_id);

        Ok(IntakeOutcome::AwaitingTypeChoice {
            prompt_message_id: prompt.id,
            previous_threads_gone,
        })
    }

    async fn review_existing(
        &self,
        capabilities: &CapabilitySet,
        profile_id: &str,
    ) -> Result<ExistingCaseReview> {
        let case_type = lock_records(self.filer.records())?
            .find(profile_id)
            .map(|record| record.case_type);
        let Some(case_type) = case_type else {
            return Ok(ExistingCaseReview::NoRecord);
        };
        if case_type == CaseType::Banned && !capabilities.can_file_ban {
            return Ok(ExistingCaseReview::EscalationRequired);
        }

        let Some(reconciled) = self.filer.reconcile_threads(profile_id).await? else {
            return Ok(ExistingCaseReview::NoRecord);
        };
        if reconciled.live_thread_ids.is_empty() {
            return Ok(ExistingCaseReview::PreviousThreadsGone);
        }
        Ok(ExistingCaseReview::Active {
            record: reconciled.record,
            live_thread_ids: reconciled.live_thread_ids,
        })
    }

    fn arm_abandonment(&self, intake: &PendingIntake) {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let audit_log = self.audit_log.clone();
        let timeout = self.config.abandon_timeout;
        let intake = intake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if expire_pending_prompt(transport.as_ref(), &pending, &intake).await {
                record_event(
                    audit_log.as_ref(),
                    json!({
                        "event": "prompt_abandoned",
                        "profile_id": intake.profile_id,
                        "user_id": intake.reporter_id,
                        "timestamp": utc_now(),
                    }),
                );
            }
        });
    }

    /// Handles a button click or menu selection; failures become an ephemeral notice.
    pub async fn handle_component(&self, event: &ComponentEvent) -> ComponentOutcome {
        match self.process_component(event).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    custom_id = %event.custom_id,
                    error = %error,
                    "intake component handling failed"
                );
                self.fail_interaction(&event.interaction).await;
                ComponentOutcome::Failed
            }
        }
    }

    async fn process_component(&self, event: &ComponentEvent) -> Result<ComponentOutcome> {
        let Some((action, _profile_id)) = parse_intake_button_id(&event.custom_id) else {
            if event.custom_id.starts_with(TAG_MENU_PREFIX) {
                self.reply_ephemeral(
                    &event.interaction,
                    "⌛ This tag menu is not waiting for your answer.",
                )
                .await?;
            }
            return Ok(ComponentOutcome::NotHandled);
        };

        let capabilities = self.filer.permissions().resolve(&event.actor);
        match action {
            IntakeAction::Ignore => {
                if !capabilities.can_file_any() {
                    self.reply_ephemeral(
                        &event.interaction,
                        "❌ You don't have permission to handle reports.",
                    )
                    .await?;
                    return Ok(ComponentOutcome::PermissionDenied);
                }
                let dismissed = self.pending.take(&event.message_id);
                self.transport
                    .reply_to_interaction(&event.interaction, &InteractionReply::DeferredUpdate)
                    .await?;
                self.transport
                    .delete_message(&event.channel_id, &event.message_id)
                    .await?;
                if let Some(intake) = dismissed {
                    self.audit("prompt_dismissed", &intake.profile_id, &event.actor.user_id);
                }
                Ok(ComponentOutcome::Dismissed)
            }
            IntakeAction::File(case_type) => {
                if !capabilities.allows(case_type) {
                    self.reply_ephemeral(
                        &event.interaction,
                        &format!(
                            "❌ You don't have permission to file a {} case.",
                            case_type.as_str()
                        ),
                    )
                    .await?;
                    return Ok(ComponentOutcome::PermissionDenied);
                }
                let Some(intake) = self.pending.take(&event.message_id) else {
                    self.reply_ephemeral(&event.interaction, "⌛ This prompt has expired.")
                        .await?;
                    return Ok(ComponentOutcome::PromptExpired);
                };

                if let Err(error) = self
                    .transport
                    .reply_to_interaction(
                        &event.interaction,
                        &InteractionReply::Deferred { ephemeral: true },
                    )
                    .await
                {
                    // The prompt keeps its buttons, so it must stay claimable and expirable.
                    let restored = self.pending.register(intake);
                    self.arm_abandonment(&restored);
                    return Err(error);
                }
                self.edit_prompt(
                    &intake,
                    OutboundMessage::text(format!(
                        "# Player `{}`\n⏳ Creating {} case file...",
                        intake.display_name,
                        case_type.as_str()
                    )),
                )
                .await;

                let request = FilingRequest {
                    actor: event.actor.clone(),
                    profile_id: intake.profile_id.clone(),
                    display_name: intake.display_name.clone(),
                    case_type,
                    tag_ids: Vec::new(),
                };
                let report_text = intake.report_text.clone();
                self.select_tags_and_file(&event.interaction, request, &report_text, Some(intake))
                    .await
            }
        }
    }

    /// Files a case from the slash command; replies through `interaction`.
    pub async fn file_from_command(
        &self,
        interaction: &InteractionRef,
        actor: Actor,
        profile_id: &str,
        display_name: &str,
        case_type: CaseType,
    ) -> Result<ComponentOutcome> {
        let capabilities = self.filer.permissions().resolve(&actor);
        if !capabilities.allows(case_type) {
            self.reply_ephemeral(
                interaction,
                &format!(
                    "❌ You don't have permission to file a {} case.",
                    case_type.as_str()
                ),
            )
            .await?;
            return Ok(ComponentOutcome::PermissionDenied);
        }

        self.transport
            .reply_to_interaction(interaction, &InteractionReply::Deferred { ephemeral: true })
            .await?;
        match self.review_existing(&capabilities, profile_id).await? {
            ExistingCaseReview::EscalationRequired => {
                self.transport
                    .edit_interaction_reply(
                        interaction,
                        &OutboundMessage::text(
                            "⚠️ This player is already banned. Only staff who can file ban cases can update this case.",
                        ),
                    )
                    .await?;
                Ok(ComponentOutcome::PermissionDenied)
            }
            ExistingCaseReview::Active {
                record,
                live_thread_ids,
            } => {
                self.transport
                    .edit_interaction_reply(
                        interaction,
                        &OutboundMessage::text(render_existing_case(&record, &live_thread_ids)),
                    )
                    .await?;
                Ok(ComponentOutcome::AlreadyActive { live_thread_ids })
            }
            ExistingCaseReview::NoRecord | ExistingCaseReview::PreviousThreadsGone => {
                let request = FilingRequest {
                    actor,
                    profile_id: profile_id.to_string(),
                    display_name: display_name.to_string(),
                    case_type,
                    tag_ids: Vec::new(),
                };
                self.select_tags_and_file(interaction, request, display_name, None)
                    .await
            }
        }
    }

    async fn select_tags_and_file(
        &self,
        interaction: &InteractionRef,
        mut request: FilingRequest,
        report_text: &str,
        origin: Option<PendingIntake>,
    ) -> Result<ComponentOutcome> {
        let forum_id = self.filer.forums().forum_for(request.case_type).to_string();
        let forum_tags = self.transport.forum_tags(&forum_id).await?;
        if !forum_tags.is_empty() {
            let menu_id = format!("{TAG_MENU_PREFIX}:{}", interaction.id);
            let max_values = MAX_CASE_TAGS.min(forum_tags.len());
            let preselected = self.tag_catalog.preselected_forum_tags(
                report_text,
                request.case_type,
                &forum_tags,
                max_values,
            );
            self.transport
                .edit_interaction_reply(
                    interaction,
                    &render_tag_prompt(&menu_id, &forum_tags, &preselected, max_values),
                )
                .await?;

            let wanted_menu = menu_id.clone();
            let wanted_user = request.actor.user_id.clone();
            let selection = self
                .collector
                .await_selection(
                    move |event| {
                        event.custom_id == wanted_menu && event.actor.user_id == wanted_user
                    },
                    self.config.tag_selection_timeout,
                )
                .await;
            let Some(selection) = selection else {
                self.expire_tag_selection(interaction, &request, origin)
                    .await;
                return Ok(ComponentOutcome::TagSelectionExpired);
            };
            if let Err(error) = self
                .transport
                .reply_to_interaction(&selection.interaction, &InteractionReply::DeferredUpdate)
                .await
            {
                tracing::warn!(error = %error, "failed to acknowledge tag selection");
            }
            request.tag_ids = selection
                .values
                .iter()
                .filter(|value| forum_tags.iter().any(|tag| &tag.id == *value))
                .take(max_values)
                .cloned()
                .collect();
        }

        let outcome = match self.filer.file_case(&request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if let Some(intake) = origin.as_ref() {
                    self.edit_prompt(
                        intake,
                        OutboundMessage::text(format!(
                            "# Player `{}`\n❌ Case filing failed.",
                            intake.display_name
                        )),
                    )
                    .await;
                }
                return Err(error);
            }
        };
        match outcome {
            CaseFilingOutcome::Filed { thread, .. } => {
                self.transport
                    .edit_interaction_reply(
                        interaction,
                        &OutboundMessage::text(format!("✅ Case thread created: <#{}>", thread.id)),
                    )
                    .await?;
                if let Some(intake) = origin.as_ref() {
                    self.edit_prompt(
                        intake,
                        OutboundMessage::text(format!(
                            "# Player `{}`\n✅ {} case filed: <#{}>",
                            intake.display_name,
                            request.case_type.label(),
                            thread.id
                        )),
                    )
                    .await;
                }
                self.audit("case_filed", &request.profile_id, &request.actor.user_id);
                Ok(ComponentOutcome::Filed {
                    thread_id: thread.id,
                })
            }
            CaseFilingOutcome::AlreadyActive { live_thread_ids } => {
                let links = render_thread_links(&live_thread_ids);
                self.transport
                    .edit_interaction_reply(
                        interaction,
                        &OutboundMessage::text(format!(
                            "ℹ️ This player already has an open case:\n{links}"
                        )),
                    )
                    .await?;
                if let Some(intake) = origin.as_ref() {
                    self.edit_prompt(
                        intake,
                        OutboundMessage::text(format!(
                            "# Player `{}`\nℹ️ A case is already open:\n{links}",
                            intake.display_name
                        )),
                    )
                    .await;
                }
                Ok(ComponentOutcome::AlreadyActive { live_thread_ids })
            }
            CaseFilingOutcome::PermissionDenied { reason_code } => {
                tracing::info!(
                    user_id = %request.actor.user_id,
                    reason_code = %reason_code,
                    "case filing denied"
                );
                self.transport
                    .edit_interaction_reply(
                        interaction,
                        &OutboundMessage::text("❌ You don't have permission to file this case."),
                    )
                    .await?;
                Ok(ComponentOutcome::PermissionDenied)
            }
        }
    }

    async fn expire_tag_selection(
        &self,
        interaction: &InteractionRef,
        request: &FilingRequest,
        origin: Option<PendingIntake>,
    ) {
        if let Err(error) = self
            .transport
            .edit_interaction_reply(
                interaction,
                &OutboundMessage::text("⏰ Tag selection expired. No case was filed."),
            )
            .await
        {
            tracing::warn!(error = %error, "failed to report tag selection expiry");
        }
        self.audit(
            "tag_selection_expired",
            &request.profile_id,
            &request.actor.user_id,
        );
        let Some(intake) = origin else {
            return;
        };
        let restored = self.pending.register(intake);
        self.edit_prompt(
            &restored,
            render_type_prompt(
                &restored.display_name,
                &restored.profile_id,
                &restored.offered_types,
                false,
            ),
        )
        .await;
        self.arm_abandonment(&restored);
    }

    async fn edit_prompt(&self, intake: &PendingIntake, message: OutboundMessage) {
        if let Err(error) = self
            .transport
            .edit_message(&intake.channel_id, &intake.message_id, &message)
            .await
        {
            tracing::warn!(
                message_id = %intake.message_id,
                error = %error,
                "failed to update intake prompt"
            );
        }
    }

    async fn notify(&self, message: &ChatMessage, text: &str) {
        let notice = OutboundMessage::text(text).replying_to(message.id.clone());
        if let Err(error) = self.transport.send_message(&message.channel_id, &notice).await {
            tracing::warn!(
                channel_id = %message.channel_id,
                error = %error,
                "failed to send intake notice"
            );
        }
    }

    async fn reply_ephemeral(&self, interaction: &InteractionRef, text: &str) -> Result<()> {
        self.transport
            .reply_to_interaction(
                interaction,
                &InteractionReply::Message {
                    message: OutboundMessage::text(text),
                    ephemeral: true,
                },
            )
            .await
    }

    /// Reports a generic failure whether or not the interaction was already acknowledged.
    pub(crate) async fn fail_interaction(&self, interaction: &InteractionRef) {
        let notice = OutboundMessage::text(GENERIC_FAILURE_NOTICE);
        if self
            .transport
            .edit_interaction_reply(interaction, &notice)
            .await
            .is_ok()
        {
            return;
        }
        if let Err(error) = self.reply_ephemeral(interaction, GENERIC_FAILURE_NOTICE).await {
            tracing::warn!(error = %error, "failed to report interaction failure");
        }
    }

    fn audit(&self, event: &str, profile_id: &str, user_id: &str) {
        record_event(
            self.audit_log.as_ref(),
            json!({
                "event": event,
                "profile_id": profile_id,
                "user_id": user_id,
                "timestamp": utc_now(),
            }),
        );
    }
}

/// Strikes out a prompt nobody answered. Acts only while `intake` is still the
/// current registration for its prompt; returns whether it did.
pub async fn expire_pending_prompt(
    transport: &dyn CaseTransport,
    pending: &PendingIntakes,
    intake: &PendingIntake,
) -> bool {
    if pending
        .take_if_current(&intake.message_id, intake.token)
        .is_none()
    {
        return false;
    }

    let content = match transport
        .fetch_message(&intake.channel_id, &intake.message_id)
        .await
    {
        Ok(message) => message.content,
        Err(error) => {
            tracing::debug!(
                message_id = %intake.message_id,
                error = %error,
                "could not reload abandoned prompt; rendering it again"
            );
            render_type_prompt(
                &intake.display_name,
                &intake.profile_id,
                &intake.offered_types,
                false,
            )
            .content
        }
    };
    let struck = OutboundMessage::text(format!("~~{}~~\n{ABANDONED_NOTICE}", content.trim()));
    if let Err(error) = transport
        .edit_message(&intake.channel_id, &intake.message_id, &struck)
        .await
    {
        tracing::warn!(
            message_id = %intake.message_id,
            error = %error,
            "failed to strike abandoned prompt"
        );
    }
    tracing::info!(
        profile_id = %intake.profile_id,
        reporter_id = %intake.reporter_id,
        "intake prompt abandoned"
    );
    true
}

fn render_type_prompt(
    display_name: &str,
    profile_id: &str,
    offered_types: &[CaseType],
    previous_threads_gone: bool,
) -> OutboundMessage {
    let mut content =
        format!("# Player `{display_name}`\n-# `{profile_id}`\nWhich case should be filed?");
    if previous_threads_gone {
        content.push_str("\n-# The previous threads for this player no longer exist.");
    }

    let mut buttons = offered_types
        .iter()
        .map(|case_type| match case_type {
            CaseType::Suspect => Button {
                custom_id: intake_button_id(IntakeAction::File(CaseType::Suspect), profile_id),
                label: "Suspect".to_string(),
                emoji: Some("⚠️".to_string()),
                style: ButtonStyle::Primary,
            },
            CaseType::Banned => Button {
                custom_id: intake_button_id(IntakeAction::File(CaseType::Banned), profile_id),
                label: "Banned".to_string(),
                emoji: Some("🚫".to_string()),
                style: ButtonStyle::Danger,
            },
        })
        .collect::<Vec<_>>();
    buttons.push(Button {
        custom_id: intake_button_id(IntakeAction::Ignore, profile_id),
        label: "Ignore".to_string(),
        emoji: None,
        style: ButtonStyle::Secondary,
    });
    OutboundMessage::text(content).with_components(vec![ActionRow::Buttons(buttons)])
}

fn render_tag_prompt(
    menu_id: &str,
    forum_tags: &[ForumTag],
    preselected: &[String],
    max_values: usize,
) -> OutboundMessage {
    let options = forum_tags
        .iter()
        .map(|tag| SelectOption {
            label: tag.name.clone(),
            value: tag.id.clone(),
            emoji: tag.emoji.clone(),
            default: preselected.iter().any(|id| id == &tag.id),
        })
        .collect();
    OutboundMessage::text("Select the tags that fit this report:").with_components(vec![
        ActionRow::Select(SelectMenu {
            custom_id: menu_id.to_string(),
            placeholder: format!("Select tags (max {max_values})"),
            min_values: 1,
            max_values,
            options,
        }),
    ])
}

fn render_thread_links(thread_ids: &[String]) -> String {
    thread_ids
        .iter()
        .map(|id| format!("- <#{id}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_existing_case(record: &CaseRecord, live_thread_ids: &[String]) -> String {
    format!(
        "# Player `{}`\n**Status:** {}\n**Profile:** <{}>\n**Threads:**\n{}",
        record.display_name,
        record.case_type.label(),
        profile_url(&record.profile_id),
        render_thread_links(live_thread_ids)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_intake_button_ids_round_trip_through_parser() {
        let id = intake_button_id(IntakeAction::File(CaseType::Banned), "usr_a:b");
        assert_eq!(id, "case:banned:usr_a:b");
        assert_eq!(
            parse_intake_button_id(&id),
            Some((IntakeAction::File(CaseType::Banned), "usr_a:b"))
        );
        assert_eq!(
            parse_intake_button_id("case:ignore:usr_x"),
            Some((IntakeAction::Ignore, "usr_x"))
        );
        assert_eq!(parse_intake_button_id("case-tags:1"), None);
        assert_eq!(parse_intake_button_id("case:warn:usr_x"), None);
        assert_eq!(parse_intake_button_id("case:suspect:"), None);
    }

    #[test]
    fn unit_type_prompt_offers_only_allowed_types_plus_ignore() {
        let prompt = render_type_prompt("Alice", "usr_a", &[CaseType::Suspect], true);
        let ActionRow::Buttons(buttons) = &prompt.components[0] else {
            panic!("expected buttons");
        };
        let ids = buttons
            .iter()
            .map(|button| button.custom_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["case:suspect:usr_a", "case:ignore:usr_a"]);
        assert!(prompt.content.contains("no longer exist"));
    }

    #[test]
    fn unit_tag_prompt_marks_preselected_options() {
        let tags = vec![
            ForumTag {
                id: "1".to_string(),
                name: "Spam".to_string(),
                emoji: None,
            },
            ForumTag {
                id: "2".to_string(),
                name: "Crash".to_string(),
                emoji: Some("💥".to_string()),
            },
        ];
        let prompt = render_tag_prompt("case-tags:i1", &tags, &["2".to_string()], 2);
        let ActionRow::Select(menu) = &prompt.components[0] else {
            panic!("expected select menu");
        };
        assert_eq!(menu.min_values, 1);
        assert_eq!(menu.max_values, 2);
        assert!(!menu.options[0].default);
        assert!(menu.options[1].default);
    }
}
