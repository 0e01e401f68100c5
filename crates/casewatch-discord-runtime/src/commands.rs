//! Slash command parsing, registration payloads and execution.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use casewatch_access::{Actor, CapabilitySet};
use casewatch_core::utc_now;
use casewatch_records::{
    case_statistics, near_duplicate_pairs, search_records, CaseRecord, CaseStatistics, CaseType,
    StatsPeriod, NEAR_DUPLICATE_THRESHOLD, SEARCH_RESULT_LIMIT,
};
use regex::Regex;
use serde_json::{json, Value};

use crate::case_filing::{lock_records, CaseFiler};
use crate::forum_scanner::{ForumScanner, ScanAlreadyRunning, ScanReport, ScanRequest};
use crate::intake::CaseIntake;
use crate::profile_extractor::{fallback_display_name, match_profile_id, profile_url};
use crate::transport::{CaseTransport, CommandEvent, InteractionReply, OutboundMessage};

const DUPLICATE_RESULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionsView {
    Roles,
    User { user_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseCommand {
    ScanForums {
        rescan: bool,
        rebuild: bool,
    },
    CaseStats {
        period: StatsPeriod,
    },
    CaseSearch {
        term: String,
    },
    CaseDuplicates,
    Permissions {
        view: PermissionsView,
    },
    FileCase {
        profile_id: String,
        case_type: CaseType,
        display_name: Option<String>,
    },
    Invalid {
        message: String,
    },
}

fn profile_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+$").expect("profile id regex should compile")
    })
}

/// Profile id from a link or a bare id.
pub fn parse_profile_reference(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match_profile_id(trimmed).or_else(|| {
        profile_id_pattern()
            .is_match(trimmed)
            .then(|| trimmed.to_string())
    })
}

/// Parses a command invocation; `None` for commands this bot does not own.
pub fn parse_case_command(event: &CommandEvent) -> Option<CaseCommand> {
    let parsed = match event.name.as_str() {
        "scan-forums" => CaseCommand::ScanForums {
            rescan: event.option_bool("rescan"),
            rebuild: event.option_bool("rebuild"),
        },
        "case-stats" => match event.option_str("period") {
            None => CaseCommand::CaseStats {
                period: StatsPeriod::All,
            },
            Some(raw) => match StatsPeriod::parse(raw) {
                Some(period) => CaseCommand::CaseStats { period },
                None => CaseCommand::Invalid {
                    message: "Usage: /case-stats [period: today|week|month|all]".to_string(),
                },
            },
        },
        "case-search" => match event.option_str("term") {
            Some(term) => CaseCommand::CaseSearch {
                term: term.to_string(),
            },
            None => CaseCommand::Invalid {
                message: "Usage: /case-search term:<name, id or profile link>".to_string(),
            },
        },
        "case-duplicates" => CaseCommand::CaseDuplicates,
        "permissions" => match (event.option_str("view"), event.option_str("user")) {
            (Some("roles") | None, None) => CaseCommand::Permissions {
                view: PermissionsView::Roles,
            },
            (Some("user") | None, Some(user_id)) => CaseCommand::Permissions {
                view: PermissionsView::User {
                    user_id: user_id.to_string(),
                },
            },
            _ => CaseCommand::Invalid {
                message: "Usage: /permissions view:roles | view:user user:<member>".to_string(),
            },
        },
        "file-case" => {
            let profile_id = event.option_str("profile").and_then(parse_profile_reference);
            let case_type = event.option_str("type").and_then(CaseType::parse);
            match (profile_id, case_type) {
                (Some(profile_id), Some(case_type)) => CaseCommand::FileCase {
                    profile_id,
                    case_type,
                    display_name: event.option_str("name").map(str::to_string),
                },
                _ => CaseCommand::Invalid {
                    message: "Usage: /file-case profile:<profile link or id> type:suspect|banned [name]"
                        .to_string(),
                },
            }
        }
        _ => return None,
    };
    Some(parsed)
}

/// Guild command definitions in registration order.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": "scan-forums",
            "type": 1,
            "description": "Reconcile the case forums with the case records",
            "options": [
                {"type": 5, "name": "rescan", "description": "Ignore the scanned-thread cache (admin)", "required": false},
                {"type": 5, "name": "rebuild", "description": "Clear every record and rescan (admin)", "required": false}
            ]
        },
        {
            "name": "case-stats",
            "type": 1,
            "description": "Case statistics for a period",
            "options": [
                {
                    "type": 3,
                    "name": "period",
                    "description": "Period to count",
                    "required": false,
                    "choices": [
                        {"name": "Today", "value": "today"},
                        {"name": "Last 7 days", "value": "week"},
                        {"name": "Last 30 days", "value": "month"},
                        {"name": "All time", "value": "all"}
                    ]
                }
            ]
        },
        {
            "name": "case-search",
            "type": 1,
            "description": "Find case records by name, id or profile link",
            "options": [
                {"type": 3, "name": "term", "description": "Name, id or profile link", "required": true}
            ]
        },
        {
            "name": "case-duplicates",
            "type": 1,
            "description": "List records with very similar player names"
        },
        {
            "name": "permissions",
            "type": 1,
            "description": "Show the configured filing roles or a member's capabilities",
            "options": [
                {
                    "type": 3,
                    "name": "view",
                    "description": "What to show",
                    "required": false,
                    "choices": [
                        {"name": "Roles", "value": "roles"},
                        {"name": "User", "value": "user"}
                    ]
                },
                {"type": 6, "name": "user", "description": "Member to inspect", "required": false}
            ]
        },
        {
            "name": "file-case",
            "type": 1,
            "description": "File a case without an intake message",
            "options": [
                {"type": 3, "name": "profile", "description": "Profile link or id", "required": true},
                {
                    "type": 3,
                    "name": "type",
                    "description": "Case type",
                    "required": true,
                    "choices": [
                        {"name": "Suspect", "value": "suspect"},
                        {"name": "Banned", "value": "banned"}
                    ]
                },
                {"type": 3, "name": "name", "description": "Player display name", "required": false}
            ]
        }
    ])
}

/// Executes parsed slash commands.
pub struct CaseCommands {
    transport: Arc<dyn CaseTransport>,
    filer: Arc<CaseFiler>,
    scanner: Arc<ForumScanner>,
    intake: Arc<CaseIntake>,
    report_channel_id: Option<String>,
}

impl CaseCommands {
    pub fn new(
        transport: Arc<dyn CaseTransport>,
        filer: Arc<CaseFiler>,
        scanner: Arc<ForumScanner>,
        intake: Arc<CaseIntake>,
        report_channel_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            filer,
            scanner,
            intake,
            report_channel_id,
        }
    }

    /// Runs `event` if it names one of the bot's commands. Returns whether it did.
    pub async fn handle(&self, event: &CommandEvent) -> bool {
        let Some(command) = parse_case_command(event) else {
            return false;
        };
        if let Err(error) = self.execute(event, command).await {
            tracing::warn!(
                command = %event.name,
                user_id = %event.actor.user_id,
                error = %error,
                "slash command failed"
            );
            self.intake.fail_interaction(&event.interaction).await;
        }
        true
    }

    async fn execute(&self, event: &CommandEvent, command: CaseCommand) -> Result<()> {
        let capabilities = self.filer.permissions().resolve(&event.actor);
        tracing::debug!(
            command = %event.name,
            user_id = %event.actor.user_id,
            "slash command received"
        );
        match command {
            CaseCommand::Invalid { message } => self.reply(event, &message).await,
            CaseCommand::FileCase {
                profile_id,
                case_type,
                display_name,
            } => {
                let display_name =
                    display_name.unwrap_or_else(|| fallback_display_name(&profile_id));
                self.intake
                    .file_from_command(
                        &event.interaction,
                        event.actor.clone(),
                        &profile_id,
                        &display_name,
                        case_type,
                    )
                    .await?;
                Ok(())
            }
            _ if !capabilities.can_file_any() => {
                self.reply(event, "❌ You don't have permission to use this command.")
                    .await
            }
            CaseCommand::ScanForums { rescan, rebuild } => {
                if (rescan || rebuild) && !capabilities.is_admin {
                    return self
                        .reply(event, "❌ Only administrators can force a rescan or rebuild.")
                        .await;
                }
                self.transport
                    .reply_to_interaction(
                        &event.interaction,
                        &InteractionReply::Deferred { ephemeral: true },
                    )
                    .await?;
                let request = ScanRequest {
                    force_rescan: rescan,
                    rebuild,
                    report_channel_id: self.report_channel_id.clone(),
                };
                let text = match self.scanner.run(request).await {
                    Ok(report) => render_scan_summary(&report),
                    Err(error) if error.downcast_ref::<ScanAlreadyRunning>().is_some() => {
                        "⏳ A forum scan is already running.".to_string()
                    }
                    Err(error) => return Err(error),
                };
                self.transport
                    .edit_interaction_reply(&event.interaction, &OutboundMessage::text(text))
                    .await
            }
            CaseCommand::CaseStats { period } => {
                let stats = {
                    let records = lock_records(self.filer.records())?;
                    case_statistics(records.all(), period, utc_now())
                };
                let tag_names = self.forum_tag_names().await;
                self.reply(event, &render_case_statistics(&stats, &tag_names))
                    .await
            }
            CaseCommand::CaseSearch { term } => {
                let needle = parse_profile_reference(&term).unwrap_or(term);
                let text = {
                    let records = lock_records(self.filer.records())?;
                    render_search_results(&needle, &search_records(records.all(), &needle))
                };
                self.reply(event, &text).await
            }
            CaseCommand::CaseDuplicates => {
                let text = {
                    let records = lock_records(self.filer.records())?;
                    render_duplicate_names(records.all())
                };
                self.reply(event, &text).await
            }
            CaseCommand::Permissions { view } => {
                let text = match view {
                    PermissionsView::Roles => render_permission_roles(self.filer.permissions()),
                    PermissionsView::User { user_id } => {
                        let roles = event
                            .resolved_member_roles
                            .get(&user_id)
                            .cloned()
                            .unwrap_or_default();
                        let actor = Actor::new(user_id.clone(), roles);
                        render_user_capabilities(
                            &user_id,
                            &self.filer.permissions().resolve(&actor),
                        )
                    }
                };
                self.reply(event, &text).await
            }
        }
    }

    /// Tag id to name across both forums; unreadable forums are skipped.
    async fn forum_tag_names(&self) -> BTreeMap<String, String> {
        let mut names = BTreeMap::new();
        for case_type in CaseType::ALL {
            let forum_id = self.filer.forums().forum_for(case_type);
            match self.transport.forum_tags(forum_id).await {
                Ok(tags) => names.extend(tags.into_iter().map(|tag| (tag.id, tag.name))),
                Err(error) => {
                    tracing::warn!(
                        forum_id = %forum_id,
                        error = %error,
                        "failed to read forum tags"
                    );
                }
            }
        }
        names
    }

    async fn reply(&self, event: &CommandEvent, text: &str) -> Result<()> {
        self.transport
            .reply_to_interaction(
                &event.interaction,
                &InteractionReply::Message {
                    message: OutboundMessage::text(text),
                    ephemeral: true,
                },
            )
            .await
    }
}

fn render_scan_summary(report: &ScanReport) -> String {
    let mut lines = vec!["✅ Forum scan finished.".to_string()];
    if report.rebuilt_records.is_some() {
        lines.push(format!("Database rebuilt with {} records.", report.record_count));
    } else {
        lines.push(format!("Records: {}", report.record_count));
    }
    for forum in &report.forums {
        lines.push(format!(
            "{}: {} threads, {} new links, {} unlinked, {} deleted",
            forum.case_type.label(),
            forum.total_threads,
            forum.newly_linked,
            forum.unlinked.len(),
            forum.deleted.len()
        ));
    }
    let failed = report.total_failed();
    if failed > 0 {
        lines.push(format!("⚠️ {failed} threads could not be checked."));
    }
    lines.join("\n")
}

fn render_case_statistics(stats: &CaseStatistics, tag_names: &BTreeMap<String, String>) -> String {
    let mut text = format!(
        "# Case statistics ({})\n**Total:** {}\n**Suspects:** {}\n**Banned:** {}\n**Banned/suspect ratio:** {}%",
        stats.period.label(),
        stats.total,
        stats.suspects,
        stats.banned,
        stats.banned_ratio_percent()
    );
    if !stats.top_tags.is_empty() {
        text.push_str("\n**Top tags:**");
        for (tag_id, count) in &stats.top_tags {
            let name = tag_names.get(tag_id).map(String::as_str).unwrap_or(tag_id);
            text.push_str(&format!("\n- {name}: {count}"));
        }
    }
    text
}

fn render_search_results(term: &str, matches: &[&CaseRecord]) -> String {
    if matches.is_empty() {
        return format!("No case records match `{term}`.");
    }
    let mut text = format!("# Results for `{term}`");
    for record in matches.iter().take(SEARCH_RESULT_LIMIT) {
        let threads = record
            .threads
            .iter()
            .map(|entry| format!("<#{}>", entry.thread_id))
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&format!(
            "\n**{}** · {} · `{}`\n<{}>\n{}",
            record.display_name,
            record.case_type.label(),
            record.profile_id,
            profile_url(&record.profile_id),
            if threads.is_empty() {
                "No live threads".to_string()
            } else {
                threads
            }
        ));
    }
    if matches.len() > SEARCH_RESULT_LIMIT {
        text.push_str(&format!(
            "\n-# {} more results not shown",
            matches.len() - SEARCH_RESULT_LIMIT
        ));
    }
    text
}

fn render_duplicate_names(records: &[CaseRecord]) -> String {
    let pairs = near_duplicate_pairs(records, NEAR_DUPLICATE_THRESHOLD);
    if pairs.is_empty() {
        return "No similar player names found.".to_string();
    }
    let mut text = format!("# Similar player names ({})", pairs.len());
    for pair in pairs.iter().take(DUPLICATE_RESULT_LIMIT) {
        text.push_str(&format!(
            "\n- **{}** (`{}`) / **{}** (`{}`): {}%",
            pair.first_name,
            pair.first_profile_id,
            pair.second_name,
            pair.second_profile_id,
            (pair.similarity * 100.0).round() as u32
        ));
    }
    text
}

fn render_role_list<'a>(roles: impl Iterator<Item = &'a str>) -> String {
    let mentions = roles.map(|role| format!("<@&{role}>")).collect::<Vec<_>>();
    if mentions.is_empty() {
        "none".to_string()
    } else {
        mentions.join(", ")
    }
}

fn render_permission_roles(policy: &casewatch_access::PermissionPolicy) -> String {
    let admins = policy
        .admin_users()
        .map(|user| format!("<@{user}>"))
        .collect::<Vec<_>>();
    format!(
        "# Filing permissions\n**Ban roles:** {}\n**Suspect roles:** {}\n**Admins:** {}",
        render_role_list(policy.ban_roles()),
        render_role_list(policy.suspect_roles()),
        if admins.is_empty() {
            "none".to_string()
        } else {
            admins.join(", ")
        }
    )
}

fn render_user_capabilities(user_id: &str, capabilities: &CapabilitySet) -> String {
    let mark = |allowed: bool| if allowed { "✅" } else { "❌" };
    format!(
        "# Permissions for <@{user_id}>\n{} File suspect cases\n{} File ban cases\n{} Administrator",
        mark(capabilities.can_file_suspect),
        mark(capabilities.can_file_ban),
        mark(capabilities.is_admin)
    )
}
