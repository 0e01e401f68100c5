//! Scan report rendering and in-place publishing.

use anyhow::{Context, Result};
use casewatch_records::{ReportMessages, ScanStateStore};

use crate::discord_helpers::truncate_for_error;
use crate::forum_scanner::{ForumScanSummary, ScanReport};
use crate::transport::{is_missing_resource, CaseTransport, OutboundMessage};

pub const MESSAGE_MAX_CHARS: usize = 2000;

/// Renders `report` as message-sized chunks.
pub fn render_scan_report(report: &ScanReport) -> Vec<String> {
    let mut sections = Vec::new();

    let mut header = format!(
        "# Forum scan report\n-# <t:{}:f> · {:.1}s\n**Records:** {}",
        report.started_at.timestamp(),
        report.duration.as_secs_f64(),
        report.record_count
    );
    if let Some(removed) = report.rebuilt_records {
        header.push_str(&format!("\n**Rebuild:** {removed} records cleared before scanning"));
    }
    let failed = report.total_failed();
    if failed > 0 {
        header.push_str(&format!("\n⚠️ {failed} threads could not be checked"));
    }
    sections.push(header);

    for forum in &report.forums {
        sections.extend(render_forum_sections(forum));
    }

    if !report.orphaned_threads.is_empty() {
        let mut section = format!(
            "## Removed thread references ({})",
            report.orphaned_threads.len()
        );
        for thread_id in &report.orphaned_threads {
            section.push_str(&format!("\n- `{thread_id}`"));
        }
        sections.push(section);
    }

    if !report.duplicate_threads.is_empty() {
        let mut section = format!(
            "## Players with several threads ({})",
            report.duplicate_threads.len()
        );
        for group in &report.duplicate_threads {
            let links = group
                .thread_ids
                .iter()
                .map(|id| format!("<#{id}>"))
                .collect::<Vec<_>>()
                .join(", ");
            section.push_str(&format!(
                "\n- **{}** (`{}`, {}): {links}",
                group.display_name,
                group.profile_id,
                group.case_type.as_str()
            ));
        }
        sections.push(section);
    }

    if !report.near_duplicates.is_empty() {
        let mut section = format!("## Similar names ({})", report.near_duplicates.len());
        for pair in &report.near_duplicates {
            section.push_str(&format!(
                "\n- **{}** / **{}** ({}%)",
                pair.first_name,
                pair.second_name,
                (pair.similarity * 100.0).round() as u32
            ));
        }
        sections.push(section);
    }

    split_into_chunks(&sections, MESSAGE_MAX_CHARS)
}

fn render_forum_sections(forum: &ForumScanSummary) -> Vec<String> {
    let mut sections = vec![format!(
        "## {} forum\n**Threads:** {} · **Linked:** {} ({} new) · **Unlinked:** {} · **Deleted:** {} · **Failed:** {}",
        forum.case_type.label(),
        forum.total_threads,
        forum.linked,
        forum.newly_linked,
        forum.unlinked.len(),
        forum.deleted.len(),
        forum.failed
    )];
    if !forum.unlinked.is_empty() {
        let mut section = format!("### Threads without a profile link ({})", forum.unlinked.len());
        for thread in &forum.unlinked {
            section.push_str(&format!("\n- <#{}> {}", thread.thread_id, thread.name));
        }
        sections.push(section);
    }
    if !forum.deleted.is_empty() {
        let mut section = format!("### Deleted threads ({})", forum.deleted.len());
        for thread_id in &forum.deleted {
            section.push_str(&format!("\n- `{thread_id}`"));
        }
        sections.push(section);
    }
    sections
}

/// Packs sections into chunks of at most `limit` chars, splitting oversized
/// sections by line and truncating oversized lines.
pub fn split_into_chunks(sections: &[String], limit: usize) -> Vec<String> {
    let limit = limit.max(4);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut push_piece = |piece: &str, current: &mut String| {
        let separator = if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + separator + piece.chars().count() > limit
            && !current.is_empty()
        {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
    };

    for section in sections {
        if section.chars().count() <= limit {
            push_piece(section, &mut current);
            continue;
        }
        for line in section.lines() {
            if line.chars().count() <= limit {
                push_piece(line, &mut current);
            } else {
                push_piece(&truncate_for_error(line, limit - 3), &mut current);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Publishes `chunks` to `channel_id`, reusing the messages of the previous report.
///
/// Previous messages are edited in order; a failed edit falls back to a new
/// message. Surplus previous messages are deleted. The bookkeeping in `state`
/// is updated but not saved; on a failed post it lists every message that was
/// already published plus the previous messages not yet reused.
pub async fn publish_report(
    transport: &dyn CaseTransport,
    state: &mut ScanStateStore,
    channel_id: &str,
    chunks: &[String],
) -> Result<ReportMessages> {
    let previous = match state.report_messages() {
        Some(report) if report.channel_id == channel_id => report.message_ids.clone(),
        Some(report) => {
            let stale = report.clone();
            delete_messages(transport, &stale.channel_id, &stale.message_ids).await;
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut message_ids = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let message = OutboundMessage::text(chunk.clone());
        if let Some(existing) = previous.get(index) {
            match transport.edit_message(channel_id, existing, &message).await {
                Ok(()) => {
                    message_ids.push(existing.clone());
                    continue;
                }
                Err(error) => {
                    tracing::debug!(
                        message_id = %existing,
                        error = %error,
                        "report message could not be edited; posting a new one"
                    );
                }
            }
        }
        let posted = match transport.send_message(channel_id, &message).await {
            Ok(posted) => posted,
            Err(error) => {
                // Keep what is already in the channel so the next run edits or deletes it.
                message_ids.extend(previous.iter().skip(index).cloned());
                state.set_report_messages(Some(ReportMessages {
                    channel_id: channel_id.to_string(),
                    message_ids,
                }));
                return Err(error)
                    .with_context(|| format!("failed to publish scan report to {channel_id}"));
            }
        };
        message_ids.push(posted.id);
    }

    let surplus = previous
        .iter()
        .skip(chunks.len())
        .cloned()
        .collect::<Vec<_>>();
    delete_messages(transport, channel_id, &surplus).await;

    let published = ReportMessages {
        channel_id: channel_id.to_string(),
        message_ids,
    };
    state.set_report_messages(Some(published.clone()));
    Ok(published)
}

async fn delete_messages(transport: &dyn CaseTransport, channel_id: &str, message_ids: &[String]) {
    for message_id in message_ids {
        match transport.delete_message(channel_id, message_id).await {
            Ok(()) => {}
            Err(error) if is_missing_resource(&error) => {}
            Err(error) => {
                tracing::warn!(
                    message_id = %message_id,
                    error = %error,
                    "failed to delete old report message"
                );
            }
        }
    }
}
