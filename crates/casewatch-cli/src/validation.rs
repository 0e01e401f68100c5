use anyhow::{bail, Result};

use crate::Cli;

pub fn resolve_non_empty_cli_value(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Returns the trimmed flag value or fails naming the missing flag.
pub fn require_cli_value(value: Option<&str>, flag: &str) -> Result<String> {
    match resolve_non_empty_cli_value(value) {
        Some(value) => Ok(value),
        None => bail!("{flag} is required"),
    }
}

pub fn validate_discord_bridge_cli(cli: &Cli) -> Result<()> {
    require_cli_value(cli.discord_bot_token.as_deref(), "--discord-bot-token")?;
    require_cli_value(cli.discord_guild_id.as_deref(), "--discord-guild-id")?;
    let intake = require_cli_value(cli.intake_channel_id.as_deref(), "--intake-channel-id")?;
    let suspect = require_cli_value(cli.suspect_forum_id.as_deref(), "--suspect-forum-id")?;
    let banned = require_cli_value(cli.banned_forum_id.as_deref(), "--banned-forum-id")?;
    if suspect == banned {
        bail!("--suspect-forum-id and --banned-forum-id must name different forums");
    }
    if intake == suspect || intake == banned {
        bail!("--intake-channel-id cannot be one of the case forums");
    }
    if cli.scan_deep_message_limit < cli.scan_shallow_message_limit {
        bail!("--scan-deep-message-limit must be at least --scan-shallow-message-limit");
    }
    if cli.discord_api_base.trim().is_empty() {
        bail!("--discord-api-base cannot be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{require_cli_value, resolve_non_empty_cli_value, validate_discord_bridge_cli};
    use crate::Cli;

    fn bridge_cli(intake: &str, suspect: &str, banned: &str, extra: &[&str]) -> Cli {
        let mut args = vec![
            "casewatch",
            "--discord-bot-token",
            "token",
            "--discord-guild-id",
            "1",
            "--intake-channel-id",
            intake,
            "--suspect-forum-id",
            suspect,
            "--banned-forum-id",
            banned,
        ];
        args.extend_from_slice(extra);
        Cli::parse_from(args)
    }

    #[test]
    fn unit_resolve_non_empty_cli_value_trims_and_drops_blank() {
        assert_eq!(resolve_non_empty_cli_value(Some("  42 ")), Some("42".to_string()));
        assert_eq!(resolve_non_empty_cli_value(Some("   ")), None);
        assert_eq!(resolve_non_empty_cli_value(None), None);
        let error = require_cli_value(None, "--discord-guild-id").expect_err("missing");
        assert_eq!(error.to_string(), "--discord-guild-id is required");
    }

    #[test]
    fn functional_validate_discord_bridge_cli_accepts_complete_flags() {
        validate_discord_bridge_cli(&bridge_cli("2", "3", "4", &[]))
            .expect("complete flags validate");
    }

    #[test]
    fn regression_validate_discord_bridge_cli_rejects_shared_forum_ids() {
        let cli = bridge_cli("2", "3", "3", &[]);
        let error = validate_discord_bridge_cli(&cli).expect_err("same forum rejected");
        assert!(error.to_string().contains("must name different forums"));

        let cli = bridge_cli("4", "3", "4", &[]);
        let error = validate_discord_bridge_cli(&cli).expect_err("intake in forum rejected");
        assert!(error.to_string().contains("cannot be one of the case forums"));
    }

    #[test]
    fn regression_validate_discord_bridge_cli_requires_bot_token() {
        let cli = Cli::parse_from([
            "casewatch",
            "--discord-bot-token",
            " ",
            "--discord-guild-id",
            "1",
        ]);
        let error = validate_discord_bridge_cli(&cli).expect_err("blank token rejected");
        assert_eq!(error.to_string(), "--discord-bot-token is required");
    }

    #[test]
    fn unit_validate_discord_bridge_cli_checks_scan_message_limits() {
        let limits = [
            "--scan-shallow-message-limit",
            "20",
            "--scan-deep-message-limit",
            "10",
        ];
        let cli = bridge_cli("2", "3", "4", &limits);
        let error = validate_discord_bridge_cli(&cli).expect_err("limits rejected");
        assert!(error.to_string().contains("--scan-deep-message-limit"));
    }
}
