use std::path::PathBuf;

use clap::{ArgAction, Parser};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_similarity_threshold(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse number: {error}"))?;
    if !(parsed > 0.0 && parsed <= 1.0) {
        return Err("value must be greater than 0 and at most 1".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "casewatch",
    about = "Discord moderation bot that files suspect/banned case threads and reconciles them",
    version
)]
pub struct Cli {
    #[arg(
        long = "discord-bot-token",
        env = "CASEWATCH_DISCORD_BOT_TOKEN",
        hide_env_values = true,
        help = "Discord bot token used for the gateway session and REST calls"
    )]
    pub discord_bot_token: Option<String>,

    #[arg(
        long = "discord-application-id",
        env = "CASEWATCH_DISCORD_APPLICATION_ID",
        help = "Application id for slash command registration (defaults to the id reported by READY)"
    )]
    pub discord_application_id: Option<String>,

    #[arg(
        long = "discord-guild-id",
        env = "CASEWATCH_DISCORD_GUILD_ID",
        help = "Guild whose channels, forums and commands the bot manages"
    )]
    pub discord_guild_id: Option<String>,

    #[arg(
        long = "discord-api-base",
        env = "CASEWATCH_DISCORD_API_BASE",
        default_value = "https://discord.com/api/v10",
        help = "Discord REST API base URL"
    )]
    pub discord_api_base: String,

    #[arg(
        long = "discord-gateway-url",
        env = "CASEWATCH_DISCORD_GATEWAY_URL",
        help = "Override for the gateway websocket URL (otherwise fetched from /gateway/bot)"
    )]
    pub discord_gateway_url: Option<String>,

    #[arg(
        long = "intake-channel-id",
        env = "CASEWATCH_INTAKE_CHANNEL_ID",
        help = "Channel watched for profile links"
    )]
    pub intake_channel_id: Option<String>,

    #[arg(
        long = "suspect-forum-id",
        env = "CASEWATCH_SUSPECT_FORUM_ID",
        help = "Forum channel that receives suspect case threads"
    )]
    pub suspect_forum_id: Option<String>,

    #[arg(
        long = "banned-forum-id",
        env = "CASEWATCH_BANNED_FORUM_ID",
        help = "Forum channel that receives banned case threads"
    )]
    pub banned_forum_id: Option<String>,

    #[arg(
        long = "report-channel-id",
        env = "CASEWATCH_REPORT_CHANNEL_ID",
        help = "Channel for the forum scan report; periodic scans are disabled without it"
    )]
    pub report_channel_id: Option<String>,

    #[arg(
        long = "state-dir",
        env = "CASEWATCH_STATE_DIR",
        default_value = ".casewatch",
        help = "Directory for the case store, scan cache, bridge state and intake event log"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "permissions-file",
        env = "CASEWATCH_PERMISSIONS_FILE",
        help = "Permission policy JSON (defaults to <state-dir>/permissions.json)"
    )]
    pub permissions_file: Option<PathBuf>,

    #[arg(
        long = "tag-catalog-file",
        env = "CASEWATCH_TAG_CATALOG_FILE",
        help = "Tag catalog JSON (defaults to <state-dir>/tags.json, built-in tags when missing)"
    )]
    pub tag_catalog_file: Option<PathBuf>,

    #[arg(
        long = "abandon-timeout-ms",
        env = "CASEWATCH_ABANDON_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Time an intake prompt waits for a type choice before it is abandoned"
    )]
    pub abandon_timeout_ms: u64,

    #[arg(
        long = "tag-selection-timeout-ms",
        env = "CASEWATCH_TAG_SELECTION_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "Time the tag menu waits for a selection before the prompt is restored"
    )]
    pub tag_selection_timeout_ms: u64,

    #[arg(
        long = "embed-wait-ms",
        env = "CASEWATCH_EMBED_WAIT_MS",
        default_value_t = 450,
        value_parser = parse_positive_u64,
        help = "Delay before re-reading a message for its unfurled profile embed"
    )]
    pub embed_wait_ms: u64,

    #[arg(
        long = "embed-max-attempts",
        env = "CASEWATCH_EMBED_MAX_ATTEMPTS",
        default_value_t = 2,
        value_parser = parse_positive_usize,
        help = "Maximum embed re-reads when resolving a profile display name"
    )]
    pub embed_max_attempts: usize,

    #[arg(
        long = "scan-interval-seconds",
        env = "CASEWATCH_SCAN_INTERVAL_SECONDS",
        default_value_t = 43_200,
        value_parser = parse_positive_u64,
        help = "Interval between automatic forum scans when --report-channel-id is set"
    )]
    pub scan_interval_seconds: u64,

    #[arg(
        long = "scan-batch-size",
        env = "CASEWATCH_SCAN_BATCH_SIZE",
        default_value_t = 5,
        value_parser = parse_positive_usize,
        help = "Threads inspected concurrently per scan batch"
    )]
    pub scan_batch_size: usize,

    #[arg(
        long = "scan-batch-pause-ms",
        env = "CASEWATCH_SCAN_BATCH_PAUSE_MS",
        default_value_t = 1_000,
        help = "Pause between scan batches (0 disables the pause)"
    )]
    pub scan_batch_pause_ms: u64,

    #[arg(
        long = "scan-shallow-message-limit",
        env = "CASEWATCH_SCAN_SHALLOW_MESSAGE_LIMIT",
        default_value_t = 10,
        value_parser = parse_positive_usize,
        help = "Earliest messages read from a thread before falling back to a deep read"
    )]
    pub scan_shallow_message_limit: usize,

    #[arg(
        long = "scan-deep-message-limit",
        env = "CASEWATCH_SCAN_DEEP_MESSAGE_LIMIT",
        default_value_t = 50,
        value_parser = parse_positive_usize,
        help = "Earliest messages read from a thread on the deep pass"
    )]
    pub scan_deep_message_limit: usize,

    #[arg(
        long = "similarity-threshold",
        env = "CASEWATCH_SIMILARITY_THRESHOLD",
        default_value_t = 0.8,
        value_parser = parse_similarity_threshold,
        help = "Display-name similarity above which two records are reported as near duplicates"
    )]
    pub similarity_threshold: f64,

    #[arg(
        long = "register-commands",
        env = "CASEWATCH_REGISTER_COMMANDS",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Register the guild slash commands after READY"
    )]
    pub register_commands: bool,

    #[arg(
        long = "processed-event-cap",
        env = "CASEWATCH_PROCESSED_EVENT_CAP",
        default_value_t = 10_000,
        value_parser = parse_positive_usize,
        help = "Maximum processed-event keys to retain for duplicate delivery protection"
    )]
    pub processed_event_cap: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "CASEWATCH_REQUEST_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Timeout for a single discord api request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "CASEWATCH_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable discord api failures (429/5xx/transport)"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "CASEWATCH_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay in milliseconds for discord api retries"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "reconnect-delay-ms",
        env = "CASEWATCH_RECONNECT_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Delay before reconnecting after gateway session errors"
    )]
    pub reconnect_delay_ms: u64,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{parse_positive_u64, parse_similarity_threshold, Cli};

    #[test]
    fn unit_cli_defaults_match_bridge_expectations() {
        let cli = Cli::parse_from(["casewatch"]);
        assert_eq!(cli.discord_api_base, "https://discord.com/api/v10");
        assert_eq!(cli.state_dir, PathBuf::from(".casewatch"));
        assert_eq!(cli.abandon_timeout_ms, 30_000);
        assert_eq!(cli.tag_selection_timeout_ms, 60_000);
        assert_eq!(cli.scan_interval_seconds, 43_200);
        assert_eq!(cli.scan_batch_size, 5);
        assert_eq!(cli.scan_shallow_message_limit, 10);
        assert_eq!(cli.scan_deep_message_limit, 50);
        assert!(cli.register_commands);
        assert!(cli.report_channel_id.is_none());
        assert!(cli.permissions_file.is_none());
    }

    #[test]
    fn functional_cli_accepts_discord_identifiers_and_timing_overrides() {
        let cli = Cli::parse_from([
            "casewatch",
            "--discord-bot-token",
            "token",
            "--discord-guild-id",
            "1",
            "--intake-channel-id",
            "2",
            "--suspect-forum-id",
            "3",
            "--banned-forum-id",
            "4",
            "--report-channel-id",
            "5",
            "--abandon-timeout-ms",
            "1500",
            "--register-commands",
            "false",
            "--similarity-threshold",
            "0.9",
        ]);
        assert_eq!(cli.discord_bot_token.as_deref(), Some("token"));
        assert_eq!(cli.intake_channel_id.as_deref(), Some("2"));
        assert_eq!(cli.banned_forum_id.as_deref(), Some("4"));
        assert_eq!(cli.report_channel_id.as_deref(), Some("5"));
        assert_eq!(cli.abandon_timeout_ms, 1_500);
        assert!(!cli.register_commands);
        assert!((cli.similarity_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn regression_cli_rejects_zero_retry_attempts_and_timeouts() {
        let error = Cli::try_parse_from(["casewatch", "--retry-max-attempts", "0"])
            .expect_err("zero attempts should be rejected");
        assert!(error.to_string().contains("value must be greater than 0"));

        let error = Cli::try_parse_from(["casewatch", "--tag-selection-timeout-ms", "0"])
            .expect_err("zero timeout should be rejected");
        assert!(error.to_string().contains("value must be greater than 0"));

        Cli::try_parse_from(["casewatch", "--scan-batch-pause-ms", "0"])
            .expect("zero batch pause is allowed");
    }

    #[test]
    fn unit_value_parsers_report_bounds() {
        assert_eq!(parse_positive_u64("7"), Ok(7));
        assert!(parse_positive_u64("abc")
            .expect_err("non-numeric")
            .contains("failed to parse integer"));
        assert!(parse_similarity_threshold("1.5").is_err());
        assert!(parse_similarity_threshold("0").is_err());
        assert_eq!(parse_similarity_threshold("1"), Ok(1.0));
    }
}
