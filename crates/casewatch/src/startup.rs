use std::time::Duration;

use anyhow::Result;
use casewatch_access::permission_policy_path_for_state_dir;
use casewatch_cli::{
    require_cli_value, resolve_non_empty_cli_value, validate_discord_bridge_cli, Cli,
};
use casewatch_discord_runtime::{
    run_discord_bridge, DiscordBridgeRuntimeConfig, ForumLayout, ProfileExtractorConfig,
    ScannerConfig,
};

const TAG_CATALOG_FILE: &str = "tags.json";

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let config = build_runtime_config(&cli)?;
    tracing::info!(
        guild = %config.guild_id,
        intake_channel = %config.intake_channel_id,
        state_dir = %config.state_dir.display(),
        "starting casewatch discord bridge"
    );
    run_discord_bridge(config).await
}

pub(crate) fn build_runtime_config(cli: &Cli) -> Result<DiscordBridgeRuntimeConfig> {
    validate_discord_bridge_cli(cli)?;

    let state_dir = cli.state_dir.clone();
    let permissions_path = cli
        .permissions_file
        .clone()
        .unwrap_or_else(|| permission_policy_path_for_state_dir(&state_dir));
    let tag_catalog_path = cli
        .tag_catalog_file
        .clone()
        .unwrap_or_else(|| state_dir.join(TAG_CATALOG_FILE));

    Ok(DiscordBridgeRuntimeConfig {
        api_base: cli.discord_api_base.trim().to_string(),
        gateway_url: resolve_non_empty_cli_value(cli.discord_gateway_url.as_deref()),
        bot_token: require_cli_value(cli.discord_bot_token.as_deref(), "--discord-bot-token")?,
        application_id: resolve_non_empty_cli_value(cli.discord_application_id.as_deref()),
        guild_id: require_cli_value(cli.discord_guild_id.as_deref(), "--discord-guild-id")?,
        intake_channel_id: require_cli_value(
            cli.intake_channel_id.as_deref(),
            "--intake-channel-id",
        )?,
        forums: ForumLayout {
            suspect_forum_id: require_cli_value(
                cli.suspect_forum_id.as_deref(),
                "--suspect-forum-id",
            )?,
            banned_forum_id: require_cli_value(
                cli.banned_forum_id.as_deref(),
                "--banned-forum-id",
            )?,
        },
        report_channel_id: resolve_non_empty_cli_value(cli.report_channel_id.as_deref()),
        state_dir,
        permissions_path,
        tag_catalog_path,
        abandon_timeout: Duration::from_millis(cli.abandon_timeout_ms.max(1)),
        tag_selection_timeout: Duration::from_millis(cli.tag_selection_timeout_ms.max(1)),
        extractor: ProfileExtractorConfig {
            embed_wait: Duration::from_millis(cli.embed_wait_ms.max(1)),
            max_attempts: cli.embed_max_attempts.max(1),
        },
        scanner: ScannerConfig {
            batch_size: cli.scan_batch_size.max(1),
            batch_pause: Duration::from_millis(cli.scan_batch_pause_ms),
            shallow_message_limit: cli.scan_shallow_message_limit.max(1),
            deep_message_limit: cli.scan_deep_message_limit.max(1),
            similarity_threshold: cli.similarity_threshold,
        },
        scan_interval: Duration::from_secs(cli.scan_interval_seconds.max(1)),
        register_commands: cli.register_commands,
        processed_event_cap: cli.processed_event_cap.max(1),
        request_timeout_ms: cli.request_timeout_ms.max(1),
        retry_max_attempts: cli.retry_max_attempts.max(1),
        retry_base_delay_ms: cli.retry_base_delay_ms.max(1),
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms.max(1)),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use casewatch_cli::Cli;
    use clap::Parser;

    use super::build_runtime_config;

    const BRIDGE_ARGS: [&str; 11] = [
        "casewatch",
        "--discord-bot-token",
        "bot-token",
        "--discord-guild-id",
        "guild-1",
        "--intake-channel-id",
        "100",
        "--suspect-forum-id",
        "200",
        "--banned-forum-id",
        "300",
    ];

    #[test]
    fn unit_build_runtime_config_defaults_paths_into_state_dir() {
        let mut args = BRIDGE_ARGS.to_vec();
        args.extend(["--state-dir", "/var/lib/casewatch"]);
        let config = build_runtime_config(&Cli::parse_from(args)).expect("config");

        assert_eq!(
            config.permissions_path,
            PathBuf::from("/var/lib/casewatch/permissions.json")
        );
        assert_eq!(
            config.tag_catalog_path,
            PathBuf::from("/var/lib/casewatch/tags.json")
        );
        assert_eq!(config.forums.suspect_forum_id, "200");
        assert_eq!(config.forums.banned_forum_id, "300");
        assert!(config.report_channel_id.is_none());
        assert!(config.gateway_url.is_none());
        assert_eq!(config.scan_interval, Duration::from_secs(43_200));
        assert_eq!(config.abandon_timeout, Duration::from_secs(30));
    }

    #[test]
    fn functional_build_runtime_config_maps_timing_and_scanner_flags() {
        let mut args = BRIDGE_ARGS.to_vec();
        args.extend([
            "--report-channel-id",
            "400",
            "--permissions-file",
            "/etc/casewatch/permissions.json",
            "--embed-wait-ms",
            "25",
            "--scan-batch-size",
            "3",
            "--scan-batch-pause-ms",
            "0",
            "--discord-gateway-url",
            "  ",
        ]);
        let config = build_runtime_config(&Cli::parse_from(args)).expect("config");

        assert_eq!(config.report_channel_id.as_deref(), Some("400"));
        assert_eq!(
            config.permissions_path,
            PathBuf::from("/etc/casewatch/permissions.json")
        );
        assert_eq!(config.extractor.embed_wait, Duration::from_millis(25));
        assert_eq!(config.scanner.batch_size, 3);
        assert_eq!(config.scanner.batch_pause, Duration::ZERO);
        assert!(config.gateway_url.is_none());
    }

    #[test]
    fn regression_build_runtime_config_fails_without_intake_channel() {
        let cli = Cli::parse_from([
            "casewatch",
            "--discord-bot-token",
            "bot-token",
            "--discord-guild-id",
            "guild-1",
        ]);
        let Err(error) = build_runtime_config(&cli) else {
            panic!("expected a missing intake channel error");
        };
        assert_eq!(error.to_string(), "--intake-channel-id is required");
    }
}
