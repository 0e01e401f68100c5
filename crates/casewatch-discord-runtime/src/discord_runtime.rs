//! Discord bridge runtime: gateway session loop, event routing and periodic scans.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use casewatch_access::PermissionPolicy;
use casewatch_core::current_unix_timestamp_ms;
use casewatch_records::{CaseRecordStore, ScanStateStore};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::audit_log::JsonlEventLog;
use crate::case_filing::{CaseFiler, ForumLayout};
use crate::commands::{command_definitions, CaseCommands};
use crate::component_collector::ComponentCollector;
use crate::forum_scanner::{ForumScanner, ScanAlreadyRunning, ScanRequest, ScannerConfig};
use crate::intake::{CaseIntake, IntakeConfig, IntakeServices};
use crate::pending_intakes::PendingIntakes;
use crate::profile_extractor::ProfileExtractorConfig;
use crate::tag_catalog::TagCatalog;
use crate::transport::CaseTransport;

const DISCORD_STATE_SCHEMA_VERSION: u32 = 1;

pub const CASE_STORE_FILE: &str = "cases.json";
pub const SCAN_STATE_FILE: &str = "scan-state.json";
pub const BRIDGE_STATE_FILE: &str = "bridge-state.json";
pub const INTAKE_EVENT_LOG_FILE: &str = "intake-events.jsonl";

mod discord_api_client;
mod discord_gateway;
mod discord_payloads;
mod discord_state_store;

use discord_api_client::DiscordApiClient;
use discord_gateway::{
    event_dedup_key, gateway_connect_url, heartbeat_payload, identify_payload,
    normalize_gateway_frame, parse_gateway_message, GatewayEvent,
};
use discord_payloads::InboundInteraction;
use discord_state_store::DiscordBridgeStateStore;
pub use discord_state_store::TransportHealthSnapshot;

#[derive(Clone)]
/// Runtime configuration for the Discord bridge.
pub struct DiscordBridgeRuntimeConfig {
    pub api_base: String,
    pub gateway_url: Option<String>,
    pub bot_token: String,
    pub application_id: Option<String>,
    pub guild_id: String,
    pub intake_channel_id: String,
    pub forums: ForumLayout,
    pub report_channel_id: Option<String>,
    pub state_dir: PathBuf,
    pub permissions_path: PathBuf,
    pub tag_catalog_path: PathBuf,
    pub abandon_timeout: Duration,
    pub tag_selection_timeout: Duration,
    pub extractor: ProfileExtractorConfig,
    pub scanner: ScannerConfig,
    pub scan_interval: Duration,
    pub register_commands: bool,
    pub processed_event_cap: usize,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
}

/// The moderation components wired to one transport.
pub struct BridgeServices {
    pub filer: Arc<CaseFiler>,
    pub intake: Arc<CaseIntake>,
    pub scanner: Arc<ForumScanner>,
    pub commands: Arc<CaseCommands>,
    pub collector: Arc<ComponentCollector>,
}

/// Loads the persisted state and policy files and builds the moderation components.
pub fn build_bridge_services(
    config: &DiscordBridgeRuntimeConfig,
    transport: Arc<dyn CaseTransport>,
) -> Result<BridgeServices> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;

    let records = CaseRecordStore::load(config.state_dir.join(CASE_STORE_FILE))?;
    let scan_state =
        ScanStateStore::load(config.state_dir.join(SCAN_STATE_FILE), records.is_empty())?;
    tracing::info!(
        records = records.len(),
        cached_threads = scan_state.len(),
        "case store loaded"
    );
    let records = records.shared();
    let permissions = Arc::new(PermissionPolicy::load(&config.permissions_path)?);
    let tag_catalog = Arc::new(TagCatalog::load(&config.tag_catalog_path)?);
    let audit_log = JsonlEventLog::open(config.state_dir.join(INTAKE_EVENT_LOG_FILE))?;

    let filer = Arc::new(CaseFiler::new(
        Arc::clone(&transport),
        records,
        permissions,
        config.forums.clone(),
    ));
    let collector = Arc::new(ComponentCollector::new());
    let intake = Arc::new(CaseIntake::new(
        IntakeConfig {
            intake_channel_id: config.intake_channel_id.clone(),
            abandon_timeout: config.abandon_timeout,
            tag_selection_timeout: config.tag_selection_timeout,
            extractor: config.extractor,
        },
        IntakeServices {
            transport: Arc::clone(&transport),
            filer: Arc::clone(&filer),
            tag_catalog,
            pending: Arc::new(PendingIntakes::new()),
            collector: Arc::clone(&collector),
            audit_log: Some(audit_log),
        },
    ));
    let scanner = Arc::new(ForumScanner::new(
        Arc::clone(&transport),
        filer.records().clone(),
        config.forums.clone(),
        config.scanner,
        scan_state,
    ));
    let commands = Arc::new(CaseCommands::new(
        transport,
        Arc::clone(&filer),
        Arc::clone(&scanner),
        Arc::clone(&intake),
        config.report_channel_id.clone(),
    ));

    Ok(BridgeServices {
        filer,
        intake,
        scanner,
        commands,
        collector,
    })
}

/// Routes one inbound event to the component that owns it.
async fn route_event(services: &BridgeServices, event: GatewayEvent) {
    match event {
        GatewayEvent::MessageCreate(message) => {
            let outcome = services.intake.handle_message(&message).await;
            tracing::debug!(message_id = %message.id, outcome = ?outcome, "message handled");
        }
        GatewayEvent::Interaction(InboundInteraction::Component(component)) => {
            if let Err(component) = services.collector.offer(component) {
                let outcome = services.intake.handle_component(&component).await;
                tracing::debug!(
                    custom_id = %component.custom_id,
                    outcome = ?outcome,
                    "component handled"
                );
            }
        }
        GatewayEvent::Interaction(InboundInteraction::Command(command)) => {
            if !services.commands.handle(&command).await {
                tracing::debug!(command = %command.name, "ignoring unknown slash command");
            }
        }
        _ => {}
    }
}

/// Runs a scan at startup and then every `interval`, publishing to `report_channel_id`.
pub fn spawn_periodic_scans(
    scanner: Arc<ForumScanner>,
    report_channel_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let request = ScanRequest {
                force_rescan: false,
                rebuild: false,
                report_channel_id: Some(report_channel_id.clone()),
            };
            match scanner.run(request).await {
                Ok(_) => {}
                Err(error) if error.downcast_ref::<ScanAlreadyRunning>().is_some() => {
                    tracing::info!("skipping scheduled scan; a scan is already running");
                }
                Err(error) => {
                    tracing::warn!(error = %error, "scheduled forum scan failed");
                }
            }
        }
    })
}

/// Connects to the Discord gateway and serves moderation events until shutdown.
pub async fn run_discord_bridge(config: DiscordBridgeRuntimeConfig) -> Result<()> {
    let mut runtime = DiscordBridgeRuntime::new(config).await?;
    runtime.run().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
}

struct DiscordBridgeRuntime {
    config: DiscordBridgeRuntimeConfig,
    api: Arc<DiscordApiClient>,
    services: Arc<BridgeServices>,
    state_store: DiscordBridgeStateStore,
    application_id: Option<String>,
    commands_registered: bool,
}

impl DiscordBridgeRuntime {
    async fn new(config: DiscordBridgeRuntimeConfig) -> Result<Self> {
        let api = Arc::new(DiscordApiClient::new(
            config.api_base.clone(),
            config.bot_token.clone(),
            config.guild_id.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?);
        let transport: Arc<dyn CaseTransport> = api.clone();
        let services = Arc::new(build_bridge_services(&config, transport)?);
        let state_store = DiscordBridgeStateStore::load(
            config.state_dir.join(BRIDGE_STATE_FILE),
            config.processed_event_cap,
        )?;
        let application_id = config
            .application_id
            .clone()
            .filter(|value| !value.trim().is_empty());

        Ok(Self {
            config,
            api,
            services,
            state_store,
            application_id,
            commands_registered: false,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let scan_task = self.config.report_channel_id.clone().map(|channel_id| {
            spawn_periodic_scans(
                Arc::clone(&self.services.scanner),
                channel_id,
                self.config.scan_interval,
            )
        });
        if scan_task.is_none() {
            tracing::info!("no report channel configured; scheduled scans are disabled");
        }

        let result = self.run_gateway_loop().await;
        if let Some(scan_task) = scan_task {
            scan_task.abort();
        }
        result
    }

    async fn run_gateway_loop(&mut self) -> Result<()> {
        let mut failure_streak = self.state_store.transport_health().failure_streak;
        loop {
            let gateway_url = match self.config.gateway_url.clone() {
                Some(url) => Ok(url),
                None => self.api.gateway_url().await,
            };
            let session = match gateway_url {
                Ok(url) => {
                    tracing::info!(gateway = %url, "connecting to discord gateway");
                    self.run_gateway_session(&url).await
                }
                Err(error) => Err(error),
            };

            match session {
                Ok(SessionEnd::Shutdown) => {
                    tracing::info!("discord bridge shutdown requested");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {
                    failure_streak = 0;
                    self.persist_transport_health(failure_streak, None)?;
                    tracing::info!("discord gateway asked for a reconnect");
                }
                Err(error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    self.persist_transport_health(failure_streak, Some(error.to_string()))?;
                    tracing::warn!(
                        failure_streak,
                        error = %error,
                        "discord gateway session failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("discord bridge shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn run_gateway_session(&mut self, gateway_url: &str) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(gateway_connect_url(gateway_url))
            .await
            .context("failed to connect discord gateway websocket")?;
        let (mut sink, mut source) = stream.split();

        let mut sequence: Option<u64> = None;
        let mut heartbeat_enabled = false;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(3_600));
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                _ = heartbeat.tick(), if heartbeat_enabled => {
                    if awaiting_ack {
                        bail!("discord gateway heartbeat was not acknowledged");
                    }
                    send_text(&mut sink, heartbeat_payload(sequence)).await?;
                    awaiting_ack = true;
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let message = message_result.context("failed reading discord gateway message")?;
                    let Some(frame) = parse_gateway_message(message)? else {
                        continue;
                    };
                    if let Some(value) = frame.s {
                        sequence = Some(value);
                    }
                    match normalize_gateway_frame(frame)? {
                        GatewayEvent::Hello { heartbeat_interval } => {
                            heartbeat = tokio::time::interval_at(
                                tokio::time::Instant::now() + heartbeat_interval,
                                heartbeat_interval,
                            );
                            heartbeat_enabled = true;
                            awaiting_ack = false;
                            send_text(&mut sink, identify_payload(&self.config.bot_token)).await?;
                        }
                        GatewayEvent::HeartbeatRequested => {
                            send_text(&mut sink, heartbeat_payload(sequence)).await?;
                        }
                        GatewayEvent::HeartbeatAck => {
                            awaiting_ack = false;
                        }
                        GatewayEvent::Reconnect | GatewayEvent::InvalidSession => {
                            return Ok(SessionEnd::Reconnect);
                        }
                        GatewayEvent::Ready { application_id, session_id } => {
                            self.handle_ready(application_id, &session_id).await?;
                        }
                        GatewayEvent::Ignored => {}
                        event => self.handle_inbound(event)?,
                    }
                }
            }
        }
    }

    async fn handle_ready(
        &mut self,
        application_id: Option<String>,
        session_id: &str,
    ) -> Result<()> {
        if self.application_id.is_none() {
            self.application_id = application_id;
        }
        tracing::info!(
            session_id = %session_id,
            application_id = self.application_id.as_deref().unwrap_or("unknown"),
            "discord gateway ready"
        );
        let mut health = self.state_store.transport_health().clone();
        health.last_connected_unix_ms = Some(current_unix_timestamp_ms());
        health.updated_unix_ms = current_unix_timestamp_ms();
        if self.state_store.update_transport_health(health) {
            self.state_store.save()?;
        }

        if !self.config.register_commands || self.commands_registered {
            return Ok(());
        }
        let Some(application_id) = self.application_id.clone() else {
            tracing::warn!("no application id known; slash commands were not registered");
            return Ok(());
        };
        match self
            .api
            .register_guild_commands(&application_id, &command_definitions())
            .await
        {
            Ok(count) => {
                self.commands_registered = true;
                tracing::info!(
                    count,
                    guild_id = %self.config.guild_id,
                    "slash commands registered"
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to register slash commands");
            }
        }
        Ok(())
    }

    fn handle_inbound(&mut self, event: GatewayEvent) -> Result<()> {
        let started = Instant::now();
        if let Some(key) = event_dedup_key(&event) {
            let mut health = self.state_store.transport_health().clone();
            if self.state_store.contains(&key) {
                health.duplicate_events = health.duplicate_events.saturating_add(1);
                self.state_store.update_transport_health(health);
                tracing::debug!(event_key = %key, "skipping duplicate gateway event");
                return Ok(());
            }
            self.state_store.mark_processed(&key);
            health.dispatched_events = health.dispatched_events.saturating_add(1);
            health.updated_unix_ms = current_unix_timestamp_ms();
            self.state_store.update_transport_health(health);
            self.state_store.save()?;
        }

        let services = Arc::clone(&self.services);
        tokio::spawn(async move {
            route_event(&services, event).await;
        });
        tracing::trace!(
            elapsed_us = started.elapsed().as_micros() as u64,
            "gateway event dispatched"
        );
        Ok(())
    }

    fn persist_transport_health(
        &mut self,
        failure_streak: usize,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut health = self.state_store.transport_health().clone();
        health.failure_streak = failure_streak;
        if last_error.is_some() {
            health.last_error = last_error;
        }
        health.updated_unix_ms = current_unix_timestamp_ms();
        if self.state_store.update_transport_health(health) {
            self.state_store.save()?;
        }
        Ok(())
    }
}

async fn send_text<S>(sink: &mut S, payload: String) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(WsMessage::Text(payload.into()))
        .await
        .context("failed to send discord gateway frame")
}

#[cfg(test)]
mod tests;
