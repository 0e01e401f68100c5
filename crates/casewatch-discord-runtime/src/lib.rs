//! Discord bridge runtime for the casewatch moderation bot.
//!
//! Hosts the gateway session loop, the Discord REST transport, the intake
//! flow that turns profile links into case threads, the forum scanner with its
//! published report, and the slash command handlers. Everything above the
//! transport talks to [`CaseTransport`] so flows can run against a fake.

pub mod audit_log;
pub mod case_filing;
pub mod commands;
pub mod component_collector;
mod discord_helpers;
pub mod discord_runtime;
pub mod forum_report;
pub mod forum_scanner;
pub mod intake;
pub mod pending_intakes;
pub mod profile_extractor;
pub mod tag_catalog;
pub mod transport;

pub use case_filing::{CaseFiler, CaseFilingOutcome, FilingRequest, ForumLayout};
pub use commands::{command_definitions, CaseCommands};
pub use discord_runtime::{
    build_bridge_services, run_discord_bridge, spawn_periodic_scans, BridgeServices,
    DiscordBridgeRuntimeConfig, TransportHealthSnapshot,
};
pub use forum_scanner::{ForumScanner, ScanAlreadyRunning, ScanReport, ScanRequest, ScannerConfig};
pub use intake::{CaseIntake, IntakeConfig};
pub use profile_extractor::ProfileExtractorConfig;
pub use transport::CaseTransport;
