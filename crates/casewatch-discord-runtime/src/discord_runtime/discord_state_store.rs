use std::{collections::HashSet, path::PathBuf};

use anyhow::{bail, Context, Result};
use casewatch_core::{read_json_file, write_json_atomic};
use serde::{Deserialize, Serialize};

use super::DISCORD_STATE_SCHEMA_VERSION;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Last observed gateway health, persisted for operators.
pub struct TransportHealthSnapshot {
    pub updated_unix_ms: u64,
    pub failure_streak: usize,
    pub last_connected_unix_ms: Option<u64>,
    pub last_error: Option<String>,
    pub dispatched_events: u64,
    pub duplicate_events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiscordBridgeState {
    schema_version: u32,
    #[serde(default)]
    processed_event_keys: Vec<String>,
    #[serde(default)]
    health: TransportHealthSnapshot,
}

impl Default for DiscordBridgeState {
    fn default() -> Self {
        Self {
            schema_version: DISCORD_STATE_SCHEMA_VERSION,
            processed_event_keys: Vec::new(),
            health: TransportHealthSnapshot::default(),
        }
    }
}

/// Processed gateway event keys (bounded) and transport health.
pub(super) struct DiscordBridgeStateStore {
    path: PathBuf,
    cap: usize,
    state: DiscordBridgeState,
    processed_index: HashSet<String>,
}

impl DiscordBridgeStateStore {
    pub(super) fn load(path: PathBuf, cap: usize) -> Result<Self> {
        let mut state = read_json_file::<DiscordBridgeState>(&path)
            .context("failed to load discord bridge state")?
            .unwrap_or_default();

        if state.schema_version != DISCORD_STATE_SCHEMA_VERSION {
            bail!(
                "unsupported discord bridge state schema: expected {}, found {}",
                DISCORD_STATE_SCHEMA_VERSION,
                state.schema_version
            );
        }

        let cap = cap.max(1);
        if state.processed_event_keys.len() > cap {
            let keep_from = state.processed_event_keys.len() - cap;
            state.processed_event_keys = state.processed_event_keys[keep_from..].to_vec();
        }

        let processed_index = state
            .processed_event_keys
            .iter()
            .cloned()
            .collect::<HashSet<_>>();
        Ok(Self {
            path,
            cap,
            state,
            processed_index,
        })
    }

    pub(super) fn contains(&self, key: &str) -> bool {
        self.processed_index.contains(key)
    }

    pub(super) fn mark_processed(&mut self, key: &str) -> bool {
        if self.processed_index.contains(key) {
            return false;
        }
        self.state.processed_event_keys.push(key.to_string());
        self.processed_index.insert(key.to_string());
        while self.state.processed_event_keys.len() > self.cap {
            let removed = self.state.processed_event_keys.remove(0);
            self.processed_index.remove(&removed);
        }
        true
    }

    pub(super) fn transport_health(&self) -> &TransportHealthSnapshot {
        &self.state.health
    }

    pub(super) fn update_transport_health(&mut self, value: TransportHealthSnapshot) -> bool {
        if self.state.health == value {
            return false;
        }
        self.state.health = value;
        true
    }

    pub(super) fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.state).context("failed to save discord bridge state")
    }
}
