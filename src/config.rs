//! Endpoint fleet configuration (spec §6) and process-level settings,
//! modeled on the teacher's `config/mod.rs` `ConfigLoader`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{EndpointConfig, EndpointId};

/// Raw `endpoint_id -> {name, group, transfer_group, globus, launch_time}`
/// mapping loaded from YAML (spec §6).
#[derive(Debug, Deserialize)]
pub struct EndpointsFile(HashMap<EndpointId, EndpointConfig>);

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_endpoints_from_file<P: AsRef<Path>>(
        path: P,
    ) -> SchedulerResult<Vec<(EndpointId, EndpointConfig)>> {
        let content = std::fs::read_to_string(path)?;
        Self::load_endpoints_from_str(&content)
    }

    pub fn load_endpoints_from_str(content: &str) -> SchedulerResult<Vec<(EndpointId, EndpointConfig)>> {
        let parsed: EndpointsFile = serde_yaml::from_str(content)?;
        if parsed.0.is_empty() {
            return Err(SchedulerError::Configuration("endpoint fleet must not be empty".to_string()));
        }
        // serde_yaml mappings don't preserve source order through a HashMap;
        // sort by id for a deterministic, reproducible round-robin start
        // rather than an arbitrary hash order varying run to run.
        let mut endpoints: Vec<(EndpointId, EndpointConfig)> = parsed.0.into_iter().collect();
        endpoints.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(endpoints)
    }
}

/// Process-level settings, combining CLI flags with environment overrides
/// (`NEXUS_LOG_LEVEL`, mirroring the teacher's `KNHK_LOG_LEVEL`).
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub log_level: String,
    pub bind_port: u16,
}

impl AppSettings {
    pub fn from_cli(log_level: String, bind_port: u16) -> Self {
        let log_level = std::env::var("NEXUS_LOG_LEVEL").unwrap_or(log_level);
        Self { log_level, bind_port }
    }
}
