//! Backend protocol client (spec §6): the remote function-execution
//! service the scheduler forwards submitted tasks to. An external
//! collaborator — this module is only the narrow interface the core
//! consumes, grounded on the teacher's `connectors/rest.rs` HTTP-connector
//! shape.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{BackendTaskId, EndpointId, FunctionId};

#[derive(Debug, Clone)]
pub enum BackendStatus {
    Pending,
    Result { value: serde_json::Value, runtime: Option<f64> },
    Exception { reason: String },
}

#[derive(Debug, Clone)]
pub struct EndpointStatusRecord {
    pub timestamp: f64,
    pub active_managers: u32,
}

#[derive(Debug, Clone)]
pub struct BackendSubmitResponse {
    pub success: bool,
    pub task_uuids: Vec<BackendTaskId>,
}

/// The backend's submit/status/endpoint-status surface (spec §6).
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn submit(
        &self,
        tasks: &[(FunctionId, EndpointId, Vec<u8>)],
    ) -> SchedulerResult<BackendSubmitResponse>;

    async fn batch_status(
        &self,
        task_ids: &[BackendTaskId],
    ) -> SchedulerResult<HashMap<BackendTaskId, BackendStatus>>;

    async fn endpoint_status(&self, endpoint_id: &EndpointId) -> SchedulerResult<Option<EndpointStatusRecord>>;
}

pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build backend HTTP client");
        Self { client, base_url: base_url.into() }
    }
}

#[derive(Serialize)]
struct SubmitRequestWire<'a> {
    tasks: Vec<(&'a str, &'a str, &'a [u8])>,
}

#[derive(Deserialize)]
struct SubmitResponseWire {
    status: String,
    #[serde(default)]
    task_uuids: Vec<String>,
}

#[derive(Serialize)]
struct BatchStatusRequestWire<'a> {
    task_ids: &'a [BackendTaskId],
}

#[derive(Deserialize)]
struct BatchStatusResponseWire {
    results: HashMap<String, StatusWire>,
}

#[derive(Deserialize)]
struct StatusWire {
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    runtime: Option<f64>,
    #[serde(default)]
    exception: Option<String>,
}

impl From<StatusWire> for BackendStatus {
    fn from(wire: StatusWire) -> Self {
        if let Some(reason) = wire.exception {
            BackendStatus::Exception { reason }
        } else if let Some(value) = wire.result {
            BackendStatus::Result { value, runtime: wire.runtime }
        } else if wire.status.eq_ignore_ascii_case("pending") {
            BackendStatus::Pending
        } else {
            BackendStatus::Pending
        }
    }
}

#[derive(Deserialize)]
struct EndpointStatusWire {
    timestamp: f64,
    #[serde(default)]
    active_managers: u32,
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn submit(
        &self,
        tasks: &[(FunctionId, EndpointId, Vec<u8>)],
    ) -> SchedulerResult<BackendSubmitResponse> {
        let body = SubmitRequestWire {
            tasks: tasks.iter().map(|(f, e, p)| (f.as_str(), e.as_str(), p.as_slice())).collect(),
        };
        let res: SubmitResponseWire = self
            .client
            .post(format!("{}/submit", self.base_url))
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| SchedulerError::BackendDecode(e.to_string()))?;

        Ok(BackendSubmitResponse {
            success: res.status == "Success",
            task_uuids: res.task_uuids,
        })
    }

    async fn batch_status(
        &self,
        task_ids: &[BackendTaskId],
    ) -> SchedulerResult<HashMap<BackendTaskId, BackendStatus>> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let body = BatchStatusRequestWire { task_ids };
        let res: BatchStatusResponseWire = self
            .client
            .post(format!("{}/batch_status", self.base_url))
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| SchedulerError::BackendDecode(e.to_string()))?;

        Ok(res.results.into_iter().map(|(id, wire)| (id, wire.into())).collect())
    }

    async fn endpoint_status(&self, endpoint_id: &EndpointId) -> SchedulerResult<Option<EndpointStatusRecord>> {
        let res: Vec<EndpointStatusWire> = self
            .client
            .get(format!("{}/endpoints/{}/status", self.base_url, endpoint_id))
            .send()
            .await?
            .json()
            .await
            .map_err(|e| SchedulerError::BackendDecode(e.to_string()))?;

        Ok(res.into_iter().next().map(|w| EndpointStatusRecord {
            timestamp: w.timestamp,
            active_managers: w.active_managers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_wire_wins_over_a_stray_result() {
        let wire = StatusWire {
            status: "FAILED".to_string(),
            result: Some(serde_json::json!(1)),
            runtime: None,
            exception: Some("boom".to_string()),
        };
        assert!(matches!(BackendStatus::from(wire), BackendStatus::Exception { reason } if reason == "boom"));
    }

    #[test]
    fn result_wire_carries_its_runtime() {
        let wire = StatusWire {
            status: "SUCCESS".to_string(),
            result: Some(serde_json::json!({"x": 1})),
            runtime: Some(2.5),
            exception: None,
        };
        match BackendStatus::from(wire) {
            BackendStatus::Result { runtime, .. } => assert_eq!(runtime, Some(2.5)),
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_status_defaults_to_pending() {
        let wire = StatusWire { status: "WEIRD".to_string(), result: None, runtime: None, exception: None };
        assert!(matches!(BackendStatus::from(wire), BackendStatus::Pending));
    }
}
