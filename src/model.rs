//! Core data model: endpoints, tasks, and the statuses that flow between them.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EndpointId = String;
pub type FunctionId = String;
pub type BackendTaskId = String;
pub type ClientTaskId = Uuid;

/// Monotonic-ish wall clock seconds, used for ETA and queue-delay math.
/// `SystemTime` is used (not `Instant`) because ETAs are compared against
/// backend-reported timestamps, which are wall-clock.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

/// Endpoint allocation temperature. Cold-start penalty applies only to `Cold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Temperature {
    Warm,
    Warming,
    Cold,
}

/// Static, configured identity of a remote compute endpoint (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub group: String,
    pub transfer_group: String,
    pub globus: String,
    #[serde(default)]
    pub launch_time: f64,
}

/// Runtime-mutable attributes of an endpoint, owned by the health watchdog
/// and read by strategies/queue-delay math.
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub config: EndpointConfig,
    pub alive: bool,
    pub temperature: Temperature,
    pub last_result_time: f64,
    pub active_managers: u32,
}

impl EndpointState {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            alive: true,
            temperature: Temperature::Warm,
            last_result_time: now_secs(),
            active_managers: 1,
        }
    }
}

/// Latest status observed for a task, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Result { value: serde_json::Value, runtime: Option<f64> },
    Exception { reason: String },
}

impl TaskStatus {
    /// Terminal statuses are never overwritten by `PENDING` (spec §4.4,
    /// monotonic status-cache invariant).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Which of the three disjoint sets a task currently occupies (spec §3
/// invariant: a task occupies exactly one at any instant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    AwaitingTransfer,
    PendingAtBackend,
    Terminal,
}

/// A task tracked by the scheduler core from submit through terminal status.
#[derive(Debug, Clone)]
pub struct Task {
    pub client_task_id: ClientTaskId,
    pub function_id: FunctionId,
    pub payload: Vec<u8>,
    pub endpoint_id: EndpointId,
    pub transfer_handle: Option<u64>,
    pub time_sent: Option<f64>,
    pub eta: Option<f64>,
    pub backend_task_ids: HashSet<BackendTaskId>,
    pub latest_status: TaskStatus,
    pub phase: TaskPhase,
}

impl Task {
    pub fn new(function_id: FunctionId, payload: Vec<u8>, endpoint_id: EndpointId) -> Self {
        Self {
            client_task_id: Uuid::new_v4(),
            function_id,
            payload,
            endpoint_id,
            transfer_handle: None,
            time_sent: None,
            eta: None,
            backend_task_ids: HashSet::new(),
            latest_status: TaskStatus::Pending,
            phase: TaskPhase::AwaitingTransfer,
        }
    }
}

/// A choice returned by a `Strategy`: the endpoint to use, and an optional
/// ETA when the strategy happens to have computed one already (SmallestETA).
#[derive(Debug, Clone)]
pub struct EndpointChoice {
    pub endpoint_id: EndpointId,
    pub eta: Option<f64>,
}

/// One declared input file for a task, used by the transfer manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputFile {
    pub path: String,
    pub size: u64,
}

/// A single decision recorded to the execution log (`GET /execution_log`),
/// mirroring `central_scheduler.py`'s in-memory `execution_log` list.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogEntry {
    pub timestamp: f64,
    pub function_id: FunctionId,
    pub endpoint_id: EndpointId,
    pub strategy: String,
    pub client_task_id: ClientTaskId,
}
