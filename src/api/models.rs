//! Wire types for the front-end HTTP surface (spec §6). These are the only
//! structs that know the JSON shape clients speak; everything downstream of
//! a handler deals in the core's own types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::TaskStatus;

/// One element of `POST /submit`'s `tasks` array: `[function_id, endpoint,
/// payload]`. The middle element must always be the literal `"UNDECIDED"` —
/// clients never choose their own endpoint (spec §6).
#[derive(Debug, Deserialize)]
pub struct SubmitTaskWire(pub String, pub String, pub serde_json::Value);

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub tasks: Vec<SubmitTaskWire>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    Success {
        status: &'static str,
        task_uuids: Vec<Uuid>,
        endpoints: Vec<String>,
    },
    Failed {
        status: &'static str,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub task_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub response: &'static str,
    pub results: HashMap<Uuid, TaskStatus>,
}
