//! Transfer manager: stages declared input files via the bulk-transfer
//! service and tracks completion (spec §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{now_secs, EndpointId, InputFile};
use crate::predictors::TransferPredictor;
use crate::strategies::EndpointDirectory;

/// Handle 0 is reserved to mean "immediately complete": every source was
/// trivially the destination, so no real transfer was ever submitted
/// (spec §4.6).
pub const IMMEDIATE_HANDLE: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTransferStatus {
    Active,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SubmitTransferResponse {
    pub accepted: bool,
    pub task_id: String,
}

/// The bulk-transfer service's narrow external interface (spec §6). A real
/// implementation talks to Globus Transfer or similar; tests inject a mock.
#[async_trait]
pub trait TransferServiceClient: Send + Sync {
    async fn submit_transfer(
        &self,
        src_globus: &str,
        dst_globus: &str,
        items: &[InputFile],
        sync_level: &str,
        label: &str,
    ) -> SchedulerResult<SubmitTransferResponse>;

    async fn get_task(&self, task_id: &str) -> SchedulerResult<ExternalTransferStatus>;

    async fn cancel_task(&self, task_id: &str) -> SchedulerResult<()>;
}

/// `reqwest`-backed client for a REST-fronted transfer service, grounded on
/// the teacher's `connectors/rest.rs` HTTP-connector shape.
pub struct HttpTransferServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransferServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build transfer service HTTP client");
        Self { client, base_url: base_url.into() }
    }
}

#[derive(serde::Serialize)]
struct SubmitTransferRequest<'a> {
    source_endpoint: &'a str,
    destination_endpoint: &'a str,
    items: &'a [InputFile],
    sync_level: &'a str,
    label: &'a str,
}

#[derive(serde::Deserialize)]
struct SubmitTransferWire {
    code: String,
    task_id: String,
}

#[derive(serde::Deserialize)]
struct TaskStatusWire {
    status: String,
}

#[async_trait]
impl TransferServiceClient for HttpTransferServiceClient {
    async fn submit_transfer(
        &self,
        src_globus: &str,
        dst_globus: &str,
        items: &[InputFile],
        sync_level: &str,
        label: &str,
    ) -> SchedulerResult<SubmitTransferResponse> {
        let body = SubmitTransferRequest {
            source_endpoint: src_globus,
            destination_endpoint: dst_globus,
            items,
            sync_level,
            label,
        };
        let res: SubmitTransferWire = self
            .client
            .post(format!("{}/transfer", self.base_url))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Ok(SubmitTransferResponse {
            accepted: res.code == "Accepted",
            task_id: res.task_id,
        })
    }

    async fn get_task(&self, task_id: &str) -> SchedulerResult<ExternalTransferStatus> {
        let res: TaskStatusWire = self
            .client
            .get(format!("{}/task/{}", self.base_url, task_id))
            .send()
            .await?
            .json()
            .await?;
        Ok(match res.status.as_str() {
            "SUCCEEDED" => ExternalTransferStatus::Succeeded,
            "FAILED" => ExternalTransferStatus::Failed,
            _ => ExternalTransferStatus::Active,
        })
    }

    async fn cancel_task(&self, task_id: &str) -> SchedulerResult<()> {
        self.client
            .post(format!("{}/task/{}/cancel", self.base_url, task_id))
            .send()
            .await?;
        Ok(())
    }
}

struct ActiveTransfer {
    src_group: String,
    dst_group: String,
    size: u64,
    submission_time: f64,
    label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Pending,
    Complete,
    Failed,
}

pub struct TransferManager {
    client: Arc<dyn TransferServiceClient>,
    directory: Arc<EndpointDirectory>,
    predictor: Arc<TransferPredictor>,
    sync_level: String,
    next_handle: AtomicU64,
    /// handle -> external transfer ids composing it
    handle_members: DashMap<u64, Vec<String>>,
    active: DashMap<String, ActiveTransfer>,
    completed: DashMap<String, ()>,
    failed_handles: DashMap<u64, String>,
}

impl TransferManager {
    pub fn new(
        client: Arc<dyn TransferServiceClient>,
        directory: Arc<EndpointDirectory>,
        predictor: Arc<TransferPredictor>,
    ) -> Self {
        Self {
            client,
            directory,
            predictor,
            sync_level: "exists".to_string(),
            next_handle: AtomicU64::new(1),
            handle_members: DashMap::new(),
            active: DashMap::new(),
            completed: DashMap::new(),
            failed_handles: DashMap::new(),
        }
    }

    /// Submits one bulk transfer per distinct, non-trivial source, and
    /// aggregates the resulting external ids under a fresh handle
    /// (spec §4.6). `files_by_src` maps source endpoint id to its declared
    /// input files.
    pub async fn transfer(
        &self,
        files_by_src: &HashMap<EndpointId, Vec<InputFile>>,
        dst_endpoint: &EndpointId,
        label: &str,
    ) -> SchedulerResult<u64> {
        let dst_config = self
            .directory
            .get(dst_endpoint)
            .ok_or_else(|| SchedulerError::Configuration(format!("unknown endpoint {dst_endpoint}")))?;
        let dst_globus = dst_config.globus.clone();
        let dst_group = dst_config.transfer_group.clone();

        let mut member_ids = Vec::new();
        let n = files_by_src.len();
        for (i, (src_endpoint, items)) in files_by_src.iter().enumerate() {
            if src_endpoint == dst_endpoint {
                debug!(src = %src_endpoint, dst = %dst_endpoint, "skipped transfer: same endpoint");
                continue;
            }
            let src_config = self
                .directory
                .get(src_endpoint)
                .ok_or_else(|| SchedulerError::Configuration(format!("unknown endpoint {src_endpoint}")))?;

            let total_size: u64 = items.iter().map(|f| f.size).sum();
            info!(src = %src_endpoint, dst = %dst_endpoint, files = items.len(), "transferring");

            let res = self
                .client
                .submit_transfer(
                    &src_config.globus,
                    &dst_globus,
                    items,
                    &self.sync_level,
                    &format!("{label} ({}/{n})", i + 1),
                )
                .await?;
            if !res.accepted {
                return Err(SchedulerError::Backend("transfer not accepted".to_string()));
            }

            self.active.insert(
                res.task_id.clone(),
                ActiveTransfer {
                    src_group: src_config.transfer_group.clone(),
                    dst_group: dst_group.clone(),
                    size: total_size,
                    submission_time: now_secs(),
                    label: label.to_string(),
                },
            );
            member_ids.push(res.task_id);
        }

        if member_ids.is_empty() {
            return Ok(IMMEDIATE_HANDLE);
        }

        let active_count = self.active.len();
        let max = self.predictor.max_concurrent_transfers;
        if active_count > max {
            warn!(active_count, max, "active transfers exceed MAX_CONCURRENT_TRANSFERS; no hard limit enforced");
        }

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handle_members.insert(handle, member_ids);
        Ok(handle)
    }

    pub fn status(&self, handle: u64) -> HandleStatus {
        if handle == IMMEDIATE_HANDLE {
            return HandleStatus::Complete;
        }
        if self.failed_handles.contains_key(&handle) {
            return HandleStatus::Failed;
        }
        match self.handle_members.get(&handle) {
            Some(members) => {
                if members.iter().all(|id| self.completed.contains_key(id)) {
                    HandleStatus::Complete
                } else {
                    HandleStatus::Pending
                }
            }
            None => HandleStatus::Failed,
        }
    }

    pub fn is_complete(&self, handle: u64) -> bool {
        self.status(handle) == HandleStatus::Complete
    }

    /// One tracker-loop tick: poll every active external transfer, advance
    /// completed/failed sets, and feed the transfer predictor (spec §4.6).
    pub async fn tick(&self) {
        let active_ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for transfer_id in active_ids {
            let Some(info) = self.active.get(&transfer_id) else { continue };
            let label = info.label.clone();
            drop(info);

            let status = match self.client.get_task(&transfer_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(transfer_id = %transfer_id, error = %e, "transfer status poll failed, retrying next tick");
                    continue;
                }
            };

            match status {
                ExternalTransferStatus::Active => continue,
                ExternalTransferStatus::Succeeded => {
                    if let Some((_, info)) = self.active.remove(&transfer_id) {
                        let elapsed = now_secs() - info.submission_time;
                        info!(transfer_id = %transfer_id, %label, elapsed, "transfer finished");
                        self.predictor.update(&info.src_group, &info.dst_group, info.size, elapsed);
                        self.completed.insert(transfer_id, ());
                    }
                }
                ExternalTransferStatus::Failed => {
                    error!(transfer_id = %transfer_id, %label, "transfer failed, canceling");
                    if let Err(e) = self.client.cancel_task(&transfer_id).await {
                        error!(transfer_id = %transfer_id, error = %e, "could not cancel failed transfer");
                    }
                    self.active.remove(&transfer_id);
                    if let Some(handle) = self.handle_members.iter().find_map(|e| {
                        e.value().contains(&transfer_id).then(|| *e.key())
                    }) {
                        self.failed_handles.insert(handle, transfer_id);
                    }
                }
            }
        }
    }

    /// Runs the tracker loop until `stop` is signalled, per spec §5 shutdown
    /// semantics (loops exit at their next poll).
    pub async fn run_tracker_loop(self: Arc<Self>, polling_interval: Duration, stop: Arc<tokio::sync::Notify>) {
        info!("transfer tracker loop started");
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = tokio::time::sleep(polling_interval) => self.tick().await,
            }
        }
        info!("transfer tracker loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointConfig;
    use std::sync::Mutex;

    fn endpoint(name: &str, transfer_group: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            group: name.to_string(),
            transfer_group: transfer_group.to_string(),
            globus: format!("globus-{name}"),
            launch_time: 0.0,
        }
    }

    struct MockTransferClient {
        submitted: Mutex<Vec<String>>,
        next_status: Mutex<HashMap<String, ExternalTransferStatus>>,
    }

    #[async_trait]
    impl TransferServiceClient for MockTransferClient {
        async fn submit_transfer(
            &self,
            _src: &str,
            _dst: &str,
            _items: &[InputFile],
            _sync_level: &str,
            _label: &str,
        ) -> SchedulerResult<SubmitTransferResponse> {
            let id = format!("tx-{}", self.submitted.lock().unwrap().len());
            self.submitted.lock().unwrap().push(id.clone());
            Ok(SubmitTransferResponse { accepted: true, task_id: id })
        }

        async fn get_task(&self, task_id: &str) -> SchedulerResult<ExternalTransferStatus> {
            Ok(*self
                .next_status
                .lock()
                .unwrap()
                .get(task_id)
                .unwrap_or(&ExternalTransferStatus::Active))
        }

        async fn cancel_task(&self, _task_id: &str) -> SchedulerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn same_endpoint_transfer_yields_immediate_handle() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![("A".to_string(), endpoint("A", "grp"))]).unwrap(),
        );
        let client = Arc::new(MockTransferClient {
            submitted: Mutex::new(Vec::new()),
            next_status: Mutex::new(HashMap::new()),
        });
        let mgr = TransferManager::new(client, directory, Arc::new(TransferPredictor::default()));

        let mut files = HashMap::new();
        files.insert("A".to_string(), vec![InputFile { path: "x".into(), size: 10 }]);
        let handle = mgr.transfer(&files, &"A".to_string(), "test").await.unwrap();
        assert_eq!(handle, IMMEDIATE_HANDLE);
        assert!(mgr.is_complete(handle));
    }

    #[tokio::test]
    async fn real_transfer_completes_after_tracker_tick() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![
                ("A".to_string(), endpoint("A", "site-a")),
                ("B".to_string(), endpoint("B", "site-b")),
            ])
            .unwrap(),
        );
        let client = Arc::new(MockTransferClient {
            submitted: Mutex::new(Vec::new()),
            next_status: Mutex::new(HashMap::new()),
        });
        let mgr = TransferManager::new(client.clone(), directory, Arc::new(TransferPredictor::default()));

        let mut files = HashMap::new();
        files.insert("A".to_string(), vec![InputFile { path: "x".into(), size: 10 }]);
        let handle = mgr.transfer(&files, &"B".to_string(), "test").await.unwrap();
        assert!(!mgr.is_complete(handle));

        client.next_status.lock().unwrap().insert("tx-0".to_string(), ExternalTransferStatus::Succeeded);
        mgr.tick().await;
        assert!(mgr.is_complete(handle));
    }

    #[tokio::test]
    async fn failed_transfer_marks_handle_failed() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![
                ("A".to_string(), endpoint("A", "site-a")),
                ("B".to_string(), endpoint("B", "site-b")),
            ])
            .unwrap(),
        );
        let client = Arc::new(MockTransferClient {
            submitted: Mutex::new(Vec::new()),
            next_status: Mutex::new(HashMap::new()),
        });
        let mgr = TransferManager::new(client.clone(), directory, Arc::new(TransferPredictor::default()));

        let mut files = HashMap::new();
        files.insert("A".to_string(), vec![InputFile { path: "x".into(), size: 10 }]);
        let handle = mgr.transfer(&files, &"B".to_string(), "test").await.unwrap();

        client.next_status.lock().unwrap().insert("tx-0".to_string(), ExternalTransferStatus::Failed);
        mgr.tick().await;
        assert_eq!(mgr.status(handle), HandleStatus::Failed);
    }
}
