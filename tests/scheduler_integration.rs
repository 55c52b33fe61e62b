//! End-to-end scheduler tests wiring a real `SchedulerCore` against mock
//! backend/transfer collaborators, covering the dispatch -> submit ->
//! status-ingestion lifecycle and the endpoint health watchdog.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus_scheduler::backend_client::{
    BackendClient, BackendStatus, BackendSubmitResponse, EndpointStatusRecord,
};
use nexus_scheduler::codec::JsonPayloadCodec;
use nexus_scheduler::error::SchedulerResult;
use nexus_scheduler::model::{BackendTaskId, EndpointConfig, EndpointId, FunctionId};
use nexus_scheduler::predictors::runtime::RollingAveragePredictor;
use nexus_scheduler::predictors::transfer::TransferPredictor;
use nexus_scheduler::predictors::RuntimePredictor;
use nexus_scheduler::scheduler::SchedulerCore;
use nexus_scheduler::strategies::EndpointDirectory;
use nexus_scheduler::transfer_manager::{
    ExternalTransferStatus, SubmitTransferResponse, TransferManager, TransferServiceClient,
};
use nexus_scheduler::model::InputFile;

fn endpoint(group: &str) -> EndpointConfig {
    EndpointConfig {
        name: group.to_string(),
        group: group.to_string(),
        transfer_group: "site-only".to_string(),
        globus: format!("globus-{group}"),
        launch_time: 0.0,
    }
}

struct NoopTransferClient;

#[async_trait]
impl TransferServiceClient for NoopTransferClient {
    async fn submit_transfer(
        &self,
        _src: &str,
        _dst: &str,
        _items: &[InputFile],
        _sync_level: &str,
        _label: &str,
    ) -> SchedulerResult<SubmitTransferResponse> {
        unreachable!("no test here declares input files")
    }

    async fn get_task(&self, _task_id: &str) -> SchedulerResult<ExternalTransferStatus> {
        Ok(ExternalTransferStatus::Active)
    }

    async fn cancel_task(&self, _task_id: &str) -> SchedulerResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MockBackend {
    accepted: Mutex<Vec<(FunctionId, EndpointId, Vec<u8>)>>,
    statuses: Mutex<HashMap<BackendTaskId, BackendStatus>>,
    endpoint_records: Mutex<HashMap<EndpointId, EndpointStatusRecord>>,
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn submit(
        &self,
        tasks: &[(FunctionId, EndpointId, Vec<u8>)],
    ) -> SchedulerResult<BackendSubmitResponse> {
        let mut accepted = self.accepted.lock().unwrap();
        let mut task_uuids = Vec::new();
        for task in tasks {
            let backend_id = format!("backend-{}", accepted.len());
            accepted.push(task.clone());
            task_uuids.push(backend_id);
        }
        Ok(BackendSubmitResponse { success: true, task_uuids })
    }

    async fn batch_status(
        &self,
        task_ids: &[BackendTaskId],
    ) -> SchedulerResult<HashMap<BackendTaskId, BackendStatus>> {
        let statuses = self.statuses.lock().unwrap();
        Ok(task_ids
            .iter()
            .filter_map(|id| statuses.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn endpoint_status(&self, endpoint_id: &EndpointId) -> SchedulerResult<Option<EndpointStatusRecord>> {
        Ok(self.endpoint_records.lock().unwrap().get(endpoint_id).cloned())
    }
}

fn build_core(strategy: &str) -> (Arc<SchedulerCore>, Arc<MockBackend>) {
    let directory = Arc::new(
        EndpointDirectory::new(vec![
            ("ep-a".to_string(), endpoint("cpu")),
            ("ep-b".to_string(), endpoint("cpu")),
        ])
        .unwrap(),
    );
    let runtime_predictor: Arc<dyn RuntimePredictor> = Arc::new(RollingAveragePredictor::new(3));
    let transfer_predictor = Arc::new(TransferPredictor::default());
    let transfer_client = Arc::new(NoopTransferClient);
    let transfer_manager = Arc::new(TransferManager::new(
        transfer_client,
        Arc::clone(&directory),
        Arc::clone(&transfer_predictor),
    ));
    let backend = Arc::new(MockBackend::default());
    let backend_dyn: Arc<dyn BackendClient> = backend.clone();

    let core = SchedulerCore::new(
        directory,
        strategy,
        runtime_predictor,
        transfer_predictor,
        transfer_manager,
        backend_dyn,
        Arc::new(JsonPayloadCodec),
        0.3,
    )
    .unwrap();

    (core, backend)
}

#[tokio::test]
async fn submit_dispatch_and_status_round_trip() {
    let (core, backend) = build_core("round-robin");

    let (client_ids, endpoints) = core
        .batch_submit(vec![("fn-a".to_string(), Vec::new())])
        .await
        .unwrap();
    assert_eq!(client_ids.len(), 1);
    assert_eq!(endpoints.len(), 1);

    // No backend task id yet: nothing has been dispatched.
    assert!(core.translate_task_id(&client_ids[0]).is_empty());

    core.dispatch_tick().await;

    let backend_ids = core.translate_task_id(&client_ids[0]);
    assert_eq!(backend_ids.len(), 1);
    let backend_id = backend_ids.iter().next().unwrap().clone();
    assert_eq!(core.pending_count(&endpoints[0]), 1);

    backend.statuses.lock().unwrap().insert(
        backend_id.clone(),
        BackendStatus::Result { value: serde_json::json!(42), runtime: Some(1.5) },
    );

    core.log_status(&backend_id, backend.statuses.lock().unwrap().get(&backend_id).unwrap().clone());

    let status = core.get_status(&client_ids[0]).unwrap();
    assert!(status.is_terminal());
    assert_eq!(core.pending_count(&endpoints[0]), 0);

    // Duplicate terminal report is a no-op, not a crash or a state flip.
    core.log_status(&backend_id, BackendStatus::Pending);
    assert!(core.get_status(&client_ids[0]).unwrap().is_terminal());
}

#[tokio::test]
async fn blacklisted_endpoint_is_excluded_from_round_robin() {
    let (core, _backend) = build_core("round-robin");
    core.blacklist("fn-a".to_string(), "ep-a".to_string());

    for _ in 0..4 {
        let (_, endpoints) = core.batch_submit(vec![("fn-a".to_string(), Vec::new())]).await.unwrap();
        assert_eq!(endpoints[0], "ep-b", "blacklisted endpoint must never be chosen");
    }
}

#[tokio::test]
async fn watchdog_marks_dead_then_revives_on_fresh_heartbeat() {
    let (core, backend) = build_core("round-robin");

    // No record at all yet: `age` is computed from `EndpointState::new`'s
    // freshly-stamped `last_result_time`, so a brand new endpoint stays alive.
    core.watchdog_tick_one(&"ep-a".to_string(), 60.0).await;
    assert_eq!(core.endpoint_alive("ep-a"), Some(true));

    // `last_result_time` only ever moves forward (it floors `age`), so the
    // death path needs real elapsed time rather than a smaller threshold
    // applied against an unchanged, freshly-stamped floor.
    backend.endpoint_records.lock().unwrap().insert(
        "ep-a".to_string(),
        EndpointStatusRecord { timestamp: 0.0, active_managers: 1 },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    core.watchdog_tick_one(&"ep-a".to_string(), 0.01).await;
    assert_eq!(core.endpoint_alive("ep-a"), Some(false));

    backend.endpoint_records.lock().unwrap().insert(
        "ep-a".to_string(),
        EndpointStatusRecord { timestamp: nexus_scheduler::model::now_secs(), active_managers: 1 },
    );
    core.watchdog_tick_one(&"ep-a".to_string(), 60.0).await;
    assert_eq!(core.endpoint_alive("ep-a"), Some(true));
}

#[tokio::test]
async fn execution_log_is_drained_once() {
    let (core, _backend) = build_core("round-robin");
    core.batch_submit(vec![("fn-a".to_string(), Vec::new())]).await.unwrap();

    let first = core.drain_execution_log();
    assert_eq!(first.len(), 1);
    assert!(core.drain_execution_log().is_empty());
}

#[tokio::test]
async fn fastest_endpoint_strategy_dispatches_successfully() {
    let (core, backend) = build_core("fastest-endpoint");

    let (client_ids, _endpoints) =
        core.batch_submit(vec![("fn-a".to_string(), Vec::new())]).await.unwrap();
    core.dispatch_tick().await;

    tokio::time::sleep(Duration::from_millis(1)).await;
    let backend_ids = core.translate_task_id(&client_ids[0]);
    assert_eq!(backend_ids.len(), 1);
    assert_eq!(backend.accepted.lock().unwrap().len(), 1);
}
