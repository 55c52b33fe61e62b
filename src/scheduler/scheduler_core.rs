use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend_client::{BackendClient, BackendStatus};
use crate::codec::PayloadCodec;
use crate::error::SchedulerResult;
use crate::model::{
    now_secs, BackendTaskId, ClientTaskId, EndpointId, EndpointState, ExecutionLogEntry,
    FunctionId, Task, TaskPhase, TaskStatus,
};
use crate::predictors::runtime::ObservedTask;
use crate::predictors::{RuntimePredictor, TransferPredictor};
use crate::strategies::{init_strategy, ChooseRequest, EndpointDirectory, Predictors, Strategy};
use crate::transfer_manager::{HandleStatus, TransferManager, IMMEDIATE_HANDLE};

const EXECUTION_LOG_CAPACITY: usize = 10_000;

/// Task bookkeeping, queue-delay estimation, dispatch, and status ingestion
/// (spec §4.4). Every shared table is a `DashMap`/`parking_lot` lock so the
/// four concurrent workers (ingress, dispatcher, watchdog, transfer
/// tracker) can each touch their own rows without contending on a single
/// global lock (spec §5).
pub struct SchedulerCore {
    directory: Arc<EndpointDirectory>,
    endpoint_states: DashMap<EndpointId, RwLock<EndpointState>>,
    strategy: Box<dyn Strategy>,
    /// The same closures handed to `strategy` at construction (spec §9
    /// "Cyclic callbacks"), kept here too for the dispatcher's own
    /// post-dispatch ETA recompute.
    predictors: Predictors,
    transfer_manager: Arc<TransferManager>,
    backend: Arc<dyn BackendClient>,
    codec: Arc<dyn PayloadCodec>,

    tasks: DashMap<ClientTaskId, RwLock<Task>>,
    /// backend_task_id -> client_task_id
    pending_by_backend: DashMap<BackendTaskId, ClientTaskId>,
    /// endpoint -> set of backend_task_ids pending there; kept in lockstep
    /// with `pending_by_backend` (spec §3 "Pending index" invariant).
    pending_by_endpoint: DashMap<EndpointId, RwLock<HashSet<BackendTaskId>>>,

    queue_error: DashMap<EndpointId, f64>,
    last_task_eta: DashMap<EndpointId, f64>,
    blacklist: DashMap<FunctionId, RwLock<HashSet<EndpointId>>>,

    /// Tasks scheduled but not yet submitted to the backend, waiting on
    /// transfer completion or an open dispatcher slot (spec §4.4, §5).
    dispatch_waiting: Mutex<VecDeque<ClientTaskId>>,

    execution_log: Mutex<VecDeque<ExecutionLogEntry>>,
    strategy_name: String,
    latency_const: f64,
}

impl SchedulerCore {
    /// Strategies are constructed with a `Predictors` record whose
    /// `queue_fn`/`launch_fn` closures call back into the very
    /// `SchedulerCore` being built (spec §9 "Cyclic callbacks"). `new_cyclic`
    /// hands us a `Weak` reference that becomes valid the instant
    /// construction finishes, which breaks the chicken-and-egg problem
    /// without a back-reference `RefCell`/`OnceLock` field.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<EndpointDirectory>,
        strategy_name: &str,
        runtime_predictor: Arc<dyn RuntimePredictor>,
        transfer_predictor: Arc<TransferPredictor>,
        transfer_manager: Arc<TransferManager>,
        backend: Arc<dyn BackendClient>,
        codec: Arc<dyn PayloadCodec>,
        latency_const: f64,
    ) -> SchedulerResult<Arc<Self>> {
        // Validate the strategy name up front so construction can return a
        // `Result`; `Arc::new_cyclic`'s closure itself cannot fail.
        let _ = init_strategy(
            strategy_name,
            Arc::clone(&directory),
            Predictors {
                runtime: Arc::clone(&runtime_predictor),
                transfer: Arc::clone(&transfer_predictor),
                queue_fn: Arc::new(|_: &str| now_secs()),
                launch_fn: Arc::new(|_: &str| 0.0),
            },
            latency_const,
        )?;

        let strategy_name_owned = strategy_name.to_string();
        let core = Arc::new_cyclic(|weak: &std::sync::Weak<SchedulerCore>| {
            let endpoint_states = DashMap::new();
            for id in directory.ids() {
                let config = directory.get(id).expect("id came from directory.ids()").clone();
                endpoint_states.insert(id.clone(), RwLock::new(EndpointState::new(config)));
            }

            let weak_queue = weak.clone();
            let weak_launch = weak.clone();
            let predictors = Predictors {
                runtime: runtime_predictor,
                transfer: transfer_predictor,
                queue_fn: Arc::new(move |ep: &str| {
                    weak_queue.upgrade().map(|c| c.queue_delay(ep)).unwrap_or_else(now_secs)
                }),
                launch_fn: Arc::new(move |ep: &str| {
                    weak_launch.upgrade().map(|c| c.launch_time(ep)).unwrap_or(0.0)
                }),
            };
            let strategy =
                init_strategy(&strategy_name_owned, Arc::clone(&directory), predictors.clone(), latency_const)
                    .expect("strategy name already validated above");

            SchedulerCore {
                directory,
                endpoint_states,
                strategy,
                predictors,
                transfer_manager,
                backend,
                codec,
                tasks: DashMap::new(),
                pending_by_backend: DashMap::new(),
                pending_by_endpoint: DashMap::new(),
                queue_error: DashMap::new(),
                last_task_eta: DashMap::new(),
                blacklist: DashMap::new(),
                dispatch_waiting: Mutex::new(VecDeque::new()),
                execution_log: Mutex::new(VecDeque::new()),
                strategy_name: strategy_name_owned,
                latency_const,
            }
        });

        Ok(core)
    }

    pub fn directory(&self) -> &Arc<EndpointDirectory> {
        &self.directory
    }

    fn exclude_for(&self, function_id: &str) -> HashSet<EndpointId> {
        self.blacklist
            .get(function_id)
            .map(|set| set.read().clone())
            .unwrap_or_default()
    }

    /// `queue_delay(ep)`: `now()` if `ep` has no pending tasks, otherwise
    /// `max(now(), last_task_eta[ep] + queue_error[ep])` — the clamp
    /// guarantees queue delay never reports a past time (spec §4.4,
    /// testable property).
    pub fn queue_delay(&self, endpoint_id: &str) -> f64 {
        let has_pending = self
            .pending_by_endpoint
            .get(endpoint_id)
            .map(|s| !s.read().is_empty())
            .unwrap_or(false);
        if !has_pending {
            return now_secs();
        }
        let last_eta = self.last_task_eta.get(endpoint_id).map(|v| *v).unwrap_or_else(now_secs);
        let err = self.queue_error.get(endpoint_id).map(|v| *v).unwrap_or(0.0);
        now_secs().max(last_eta + err)
    }

    fn launch_time(&self, endpoint_id: &str) -> f64 {
        self.endpoint_states
            .get(endpoint_id)
            .map(|s| {
                let s = s.read();
                if s.temperature == crate::model::Temperature::Cold {
                    s.config.launch_time
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// `batch_submit`: assigns a client task id and endpoint to each
    /// `(function_id, payload)`, starts any declared transfers, and enqueues
    /// the task for dispatch (spec §4.4). Returned ids/endpoints are in
    /// input order (spec §5 ordering guarantee).
    pub async fn batch_submit(
        &self,
        tasks: Vec<(FunctionId, Vec<u8>)>,
    ) -> SchedulerResult<(Vec<ClientTaskId>, Vec<EndpointId>)> {
        let mut client_ids = Vec::with_capacity(tasks.len());
        let mut endpoint_ids = Vec::with_capacity(tasks.len());

        for (function_id, payload) in tasks {
            let exclude = self.exclude_for(&function_id);
            let decoded = self.codec.decode_kwargs(&payload)?;

            let files_for_strategy: HashMap<String, (String, u64)> = decoded
                .input_files
                .iter()
                .filter_map(|(src, files)| {
                    let group = self.directory.get(src)?.transfer_group.clone();
                    let size: u64 = files.iter().map(|f| f.size).sum();
                    Some((src.clone(), (group, size)))
                })
                .collect();

            let mut req = ChooseRequest::new(&function_id, payload.len());
            req.files_by_src = files_for_strategy;
            req.exclude = exclude;

            let choice = self.strategy.choose_endpoint(req)?;
            let eta = choice.eta.unwrap_or_else(now_secs);

            if let Some(state) = self.endpoint_states.get(&choice.endpoint_id) {
                let mut state = state.write();
                if state.temperature == crate::model::Temperature::Cold {
                    state.temperature = crate::model::Temperature::Warming;
                }
            }

            let mut task = Task::new(function_id.clone(), payload, choice.endpoint_id.clone());
            task.eta = Some(eta);

            if !decoded.input_files.is_empty() {
                let handle = self
                    .transfer_manager
                    .transfer(&decoded.input_files, &choice.endpoint_id, &task.client_task_id.to_string())
                    .await?;
                task.transfer_handle = Some(handle);
                if handle == IMMEDIATE_HANDLE {
                    task.phase = TaskPhase::PendingAtBackend;
                }
            } else {
                task.phase = TaskPhase::PendingAtBackend;
            }

            let client_task_id = task.client_task_id;
            self.execution_log.lock().push_back(ExecutionLogEntry {
                timestamp: now_secs(),
                function_id: function_id.clone(),
                endpoint_id: choice.endpoint_id.clone(),
                strategy: self.strategy_name.clone(),
                client_task_id,
            });
            if self.execution_log.lock().len() > EXECUTION_LOG_CAPACITY {
                self.execution_log.lock().pop_front();
            }

            client_ids.push(client_task_id);
            endpoint_ids.push(choice.endpoint_id.clone());

            self.tasks.insert(client_task_id, RwLock::new(task));
            self.dispatch_waiting.lock().push_back(client_task_id);
        }

        Ok((client_ids, endpoint_ids))
    }

    /// One dispatcher tick (spec §4.4, §5): partition waiting tasks into
    /// ready/still-waiting, batch-submit the ready ones, and wire up the
    /// pending indices for whatever the backend accepts.
    pub async fn dispatch_tick(&self) {
        let mut waiting = self.dispatch_waiting.lock();
        let candidates: Vec<ClientTaskId> = waiting.drain(..).collect();
        drop(waiting);

        let mut ready = Vec::new();
        let mut still_waiting = Vec::new();

        for client_task_id in candidates {
            let Some(task_lock) = self.tasks.get(&client_task_id) else { continue };
            let handle = task_lock.read().transfer_handle;
            match handle {
                None => ready.push(client_task_id),
                Some(h) => match self.transfer_manager.status(h) {
                    HandleStatus::Complete => ready.push(client_task_id),
                    HandleStatus::Pending => still_waiting.push(client_task_id),
                    HandleStatus::Failed => {
                        let mut t = task_lock.write();
                        if !t.latest_status.is_terminal() {
                            t.latest_status = TaskStatus::Exception {
                                reason: format!("transfer {h} failed"),
                            };
                            t.phase = TaskPhase::Terminal;
                        }
                    }
                },
            }
        }

        self.dispatch_waiting.lock().extend(still_waiting);

        if ready.is_empty() {
            return;
        }

        let batch: Vec<(FunctionId, EndpointId, Vec<u8>)> = ready
            .iter()
            .filter_map(|id| {
                let t = self.tasks.get(id)?;
                let t = t.read();
                Some((t.function_id.clone(), t.endpoint_id.clone(), t.payload.clone()))
            })
            .collect();

        match self.backend.submit(&batch).await {
            Ok(response) if response.success => {
                // Backend task ids zip 1-to-1 with the ready-task order sent
                // (spec §5 ordering guarantee).
                for (client_task_id, backend_task_id) in ready.into_iter().zip(response.task_uuids) {
                    self.finish_dispatch(client_task_id, backend_task_id);
                }
            }
            Ok(_) => {
                warn!("backend submit returned non-Success status; retrying next tick");
                self.dispatch_waiting.lock().extend(ready);
            }
            Err(e) => {
                warn!(error = %e, "backend submit failed; retrying next tick");
                self.dispatch_waiting.lock().extend(ready);
            }
        }
    }

    fn finish_dispatch(&self, client_task_id: ClientTaskId, backend_task_id: BackendTaskId) {
        let Some(task_lock) = self.tasks.get(&client_task_id) else { return };
        let endpoint_id = {
            let mut task = task_lock.write();
            task.time_sent = Some(now_secs());
            task.phase = TaskPhase::PendingAtBackend;
            task.backend_task_ids.insert(backend_task_id.clone());

            let eta = self.strategy.predict_eta(
                &self.predictors,
                &self.directory,
                &task.function_id,
                &task.endpoint_id,
                task.payload.len(),
                &HashMap::new(),
                self.latency_const,
            );
            task.eta = Some(eta);
            task.endpoint_id.clone()
        };

        self.pending_by_backend.insert(backend_task_id.clone(), client_task_id);
        self.pending_by_endpoint
            .entry(endpoint_id.clone())
            .or_insert_with(|| RwLock::new(HashSet::new()))
            .write()
            .insert(backend_task_id);
        self.last_task_eta.insert(endpoint_id, task_lock.read().eta.unwrap_or_else(now_secs));
    }

    /// `log_status`: ingest a backend status report (spec §4.4). Unknown
    /// backend ids are ignored with a warning (stale polls); duplicate
    /// terminal reports for an already-terminal task are no-ops (spec §9
    /// backup-suppression hook, and the `log_status` idempotence property).
    pub fn log_status(&self, backend_task_id: &BackendTaskId, status: BackendStatus) {
        let Some(client_task_id) = self.pending_by_backend.get(backend_task_id).map(|e| *e) else {
            warn!(backend_task_id = %backend_task_id, "log_status for unknown backend task id, ignoring");
            return;
        };
        let Some(task_lock) = self.tasks.get(&client_task_id) else { return };

        if task_lock.read().latest_status.is_terminal() {
            debug!(backend_task_id = %backend_task_id, "duplicate terminal status, suppressing");
            return;
        }

        match status {
            BackendStatus::Pending => {
                // No state change; PENDING never overwrites anything, and
                // there is nothing cached yet to overwrite in this branch.
            }
            BackendStatus::Result { value, runtime } => {
                let (function_id, group, payload_len, endpoint_id) = {
                    let t = task_lock.read();
                    let group = self.directory.group_of(&t.endpoint_id).unwrap_or_default().to_string();
                    (t.function_id.clone(), group, t.payload.len(), t.endpoint_id.clone())
                };
                if let Some(runtime) = runtime {
                    self.predictors.runtime.update(
                        ObservedTask { function_id: &function_id, group: &group, payload_len },
                        runtime,
                    );
                }
                {
                    let mut t = task_lock.write();
                    t.latest_status = TaskStatus::Result { value, runtime };
                }
                self.record_completed(backend_task_id);
                self.touch_last_result_time(&endpoint_id);
            }
            BackendStatus::Exception { reason } => {
                let endpoint_id = task_lock.read().endpoint_id.clone();
                {
                    let mut t = task_lock.write();
                    t.latest_status = TaskStatus::Exception { reason };
                }
                self.record_completed(backend_task_id);
                self.touch_last_result_time(&endpoint_id);
            }
        }
    }

    fn touch_last_result_time(&self, endpoint_id: &str) {
        if let Some(state) = self.endpoint_states.get(endpoint_id) {
            state.write().last_result_time = now_secs();
        }
    }

    /// `record_completed`: remove the task from both pending indices and
    /// refresh `queue_error[ep]` (spec §4.4).
    fn record_completed(&self, backend_task_id: &BackendTaskId) {
        let Some((_, client_task_id)) = self.pending_by_backend.remove(backend_task_id) else { return };
        let Some(task_lock) = self.tasks.get(&client_task_id) else { return };

        let (endpoint_id, task_eta) = {
            let mut t = task_lock.write();
            t.phase = TaskPhase::Terminal;
            (t.endpoint_id.clone(), t.eta.unwrap_or_else(now_secs))
        };

        let remaining = if let Some(set) = self.pending_by_endpoint.get(&endpoint_id) {
            let mut set = set.write();
            set.remove(backend_task_id);
            !set.is_empty()
        } else {
            false
        };

        if remaining {
            self.queue_error.insert(endpoint_id, now_secs() - task_eta);
        } else {
            self.queue_error.insert(endpoint_id, 0.0);
        }
    }

    /// `get_status`: `None` if the client id is unknown to this scheduler,
    /// otherwise the latest cached status (spec §4.4). The cache write side
    /// (`log_status`) already enforces monotonicity.
    pub fn get_status(&self, client_task_id: &ClientTaskId) -> Option<TaskStatus> {
        self.tasks.get(client_task_id).map(|t| t.read().latest_status.clone())
    }

    /// Backend task ids this client task has accumulated so far (possibly
    /// empty before dispatch, possibly >1 once backups are in play).
    pub fn translate_task_id(&self, client_task_id: &ClientTaskId) -> HashSet<BackendTaskId> {
        self.tasks
            .get(client_task_id)
            .map(|t| t.read().backend_task_ids.clone())
            .unwrap_or_default()
    }

    /// `blacklist`: adds `endpoint_id` to `function_id`'s exclusion set.
    pub fn blacklist(&self, function_id: FunctionId, endpoint_id: EndpointId) {
        self.blacklist
            .entry(function_id)
            .or_insert_with(|| RwLock::new(HashSet::new()))
            .write()
            .insert(endpoint_id);
    }

    pub fn drain_execution_log(&self) -> Vec<ExecutionLogEntry> {
        self.execution_log.lock().drain(..).collect()
    }

    pub fn pending_count(&self, endpoint_id: &str) -> usize {
        self.pending_by_endpoint.get(endpoint_id).map(|s| s.read().len()).unwrap_or(0)
    }

    /// Endpoint health watchdog tick for a single endpoint (spec §4.5).
    pub async fn watchdog_tick_one(&self, endpoint_id: &EndpointId, heartbeat_threshold: f64) {
        let Some(state_lock) = self.endpoint_states.get(endpoint_id) else { return };

        let record = match self.backend.endpoint_status(endpoint_id).await {
            Ok(r) => r,
            Err(e) => {
                warn!(endpoint_id = %endpoint_id, error = %e, "could not fetch endpoint status");
                None
            }
        };

        let mut state = state_lock.write();
        let reported_timestamp = record.as_ref().map(|r| r.timestamp).unwrap_or(0.0);
        let active_managers = record.as_ref().map(|r| r.active_managers).unwrap_or(state.active_managers);
        let age = now_secs() - reported_timestamp.max(state.last_result_time);

        if state.alive && age > heartbeat_threshold {
            state.alive = false;
            warn!(endpoint_id = %endpoint_id, age, "endpoint marked dead: heartbeat stale");
        } else if !state.alive && age <= heartbeat_threshold {
            state.alive = true;
            info!(endpoint_id = %endpoint_id, "endpoint revived: heartbeat fresh");
        }

        state.active_managers = active_managers;
        if state.temperature == crate::model::Temperature::Warm && active_managers == 0 {
            state.temperature = crate::model::Temperature::Cold;
        } else if state.temperature != crate::model::Temperature::Warm && active_managers > 0 {
            state.temperature = crate::model::Temperature::Warm;
        }
    }

    pub fn endpoint_alive(&self, endpoint_id: &str) -> Option<bool> {
        self.endpoint_states.get(endpoint_id).map(|s| s.read().alive)
    }

    pub fn endpoint_temperature(&self, endpoint_id: &str) -> Option<crate::model::Temperature> {
        self.endpoint_states.get(endpoint_id).map(|s| s.read().temperature)
    }
}
