//! Endpoint-selection strategies (spec §4.3).
//!
//! The strategy/scheduler relationship is cyclic in the original Python
//! (`Strategy.predict_ETA` calls back into queue/cold-start state the
//! scheduler owns). Per spec §9 this is broken with an explicit
//! `Predictors` record of injected callbacks rather than a back-reference,
//! which keeps strategies independently testable with mock predictors.

mod fastest;
mod round_robin;
mod smallest_eta;

pub use fastest::FastestEndpoint;
pub use round_robin::RoundRobin;
pub use smallest_eta::SmallestEta;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{EndpointChoice, EndpointConfig, EndpointId, FunctionId};
use crate::predictors::{RuntimePredictor, TransferPredictor};

/// Estimated fixed per-task backend overhead (spec §4.3: ≈0.3-0.5s).
pub const DEFAULT_LATENCY_CONST: f64 = 0.3;

/// Callbacks a strategy needs from the scheduler, injected at construction
/// instead of via a back-reference (spec §9 "Cyclic callbacks"). `Clone` is
/// cheap (every field is an `Arc`), which lets `SchedulerCore` hand a copy to
/// the strategy at construction and keep one for its own dispatch-time ETA
/// bookkeeping.
#[derive(Clone)]
pub struct Predictors {
    pub runtime: Arc<dyn RuntimePredictor>,
    pub transfer: Arc<TransferPredictor>,
    /// `queue_delay(endpoint) -> wall_clock_seconds`
    pub queue_fn: Arc<dyn Fn(&str) -> f64 + Send + Sync>,
    /// `launch(endpoint) -> seconds`, 0 unless the endpoint is COLD.
    pub launch_fn: Arc<dyn Fn(&str) -> f64 + Send + Sync>,
}

/// Immutable, insertion-ordered view of the configured endpoint fleet.
/// Endpoints are created at startup and never destroyed (spec §3), so a
/// plain ordered map suffices; order matters for round-robin fairness and
/// group tie-breaking.
pub struct EndpointDirectory {
    order: Vec<EndpointId>,
    by_id: HashMap<EndpointId, EndpointConfig>,
}

impl EndpointDirectory {
    pub fn new(endpoints: Vec<(EndpointId, EndpointConfig)>) -> SchedulerResult<Self> {
        if endpoints.is_empty() {
            return Err(SchedulerError::Configuration(
                "endpoint fleet must not be empty".to_string(),
            ));
        }
        let order = endpoints.iter().map(|(id, _)| id.clone()).collect();
        let by_id = endpoints.into_iter().collect();
        Ok(Self { order, by_id })
    }

    pub fn ids(&self) -> &[EndpointId] {
        &self.order
    }

    pub fn get(&self, id: &str) -> Option<&EndpointConfig> {
        self.by_id.get(id)
    }

    pub fn group_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(|c| c.group.as_str())
    }

    /// The transfer-group cohort `id` belongs to (spec §3/§4.2) — distinct
    /// from `group_of`'s runtime-hardware cohort, and the key the transfer
    /// predictor is actually indexed by.
    pub fn transfer_group_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(|c| c.transfer_group.as_str())
    }

    /// Distinct groups, in the order their first member appears in config.
    pub fn groups_in_order(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();
        for id in &self.order {
            let group = &self.by_id[id].group;
            if seen.insert(group.clone()) {
                groups.push(group.clone());
            }
        }
        groups
    }

    /// Endpoints belonging to `group`, in configured order.
    pub fn endpoints_in_group(&self, group: &str) -> Vec<EndpointId> {
        self.order
            .iter()
            .filter(|id| self.by_id[*id].group == group)
            .cloned()
            .collect()
    }

    /// Groups that still have at least one non-excluded member.
    pub(crate) fn available_groups(&self, exclude: &HashSet<EndpointId>) -> Vec<String> {
        self.groups_in_order()
            .into_iter()
            .filter(|g| self.endpoints_in_group(g).iter().any(|e| !exclude.contains(e)))
            .collect()
    }
}

/// Arguments common to every `choose_endpoint` call.
pub struct ChooseRequest<'a> {
    pub function_id: &'a FunctionId,
    pub payload_len: usize,
    /// Declared input files, keyed by a caller-chosen handle, each carrying
    /// its source transfer-group and total size. `None`/empty means no
    /// staging is required.
    pub files_by_src: HashMap<String, (String, u64)>,
    pub exclude: HashSet<EndpointId>,
}

impl<'a> ChooseRequest<'a> {
    pub fn new(function_id: &'a FunctionId, payload_len: usize) -> Self {
        Self {
            function_id,
            payload_len,
            files_by_src: HashMap::new(),
            exclude: HashSet::new(),
        }
    }
}

/// Interface implemented by RoundRobin, FastestEndpoint, and SmallestEta.
pub trait Strategy: Send + Sync {
    fn choose_endpoint(&self, req: ChooseRequest<'_>) -> SchedulerResult<EndpointChoice>;

    /// ETA formula shared by SmallestEta and the dispatcher's bookkeeping:
    /// `launch(ep) + max(queue_delay(ep), now + transfer(files, ep)) +
    /// runtime(func, group(ep), payload) + LATENCY_CONST` (spec §4.3).
    /// Queue wait and data staging proceed in parallel, so only the slower
    /// of the two is counted.
    fn predict_eta(
        &self,
        predictors: &Predictors,
        directory: &EndpointDirectory,
        function_id: &str,
        endpoint_id: &str,
        payload_len: usize,
        files_by_src: &HashMap<String, (String, u64)>,
        latency_const: f64,
    ) -> f64 {
        let group = directory.group_of(endpoint_id).unwrap_or_default();
        let dst_transfer_group = directory.transfer_group_of(endpoint_id).unwrap_or_default();
        let t_launch = (predictors.launch_fn)(endpoint_id);
        let t_pending = (predictors.queue_fn)(endpoint_id);
        let t_transfer = crate::model::now_secs() + predictors.transfer.predict(files_by_src, dst_transfer_group);
        let t_run = predictors.runtime.predict(function_id, group, payload_len);

        t_launch + t_pending.max(t_transfer) + t_run + latency_const
    }
}

/// Shared "try each group once, then repeat" + "round-robin within a group"
/// cycling state used identically by FastestEndpoint and SmallestEta.
pub(crate) struct GroupCycler {
    next_group: DashMap<FunctionId, AtomicUsize>,
    next_endpoint: DashMap<(FunctionId, String), AtomicUsize>,
}

impl GroupCycler {
    pub(crate) fn new() -> Self {
        Self {
            next_group: DashMap::new(),
            next_endpoint: DashMap::new(),
        }
    }

    fn next_group_index(&self, function_id: &str) -> usize {
        self.next_group
            .entry(function_id.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }

    fn peek_group_index(&self, function_id: &str) -> usize {
        self.next_group
            .entry(function_id.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .load(Ordering::SeqCst)
    }

    /// Round-robin the next non-excluded endpoint within `group` for `function_id`.
    fn next_in_group(
        &self,
        function_id: &str,
        group: &str,
        candidates: &[EndpointId],
        exclude: &HashSet<EndpointId>,
    ) -> Option<EndpointId> {
        if candidates.is_empty() {
            return None;
        }
        let key = (function_id.to_string(), group.to_string());
        let counter = self.next_endpoint.entry(key).or_insert_with(|| AtomicUsize::new(0));
        for _ in 0..candidates.len() {
            let i = counter.fetch_add(1, Ordering::SeqCst) % candidates.len();
            let candidate = &candidates[i];
            if !exclude.contains(candidate) {
                return Some(candidate.clone());
            }
        }
        None
    }
}

/// Gathers `(group, predicted_runtime)` for every available group, dropping
/// groups with no prediction yet (the `t > 0.0` filter from `strategies.py`),
/// preserving group order so ties resolve to the earliest-configured group.
pub(crate) fn runtime_by_group(
    predictors: &Predictors,
    function_id: &str,
    groups: &[String],
    payload_len: usize,
) -> Vec<(String, f64)> {
    groups
        .iter()
        .map(|g| (g.clone(), predictors.runtime.predict(function_id, g, payload_len)))
        .filter(|(_, t)| *t > 0.0)
        .collect()
}

/// Smallest-time entry in `times`, keeping the first (earliest-configured)
/// group on ties.
pub(crate) fn argmin_stable(times: &[(String, f64)]) -> Option<&(String, f64)> {
    times.iter().fold(None, |best, cur| match best {
        None => Some(cur),
        Some(b) if cur.1 < b.1 => Some(cur),
        Some(b) => Some(b),
    })
}

/// Maps a configured strategy name to a constructor (`init_strategy` in
/// `strategies.py`).
pub fn init_strategy(
    name: &str,
    directory: Arc<EndpointDirectory>,
    predictors: Predictors,
    latency_const: f64,
) -> SchedulerResult<Box<dyn Strategy>> {
    let name = name.trim().to_lowercase();
    if name == "round-robin" || name == "rr" {
        Ok(Box::new(RoundRobin::new(directory)))
    } else if name.starts_with("fastest") {
        Ok(Box::new(FastestEndpoint::new(directory, predictors)))
    } else if name.ends_with("eta") {
        Ok(Box::new(SmallestEta::new(directory, predictors, latency_const)))
    } else {
        Err(SchedulerError::Configuration(format!("unknown strategy: {name}")))
    }
}
