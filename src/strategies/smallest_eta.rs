use std::sync::Arc;

use super::{runtime_by_group, ChooseRequest, EndpointDirectory, GroupCycler, Predictors, Strategy};
use crate::error::{SchedulerError, SchedulerResult};
use crate::model::EndpointChoice;

/// Same exploration phase as FastestEndpoint; in exploitation, chooses the
/// endpoint minimizing the full ETA formula rather than just group runtime
/// (spec §4.3).
pub struct SmallestEta {
    directory: Arc<EndpointDirectory>,
    predictors: Predictors,
    cycler: GroupCycler,
    latency_const: f64,
}

impl SmallestEta {
    pub fn new(directory: Arc<EndpointDirectory>, predictors: Predictors, latency_const: f64) -> Self {
        Self {
            directory,
            predictors,
            cycler: GroupCycler::new(),
            latency_const,
        }
    }
}

impl Strategy for SmallestEta {
    fn choose_endpoint(&self, req: ChooseRequest<'_>) -> SchedulerResult<EndpointChoice> {
        let groups = self.directory.available_groups(&req.exclude);
        if groups.is_empty() {
            return Err(SchedulerError::StrategyExhausted {
                function_id: req.function_id.clone(),
            });
        }

        let times = runtime_by_group(&self.predictors, req.function_id, &groups, req.payload_len);
        let groups_with_times: std::collections::HashSet<&str> =
            times.iter().map(|(g, _)| g.as_str()).collect();
        let next_idx = self.cycler.peek_group_index(req.function_id);

        if next_idx < groups.len() || times.is_empty() {
            self.cycler.next_group_index(req.function_id);
            let group = &groups[next_idx % groups.len()];
            let candidates = self.directory.endpoints_in_group(group);
            let endpoint_id = self
                .cycler
                .next_in_group(req.function_id, group, &candidates, &req.exclude)
                .ok_or_else(|| SchedulerError::StrategyExhausted {
                    function_id: req.function_id.clone(),
                })?;
            return Ok(EndpointChoice { endpoint_id, eta: None });
        }

        // Exploitation: argmin ETA over every non-excluded endpoint whose
        // group has a prediction.
        let mut best: Option<(String, f64)> = None;
        for endpoint_id in self.directory.ids() {
            if req.exclude.contains(endpoint_id) {
                continue;
            }
            let group = self.directory.group_of(endpoint_id).unwrap_or_default();
            if !groups_with_times.contains(group) {
                continue;
            }
            let eta = self.predict_eta(
                &self.predictors,
                &self.directory,
                req.function_id,
                endpoint_id,
                req.payload_len,
                &req.files_by_src,
                self.latency_const,
            );
            match &best {
                Some((_, best_eta)) if eta >= *best_eta => {}
                _ => best = Some((endpoint_id.clone(), eta)),
            }
        }

        best.map(|(endpoint_id, eta)| EndpointChoice { endpoint_id, eta: Some(eta) })
            .ok_or_else(|| SchedulerError::StrategyExhausted {
                function_id: req.function_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointConfig;
    use crate::predictors::runtime::{ObservedTask, RollingAveragePredictor, RuntimePredictor};
    use crate::predictors::TransferPredictor;

    fn endpoint(name: &str, group: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            group: group.to_string(),
            transfer_group: group.to_string(),
            globus: String::new(),
            launch_time: 0.0,
        }
    }

    #[test]
    fn exploitation_minimizes_runtime_plus_latency_when_queue_and_files_are_trivial() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![
                ("A".to_string(), endpoint("A", "g1")),
                ("B".to_string(), endpoint("B", "g2")),
            ])
            .unwrap(),
        );
        let rp = RollingAveragePredictor::new(3);
        rp.update(ObservedTask { function_id: "f", group: "g1", payload_len: 0 }, 8.0);
        rp.update(ObservedTask { function_id: "f", group: "g2", payload_len: 0 }, 2.0);

        let predictors = Predictors {
            runtime: Arc::new(rp),
            transfer: Arc::new(TransferPredictor::default()),
            queue_fn: Arc::new(|_| crate::model::now_secs()),
            launch_fn: Arc::new(|_| 0.0),
        };
        let strategy = SmallestEta::new(directory, predictors, 0.5);
        let func = "f".to_string();

        // Burn through the exploration phase (2 groups -> 2 calls).
        for _ in 0..2 {
            strategy.choose_endpoint(ChooseRequest::new(&func, 0)).unwrap();
        }

        let choice = strategy.choose_endpoint(ChooseRequest::new(&func, 0)).unwrap();
        assert_eq!(choice.endpoint_id, "B");
    }

    #[test]
    fn queue_delay_drives_eta_for_single_endpoint() {
        let directory = Arc::new(EndpointDirectory::new(vec![("A".to_string(), endpoint("A", "g1"))]).unwrap());
        let rp = RollingAveragePredictor::new(3);
        rp.update(ObservedTask { function_id: "f", group: "g1", payload_len: 0 }, 5.0);

        let predictors = Predictors {
            runtime: Arc::new(rp),
            transfer: Arc::new(TransferPredictor::default()),
            queue_fn: Arc::new(|_| 0.0),
            launch_fn: Arc::new(|_| 0.0),
        };
        let strategy = SmallestEta::new(directory, predictors, 0.5);
        let func = "f".to_string();

        strategy.choose_endpoint(ChooseRequest::new(&func, 0)).unwrap(); // exploration
        let choice = strategy.choose_endpoint(ChooseRequest::new(&func, 0)).unwrap();
        assert_eq!(choice.endpoint_id, "A");
        // ETA = launch(0) + max(queue=0, now+transfer(0)) + runtime(5) + latency(0.5)
        // queue_fn returns 0 here so max() picks `now + 0`; just assert an ETA was produced.
        assert!(choice.eta.is_some());
    }
}
