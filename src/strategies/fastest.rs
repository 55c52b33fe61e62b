use std::sync::Arc;

use super::{argmin_stable, runtime_by_group, ChooseRequest, EndpointDirectory, GroupCycler, Predictors, Strategy};
use crate::error::{SchedulerError, SchedulerResult};
use crate::model::EndpointChoice;

/// Group-level exploration before exploitation, round-robin within the
/// chosen group (spec §4.3).
pub struct FastestEndpoint {
    directory: Arc<EndpointDirectory>,
    predictors: Predictors,
    cycler: GroupCycler,
}

impl FastestEndpoint {
    pub fn new(directory: Arc<EndpointDirectory>, predictors: Predictors) -> Self {
        Self {
            directory,
            predictors,
            cycler: GroupCycler::new(),
        }
    }
}

impl Strategy for FastestEndpoint {
    fn choose_endpoint(&self, req: ChooseRequest<'_>) -> SchedulerResult<EndpointChoice> {
        let groups = self.directory.available_groups(&req.exclude);
        if groups.is_empty() {
            return Err(SchedulerError::StrategyExhausted {
                function_id: req.function_id.clone(),
            });
        }

        let times = runtime_by_group(&self.predictors, req.function_id, &groups, req.payload_len);
        let next_idx = self.cycler.peek_group_index(req.function_id);

        let group = if next_idx < groups.len() || times.is_empty() {
            self.cycler.next_group_index(req.function_id);
            groups[next_idx % groups.len()].clone()
        } else {
            argmin_stable(&times).expect("times checked non-empty above").0.clone()
        };

        let candidates = self.directory.endpoints_in_group(&group);
        let endpoint_id = self
            .cycler
            .next_in_group(req.function_id, &group, &candidates, &req.exclude)
            .ok_or_else(|| SchedulerError::StrategyExhausted {
                function_id: req.function_id.clone(),
            })?;

        Ok(EndpointChoice { endpoint_id, eta: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointConfig;
    use crate::predictors::runtime::{ObservedTask, RollingAveragePredictor, RuntimePredictor};
    use crate::predictors::TransferPredictor;
    use std::collections::HashSet;

    fn endpoint(name: &str, group: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            group: group.to_string(),
            transfer_group: group.to_string(),
            globus: String::new(),
            launch_time: 0.0,
        }
    }

    fn predictors_with_runtimes(runtimes: &[(&str, &str, f64)]) -> Predictors {
        let rp = RollingAveragePredictor::new(3);
        for (func, group, rt) in runtimes {
            rp.update(
                ObservedTask { function_id: func, group, payload_len: 0 },
                *rt,
            );
        }
        Predictors {
            runtime: Arc::new(rp),
            transfer: Arc::new(TransferPredictor::default()),
            queue_fn: Arc::new(|_| crate::model::now_secs()),
            launch_fn: Arc::new(|_| 0.0),
        }
    }

    #[test]
    fn explores_then_exploits_fastest_group() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![
                ("A".to_string(), endpoint("A", "g1")),
                ("B".to_string(), endpoint("B", "g2")),
            ])
            .unwrap(),
        );
        let predictors = predictors_with_runtimes(&[("f", "g1", 10.0), ("f", "g2", 2.0)]);
        let strategy = FastestEndpoint::new(directory, predictors);
        let func = "f".to_string();

        let mut chosen = Vec::new();
        for _ in 0..4 {
            let req = ChooseRequest::new(&func, 0);
            chosen.push(strategy.choose_endpoint(req).unwrap().endpoint_id);
        }
        assert_eq!(chosen, vec!["A", "B", "B", "B"]);
    }

    #[test]
    fn exploration_visits_every_group_before_any_repeat() {
        let directory = Arc::new(
            EndpointDirectory::new(vec![
                ("A".to_string(), endpoint("A", "g1")),
                ("B".to_string(), endpoint("B", "g2")),
                ("C".to_string(), endpoint("C", "g3")),
            ])
            .unwrap(),
        );
        // No runtime samples at all yet: every call stays in exploration.
        let predictors = predictors_with_runtimes(&[]);
        let strategy = FastestEndpoint::new(directory, predictors);
        let func = "f".to_string();

        let mut seen_groups = HashSet::new();
        for _ in 0..3 {
            let req = ChooseRequest::new(&func, 0);
            let ep = strategy.choose_endpoint(req).unwrap().endpoint_id;
            assert!(seen_groups.insert(ep), "endpoint visited twice during exploration");
        }
    }
}
