use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ChooseRequest, EndpointDirectory, Strategy};
use crate::error::{SchedulerError, SchedulerResult};
use crate::model::EndpointChoice;

/// Stateful counter modulo the non-excluded endpoint list. No payload
/// sensitivity (spec §4.3).
pub struct RoundRobin {
    directory: Arc<EndpointDirectory>,
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new(directory: Arc<EndpointDirectory>) -> Self {
        Self {
            directory,
            next: AtomicUsize::new(0),
        }
    }
}

impl Strategy for RoundRobin {
    fn choose_endpoint(&self, req: ChooseRequest<'_>) -> SchedulerResult<EndpointChoice> {
        let ids = self.directory.ids();
        if req.exclude.len() >= ids.len() {
            return Err(SchedulerError::StrategyExhausted {
                function_id: req.function_id.clone(),
            });
        }

        for _ in 0..ids.len() {
            let i = self.next.fetch_add(1, Ordering::SeqCst) % ids.len();
            let candidate = &ids[i];
            if !req.exclude.contains(candidate) {
                return Ok(EndpointChoice {
                    endpoint_id: candidate.clone(),
                    eta: None,
                });
            }
        }
        Err(SchedulerError::StrategyExhausted {
            function_id: req.function_id.clone(),
        })
    }
}
