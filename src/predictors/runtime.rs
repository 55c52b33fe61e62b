//! Runtime predictor: `predict(function_id, group, payload) -> seconds`.
//!
//! Two variants, keyed by `(function_id, endpoint_group)` — grouping
//! amortizes learning across sibling endpoints that share a hardware class
//! (spec §4.1). `0.0` (or any non-positive prediction) is the documented
//! sentinel meaning "no data yet", consumed by strategies as "skip this
//! group in the exploit branch".

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::fit_least_squares;

type Key = (String, String);

/// A task's identity as seen by the runtime predictor's `update` call —
/// just enough to resolve the `(function_id, group)` key and payload length.
pub struct ObservedTask<'a> {
    pub function_id: &'a str,
    pub group: &'a str,
    pub payload_len: usize,
}

/// Shared interface implemented by both predictor variants (spec §4.1).
/// `predict` and `update` take `&self`: state is interior-mutable so the
/// predictor can be shared across the dispatcher, strategies, and the
/// status-ingestion path without an outer lock.
pub trait RuntimePredictor: Send + Sync {
    fn predict(&self, function_id: &str, group: &str, payload_len: usize) -> f64;
    fn update(&self, task: ObservedTask<'_>, observed_runtime: f64);
}

/// Bounded-window rolling average, default window length 3.
pub struct RollingAveragePredictor {
    last_n: usize,
    windows: DashMap<Key, RwLock<VecDeque<f64>>>,
}

impl RollingAveragePredictor {
    pub fn new(last_n: usize) -> Self {
        Self {
            last_n: last_n.max(1),
            windows: DashMap::new(),
        }
    }
}

impl Default for RollingAveragePredictor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RuntimePredictor for RollingAveragePredictor {
    fn predict(&self, function_id: &str, group: &str, _payload_len: usize) -> f64 {
        let key = (function_id.to_string(), group.to_string());
        match self.windows.get(&key) {
            Some(window) => {
                let window = window.read();
                if window.is_empty() {
                    0.0
                } else {
                    window.iter().sum::<f64>() / window.len() as f64
                }
            }
            None => 0.0,
        }
    }

    fn update(&self, task: ObservedTask<'_>, observed_runtime: f64) {
        let key = (task.function_id.to_string(), task.group.to_string());
        let entry = self
            .windows
            .entry(key)
            .or_insert_with(|| RwLock::new(VecDeque::new()));
        let mut window = entry.write();
        window.push_back(observed_runtime);
        while window.len() > self.last_n {
            window.pop_front();
        }
    }
}

/// Linear regression over a feature map of payload length.
///
/// The source carries a bug here: one variant featurizes with `x ** 2`
/// (squared length) and `2 * x`, another with `x XOR 2`. Per spec §9 this is
/// a deliberate departure, not a silent pick of either buggy variant:
/// `φ(x) = [1, x, x², log(1+x)]`.
pub struct InputLengthPredictor {
    train_every: usize,
    state: DashMap<Key, RwLock<RegressionState>>,
}

struct RegressionState {
    lengths: Vec<f64>,
    runtimes: Vec<f64>,
    weights: Vec<f64>,
    updates_since_train: usize,
}

impl RegressionState {
    fn new() -> Self {
        Self {
            lengths: Vec::new(),
            runtimes: Vec::new(),
            weights: vec![0.0; FEATURE_COUNT],
            updates_since_train: 0,
        }
    }
}

const FEATURE_COUNT: usize = 4;

fn featurize(x: f64) -> Vec<f64> {
    vec![1.0, x, x * x, (1.0 + x).ln()]
}

impl InputLengthPredictor {
    pub fn new(train_every: usize) -> Self {
        Self {
            train_every: train_every.max(1),
            state: DashMap::new(),
        }
    }
}

impl Default for InputLengthPredictor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RuntimePredictor for InputLengthPredictor {
    fn predict(&self, function_id: &str, group: &str, payload_len: usize) -> f64 {
        let key = (function_id.to_string(), group.to_string());
        match self.state.get(&key) {
            Some(entry) => {
                let state = entry.read();
                let phi = featurize(payload_len as f64);
                let pred: f64 = state.weights.iter().zip(phi.iter()).map(|(w, x)| w * x).sum();
                // With <4 samples the pseudoinverse is still defined, but a
                // non-positive prediction means "no data yet" (spec §4.1).
                if pred > 0.0 {
                    pred
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn update(&self, task: ObservedTask<'_>, observed_runtime: f64) {
        let key = (task.function_id.to_string(), task.group.to_string());
        let entry = self.state.entry(key).or_insert_with(|| RwLock::new(RegressionState::new()));
        let mut state = entry.write();
        state.lengths.push(task.payload_len as f64);
        state.runtimes.push(observed_runtime);
        state.updates_since_train += 1;

        if state.updates_since_train >= self.train_every {
            let rows: Vec<Vec<f64>> = state.lengths.iter().map(|&x| featurize(x)).collect();
            let targets = state.runtimes.clone();
            state.weights = fit_least_squares(&rows, &targets, FEATURE_COUNT);
            state.updates_since_train = 0;
        }
    }
}

/// Maps a configured predictor name to a constructor, the way
/// `init_runtime_predictor` does in `predictors.py`.
pub fn init_runtime_predictor(name: &str, last_n: usize, train_every: usize) -> Box<dyn RuntimePredictor> {
    let name = name.trim().to_lowercase();
    if name.ends_with("average") || name.ends_with("avg") {
        Box::new(RollingAveragePredictor::new(last_n))
    } else if name.ends_with("length") || name.ends_with("size") {
        Box::new(InputLengthPredictor::new(train_every))
    } else {
        // Unknown predictor names fall back to the conservative default
        // rather than panicking a long-lived server process.
        Box::new(RollingAveragePredictor::new(last_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_sentinel_is_zero_when_empty() {
        let p = RollingAveragePredictor::new(3);
        assert_eq!(p.predict("f", "g", 10), 0.0);
    }

    #[test]
    fn rolling_average_equals_mean_of_last_n() {
        let p = RollingAveragePredictor::new(3);
        for rt in [1.0, 2.0, 3.0, 4.0] {
            p.update(ObservedTask { function_id: "f", group: "g", payload_len: 0 }, rt);
        }
        // window should now hold [2.0, 3.0, 4.0]
        assert_eq!(p.predict("f", "g", 0), 3.0);
    }

    #[test]
    fn rolling_average_keys_are_independent() {
        let p = RollingAveragePredictor::new(3);
        p.update(ObservedTask { function_id: "f", group: "a", payload_len: 0 }, 10.0);
        p.update(ObservedTask { function_id: "f", group: "b", payload_len: 0 }, 2.0);
        assert_eq!(p.predict("f", "a", 0), 10.0);
        assert_eq!(p.predict("f", "b", 0), 2.0);
    }

    #[test]
    fn input_length_predicts_zero_before_training() {
        let p = InputLengthPredictor::new(2);
        p.update(ObservedTask { function_id: "f", group: "g", payload_len: 100 }, 5.0);
        // train_every is 2, so one update does not trigger a refit yet.
        assert_eq!(p.predict("f", "g", 100), 0.0);
    }

    #[test]
    fn input_length_predicts_after_training() {
        let p = InputLengthPredictor::new(1);
        for len in [10usize, 20, 30, 40] {
            p.update(
                ObservedTask { function_id: "f", group: "g", payload_len: len },
                len as f64 * 0.1,
            );
        }
        let pred = p.predict("f", "g", 25);
        assert!(pred > 0.0, "expected a positive prediction, got {pred}");
    }
}
