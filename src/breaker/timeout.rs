//! Adaptive per-provider timeout controller (§4.7).
//!
//! Re-evaluated every 60s from the maintenance loop, or left untouched
//! between evaluations — `record` only accumulates samples, it never
//! itself changes the timeout outside `maybe_reevaluate`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ALPHA: f64 = 0.1;
const REEVALUATE_EVERY: Duration = Duration::from_secs(60);
const MIN_SAMPLES: usize = 10;
const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    Adaptive,
    Quantile,
    /// Falls back to `Adaptive` (§4.7, §9).
    Predictive,
}

struct State {
    current_ms: u64,
    history: VecDeque<f64>,
    last_evaluated: Instant,
}

pub struct AdaptiveTimeoutController {
    strategy: TimeoutStrategy,
    base: Duration,
    min: Duration,
    max: Duration,
    state: Mutex<State>,
    current_ms_atomic: AtomicU64,
}

impl AdaptiveTimeoutController {
    pub fn new(strategy: TimeoutStrategy, base: Duration, min: Duration, max: Duration) -> Self {
        let current_ms = base.as_millis() as u64;
        Self {
            strategy,
            base,
            min,
            max,
            state: Mutex::new(State {
                current_ms,
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                last_evaluated: Instant::now(),
            }),
            current_ms_atomic: AtomicU64::new(current_ms),
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms_atomic.load(Ordering::Relaxed))
    }

    pub fn record(&self, latency_ms: f64) {
        let mut state = self.state.lock();
        state.history.push_back(latency_ms);
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.current_ms = self.base.as_millis() as u64;
        state.last_evaluated = Instant::now();
        self.current_ms_atomic.store(state.current_ms, Ordering::Relaxed);
    }

    /// Recomputes the timeout if ≥60s have elapsed and ≥10 samples exist
    /// (§4.7); otherwise a no-op.
    pub fn maybe_reevaluate(&self) {
        let mut state = self.state.lock();
        if state.last_evaluated.elapsed() < REEVALUATE_EVERY || state.history.len() < MIN_SAMPLES {
            return;
        }
        state.last_evaluated = Instant::now();

        let base_ms = self.base.as_millis() as f64;
        let current_ms = state.current_ms as f64;
        let new_ms = match self.strategy {
            TimeoutStrategy::Adaptive | TimeoutStrategy::Predictive => {
                let mean: f64 = state.history.iter().sum::<f64>() / state.history.len() as f64;
                if mean < 0.5 * base_ms {
                    current_ms * (1.0 - ALPHA)
                } else if mean > 1.5 * base_ms {
                    current_ms * (1.0 + ALPHA)
                } else {
                    current_ms + (base_ms - current_ms) * ALPHA * 0.5
                }
            },
            TimeoutStrategy::Quantile => {
                let p95 = percentile(&state.history, 0.95);
                p95 * 1.5
            },
        };

        let clamped = new_ms.clamp(self.min.as_millis() as f64, self.max.as_millis() as f64);
        state.current_ms = clamped as u64;
        self.current_ms_atomic.store(state.current_ms, Ordering::Relaxed);
    }
}

fn percentile(samples: &VecDeque<f64>, p: f64) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinks_timeout_when_latency_is_low() {
        let controller = AdaptiveTimeoutController::new(
            TimeoutStrategy::Adaptive,
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(120),
        );
        for _ in 0..20 {
            controller.record(50.0);
        }
        {
            let mut state = controller.state.lock();
            state.last_evaluated = Instant::now() - REEVALUATE_EVERY - Duration::from_secs(1);
        }
        controller.maybe_reevaluate();
        assert!(controller.current() < Duration::from_secs(30));
    }

    #[test]
    fn clamps_to_configured_bounds() {
        let controller = AdaptiveTimeoutController::new(
            TimeoutStrategy::Adaptive,
            Duration::from_secs(30),
            Duration::from_secs(10),
            Duration::from_secs(40),
        );
        for _ in 0..20 {
            controller.record(1.0);
        }
        for _ in 0..10 {
            {
                let mut state = controller.state.lock();
                state.last_evaluated = Instant::now() - REEVALUATE_EVERY - Duration::from_secs(1);
            }
            controller.maybe_reevaluate();
        }
        assert!(controller.current() >= Duration::from_secs(10));
    }
}
