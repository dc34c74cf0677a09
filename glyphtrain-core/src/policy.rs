//! Stopping policy: plateau/divergence guard evaluated once per training iteration.

use crate::config::PolicyConfig;
use serde::{Deserialize, Serialize};

/// Why a run was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserCancelled,
    Diverged,
    Completed,
}

/// Decision returned to the training loop after each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingDecision {
    Continue,
    Stop(StopReason),
}

/// Best error seen so far and how many iterations have been reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningMinimum {
    pub best_error: f64,
    pub callback_count: u64,
}

impl Default for RunningMinimum {
    fn default() -> Self {
        Self {
            best_error: f64::INFINITY,
            callback_count: 0,
        }
    }
}

/// Per-job stopping policy.
///
/// A run is never stopped for divergence during the first `patience` callbacks.
/// After that it stops once the current error exceeds the best error seen by
/// more than `margin`. Cancellation always wins.
#[derive(Debug, Clone)]
pub struct StoppingPolicy {
    pub patience: u64,
    pub margin: f64,
    pub max_iterations: Option<u64>,
    minimum: RunningMinimum,
}

impl StoppingPolicy {
    pub fn new(patience: u64, margin: f64) -> Self {
        Self {
            patience,
            margin,
            max_iterations: None,
            minimum: RunningMinimum::default(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.patience, config.margin).with_max_iterations(config.max_iterations)
    }

    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn minimum(&self) -> RunningMinimum {
        self.minimum
    }

    pub fn evaluate(&mut self, current_error: f64, cancel_requested: bool) -> StoppingDecision {
        self.minimum.best_error = self.minimum.best_error.min(current_error);
        self.minimum.callback_count += 1;

        if cancel_requested {
            StoppingDecision::Stop(StopReason::UserCancelled)
        } else if self.minimum.callback_count >= self.patience
            && self.minimum.best_error + self.margin < current_error
        {
            StoppingDecision::Stop(StopReason::Diverged)
        } else if self
            .max_iterations
            .is_some_and(|max| self.minimum.callback_count >= max)
        {
            StoppingDecision::Stop(StopReason::Completed)
        } else {
            StoppingDecision::Continue
        }
    }
}

impl Default for StoppingPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(policy: &mut StoppingPolicy, error: f64, times: usize) {
        for _ in 0..times {
            assert_eq!(policy.evaluate(error, false), StoppingDecision::Continue);
        }
    }

    #[test]
    fn test_starts_at_infinity() {
        let policy = StoppingPolicy::default();
        assert_eq!(policy.minimum().best_error, f64::INFINITY);
        assert_eq!(policy.minimum().callback_count, 0);
    }

    #[test]
    fn test_warmup_ignores_divergence() {
        let mut policy = StoppingPolicy::default();
        feed(&mut policy, 1.0, 10);
        assert_eq!(policy.evaluate(1000.0, false), StoppingDecision::Continue);
        assert_eq!(policy.minimum().best_error, 1.0);
    }

    #[test]
    fn test_divergence_after_warmup() {
        let mut policy = StoppingPolicy::default();
        feed(&mut policy, 3.0, 150);
        assert_eq!(
            policy.evaluate(6.0, false),
            StoppingDecision::Stop(StopReason::Diverged)
        );
        assert_eq!(policy.minimum().callback_count, 151);
    }

    #[test]
    fn test_threshold_is_inclusive_at_patience() {
        let mut policy = StoppingPolicy::default();
        feed(&mut policy, 3.0, 148);
        // 149th callback: still warming up.
        assert_eq!(policy.evaluate(6.0, false), StoppingDecision::Continue);
        // 150th callback: count reaches the threshold.
        assert_eq!(
            policy.evaluate(6.0, false),
            StoppingDecision::Stop(StopReason::Diverged)
        );
    }

    #[test]
    fn test_exact_margin_continues() {
        let mut policy = StoppingPolicy::default();
        feed(&mut policy, 3.0, 200);
        assert_eq!(policy.evaluate(5.0, false), StoppingDecision::Continue);
        assert_eq!(
            policy.evaluate(5.000001, false),
            StoppingDecision::Stop(StopReason::Diverged)
        );
    }

    #[test]
    fn test_cancel_wins_during_warmup() {
        let mut policy = StoppingPolicy::default();
        assert_eq!(
            policy.evaluate(0.5, true),
            StoppingDecision::Stop(StopReason::UserCancelled)
        );
    }

    #[test]
    fn test_cancel_wins_over_divergence() {
        let mut policy = StoppingPolicy::new(1, 0.0);
        policy.evaluate(1.0, false);
        assert_eq!(
            policy.evaluate(10.0, true),
            StoppingDecision::Stop(StopReason::UserCancelled)
        );
    }

    #[test]
    fn test_max_iterations_completes() {
        let mut policy = StoppingPolicy::new(150, 2.0).with_max_iterations(Some(3));
        feed(&mut policy, 0.4, 2);
        assert_eq!(
            policy.evaluate(0.3, false),
            StoppingDecision::Stop(StopReason::Completed)
        );
    }

    #[test]
    fn test_improvement_lowers_best_error() {
        let mut policy = StoppingPolicy::new(2, 2.0);
        feed(&mut policy, 10.0, 5);
        assert_eq!(policy.evaluate(1.0, false), StoppingDecision::Continue);
        // 10.0 was fine before, but is now well above the new best.
        assert_eq!(
            policy.evaluate(10.0, false),
            StoppingDecision::Stop(StopReason::Diverged)
        );
    }
}
