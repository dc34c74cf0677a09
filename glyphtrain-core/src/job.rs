//! Training job: the iterative optimization loop run on the worker context.

use crate::error::TrainerError;
use crate::model::Network;
use crate::policy::{StopReason, StoppingDecision, StoppingPolicy};
use crate::request::TrainingRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error metric produced by one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u64,
    pub error: f64,
}

/// Terminal reason of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    UserCancelled,
    Diverged,
    Completed,
    Failed(String),
}

impl From<StopReason> for OutcomeReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::UserCancelled => Self::UserCancelled,
            StopReason::Diverged => Self::Diverged,
            StopReason::Completed => Self::Completed,
        }
    }
}

/// Summary handed back to the supervisor when a job ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub reason: OutcomeReason,
    /// Iterations whose error reached the stopping policy.
    pub iterations: u64,
    pub best_error: Option<f64>,
    pub last_error: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.reason, OutcomeReason::Failed(_))
    }
}

/// A validated training run, ready to execute on a worker.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    id: Uuid,
    request: TrainingRequest,
    log_every: u64,
    /// Completed iterations, readable while the job runs on another thread.
    progress: Arc<AtomicU64>,
}

impl TrainingJob {
    /// Fails with a configuration error before anything is spawned when the
    /// request has no fonts or no characters.
    pub fn new(request: TrainingRequest) -> Result<Self, TrainerError> {
        request.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            request,
            log_every: 0,
            progress: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_log_every(mut self, log_every: u64) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &TrainingRequest {
        &self.request
    }

    /// Shared counter of completed iterations. Survives a panicking worker.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    /// Outcome for a job that failed before its first iteration.
    pub fn failed_before_start(&self, error: &TrainerError) -> JobOutcome {
        let now = Utc::now();
        warn!(job_id = %self.id, error = %error, "Training job could not start");
        JobOutcome {
            job_id: self.id,
            reason: OutcomeReason::Failed(error.to_string()),
            iterations: 0,
            best_error: None,
            last_error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Run iterations until the policy says stop or the network fails.
    ///
    /// Blocks the calling thread; `cancel` is checked once per iteration.
    pub fn run(
        &self,
        model: &mut dyn Network,
        mut policy: StoppingPolicy,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let started_at = Utc::now();
        let mut iterations = 0u64;
        let mut last_error = None;

        info!(
            job_id = %self.id,
            fonts = self.request.fonts().len(),
            characters = self.request.characters().len(),
            "Training job started"
        );

        let reason = loop {
            let result = match self.step(model, iterations) {
                Ok(result) => result,
                Err(e) => {
                    warn!(job_id = %self.id, iteration = iterations, error = %e, "Training iteration failed");
                    break OutcomeReason::Failed(e.to_string());
                }
            };
            iterations += 1;
            self.progress.store(iterations, Ordering::Relaxed);
            last_error = Some(result.error);

            if self.log_every > 0 && iterations % self.log_every == 0 {
                debug!(
                    job_id = %self.id,
                    iteration = result.iteration,
                    error = result.error,
                    best_error = policy.minimum().best_error,
                    "Training progress"
                );
            }

            match policy.evaluate(result.error, cancel.is_cancelled()) {
                StoppingDecision::Continue => {}
                StoppingDecision::Stop(reason) => break OutcomeReason::from(reason),
            }
        };

        let best = policy.minimum().best_error;
        let outcome = JobOutcome {
            job_id: self.id,
            reason,
            iterations,
            best_error: best.is_finite().then_some(best),
            last_error,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            job_id = %self.id,
            reason = ?outcome.reason,
            iterations = outcome.iterations,
            best_error = ?outcome.best_error,
            "Training job finished"
        );
        outcome
    }

    fn step(&self, model: &mut dyn Network, iteration: u64) -> Result<IterationResult, TrainerError> {
        let error = model.train_iteration(&self.request, iteration)?;
        if error.is_nan() || error < 0.0 {
            return Err(TrainerError::iteration(
                iteration,
                format!("invalid error metric {error}"),
            ));
        }
        Ok(IterationResult { iteration, error })
    }
}
