//! Training supervisor: job lifecycle, cancellation and model hand-off.
//!
//! The supervisor lives on the reporting context and is only ever touched
//! through `&mut self`. Work runs on tokio's blocking pool (the worker
//! context); its result comes back as a [`WorkerReport`] that is sent only
//! after the worker closure has returned, and is applied with
//! [`Supervisor::apply`].

use crate::config::TrainerConfig;
use crate::error::TrainerError;
use crate::job::{JobOutcome, OutcomeReason, TrainingJob};
use crate::model::{LabeledSample, ModelStore, Network, NetworkFactory};
use crate::policy::StoppingPolicy;
use crate::request::{CharacterSet, TrainingRequest};
use crate::result_sink::{Accuracy, ResultSink, accuracy_label};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Label shown while an evaluation is pending or running.
pub const TESTING_LABEL: &str = "Testing...";

/// Lifecycle of the training job as seen by the reporting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
}

impl TrainingState {
    /// A job is on the worker context.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

/// Button captions exposed to the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonLabel {
    StartTraining,
    StopTraining,
    AddAllFonts,
    RemoveAllFonts,
}

impl ButtonLabel {
    pub fn text(self) -> &'static str {
        match self {
            Self::StartTraining => "Start Training",
            Self::StopTraining => "Stop Training",
            Self::AddAllFonts => "Add all Fonts",
            Self::RemoveAllFonts => "Remove all Fonts",
        }
    }
}

impl fmt::Display for ButtonLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// What currently holds the model on the worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Training,
    Evaluation,
    Persistence,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => f.write_str("training"),
            Self::Evaluation => f.write_str("evaluation"),
            Self::Persistence => f.write_str("model save"),
        }
    }
}

/// Snapshot of everything the front end may display.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingView {
    pub state: TrainingState,
    pub is_training: bool,
    pub start_button: ButtonLabel,
    pub progress_animating: bool,
    pub worker: Option<WorkerKind>,
    pub accuracy: Option<Accuracy>,
    pub accuracy_label: Option<String>,
    pub last_outcome: Option<JobOutcome>,
    pub saves: u64,
    pub last_error: Option<String>,
}

impl Default for ReportingView {
    fn default() -> Self {
        Self {
            state: TrainingState::Idle,
            is_training: false,
            start_button: ButtonLabel::StartTraining,
            progress_animating: false,
            worker: None,
            accuracy: None,
            accuracy_label: None,
            last_outcome: None,
            saves: 0,
            last_error: None,
        }
    }
}

impl ReportingView {
    /// Nothing is running on the worker context.
    pub fn is_settled(&self) -> bool {
        self.worker.is_none()
    }
}

/// Result of a worker task, posted back to the reporting context.
///
/// `model` is handed back with every report. It is only lost when the worker
/// panicked or a fresh network could not be built.
pub enum WorkerReport {
    Training {
        model: Option<Box<dyn Network>>,
        outcome: JobOutcome,
    },
    Evaluation {
        model: Box<dyn Network>,
        result: Result<Accuracy, TrainerError>,
    },
    Saved {
        model: Box<dyn Network>,
        result: Result<(), TrainerError>,
    },
    Crashed {
        kind: WorkerKind,
        message: String,
    },
}

impl fmt::Debug for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training { outcome, .. } => f
                .debug_struct("Training")
                .field("outcome", outcome)
                .finish_non_exhaustive(),
            Self::Evaluation { result, .. } => f
                .debug_struct("Evaluation")
                .field("result", result)
                .finish_non_exhaustive(),
            Self::Saved { result, .. } => f
                .debug_struct("Saved")
                .field("result", result)
                .finish_non_exhaustive(),
            Self::Crashed { kind, message } => f
                .debug_struct("Crashed")
                .field("kind", kind)
                .field("message", message)
                .finish(),
        }
    }
}

/// When a requested evaluation will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStart {
    Now,
    AfterTraining,
}

/// Effect of the start/stop button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Started(Uuid),
    Stopping,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    id: Uuid,
    started_at: DateTime<Utc>,
    progress: Arc<AtomicU64>,
}

/// Owns the job lifecycle. Must only be driven from the reporting context.
pub struct Supervisor {
    config: TrainerConfig,
    factory: Arc<dyn NetworkFactory>,
    store: Option<Arc<dyn ModelStore>>,
    model: Option<Box<dyn Network>>,
    /// Character set the held model was built for.
    model_characters: Option<CharacterSet>,
    state: TrainingState,
    worker: Option<WorkerKind>,
    active_job: Option<ActiveJob>,
    cancel: CancellationToken,
    pending_evaluation: Option<Arc<Vec<LabeledSample>>>,
    view: ReportingView,
    reports: mpsc::UnboundedSender<WorkerReport>,
}

impl Supervisor {
    pub fn new(
        config: TrainerConfig,
        factory: Arc<dyn NetworkFactory>,
        reports: mpsc::UnboundedSender<WorkerReport>,
    ) -> Self {
        Self {
            config,
            factory,
            store: None,
            model: None,
            model_characters: None,
            state: TrainingState::Idle,
            worker: None,
            active_job: None,
            cancel: CancellationToken::new(),
            pending_evaluation: None,
            view: ReportingView::default(),
            reports,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from an already trained network instead of building one on first use.
    pub fn with_model(mut self, model: Box<dyn Network>, characters: CharacterSet) -> Self {
        self.model = Some(model);
        self.model_characters = Some(characters);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn view(&self) -> &ReportingView {
        &self.view
    }

    pub fn worker(&self) -> Option<WorkerKind> {
        self.worker
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Capture a training request from the live selection using the configured network shape.
    pub fn request(
        &self,
        fonts: Vec<String>,
        characters: CharacterSet,
    ) -> Result<TrainingRequest, TrainerError> {
        TrainingRequest::new(fonts, characters, &self.config.network)
    }

    /// Start a training job on the worker context.
    ///
    /// Rejected without side effects while a job is active, while the model is
    /// checked out by an evaluation or save, or when the request is invalid.
    pub fn start(&mut self, request: TrainingRequest) -> Result<Uuid, TrainerError> {
        if self.state.is_active() {
            warn!(state = ?self.state, "Rejected start: a training job is already active");
            return Err(TrainerError::AlreadyRunning);
        }
        if let Some(kind) = self.worker {
            return Err(TrainerError::model_busy(format!("{kind} in progress")));
        }

        let job = TrainingJob::new(request)?.with_log_every(self.config.job.log_every);
        let reusable = self.take_reusable(job.request());
        let factory = self.factory.clone();
        self.model_characters = Some(job.request().characters().clone());

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let policy = StoppingPolicy::from_config(&self.config.policy);
        let job_id = job.id();

        self.state = TrainingState::Running;
        self.active_job = Some(ActiveJob {
            id: job_id,
            started_at: Utc::now(),
            progress: job.progress(),
        });
        self.view.last_error = None;
        self.spawn_worker(WorkerKind::Training, move || {
            let mut model = match reusable {
                Some(model) => model,
                None => match build_network(factory.as_ref(), job.request()) {
                    Ok(model) => model,
                    Err(e) => {
                        let outcome = job.failed_before_start(&e);
                        return WorkerReport::Training {
                            model: None,
                            outcome,
                        };
                    }
                },
            };
            let outcome = job.run(model.as_mut(), policy, &cancel);
            WorkerReport::Training {
                model: Some(model),
                outcome,
            }
        });
        self.refresh_view();

        info!(%job_id, "Training started");
        Ok(job_id)
    }

    /// Request cooperative cancellation of the active job.
    ///
    /// The job observes the flag at its next iteration boundary. Returns
    /// `false` when there is nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if self.state != TrainingState::Running {
            debug!(state = ?self.state, "Cancel ignored");
            return false;
        }
        self.cancel.cancel();
        self.state = TrainingState::Cancelling;
        self.refresh_view();
        info!(job_id = ?self.active_job.as_ref().map(|j| j.id), "Training cancellation requested");
        true
    }

    /// The start/stop button: stops an active job, otherwise captures a request and starts.
    pub fn toggle(
        &mut self,
        capture: impl FnOnce(&Self) -> Result<TrainingRequest, TrainerError>,
    ) -> Result<ToggleAction, TrainerError> {
        if self.state.is_active() {
            self.cancel();
            return Ok(ToggleAction::Stopping);
        }
        let request = capture(self)?;
        self.start(request).map(ToggleAction::Started)
    }

    /// Evaluate the current model against a held-out set.
    ///
    /// An active job is cancelled first; the evaluation then runs once the job
    /// has handed the model back.
    pub fn evaluate(
        &mut self,
        held_out: Arc<Vec<LabeledSample>>,
    ) -> Result<EvaluationStart, TrainerError> {
        if self.pending_evaluation.is_some() {
            return Err(TrainerError::model_busy("an evaluation is already queued"));
        }
        match self.worker {
            Some(WorkerKind::Training) => {
                self.cancel();
                self.pending_evaluation = Some(held_out);
                self.view.accuracy_label = Some(TESTING_LABEL.to_string());
                self.refresh_view();
                info!("Evaluation queued until training stops");
                Ok(EvaluationStart::AfterTraining)
            }
            Some(kind) => Err(TrainerError::model_busy(format!("{kind} in progress"))),
            None => {
                self.launch_evaluation(held_out)?;
                Ok(EvaluationStart::Now)
            }
        }
    }

    /// Hand the exported model to the configured store on the worker context.
    pub fn save(&mut self) -> Result<(), TrainerError> {
        if let Some(kind) = self.worker {
            return Err(TrainerError::model_busy(format!("{kind} in progress")));
        }
        let store = self
            .store
            .clone()
            .ok_or_else(|| TrainerError::config("no model store configured"))?;
        let model = self
            .model
            .take()
            .ok_or_else(|| TrainerError::config("no trained model to save"))?;

        self.spawn_worker(WorkerKind::Persistence, move || {
            let result = model.export().and_then(|weights| store.save(&weights));
            WorkerReport::Saved { model, result }
        });
        self.refresh_view();
        info!("Model save started");
        Ok(())
    }

    /// Apply a worker report. Called on the reporting context only.
    pub fn apply(&mut self, report: WorkerReport) {
        debug!(?report, "Applying worker report");
        self.worker = None;

        match report {
            WorkerReport::Training { model, outcome } => {
                if model.is_none() {
                    self.model_characters = None;
                }
                self.model = model;
                self.finish_job(outcome);
                self.run_pending_evaluation();
            }
            WorkerReport::Evaluation { model, result } => {
                self.model = Some(model);
                self.finish_evaluation(result);
            }
            WorkerReport::Saved { model, result } => {
                self.model = Some(model);
                match result {
                    Ok(()) => {
                        self.view.saves += 1;
                        info!("Model saved");
                    }
                    Err(e) => {
                        warn!(error = %e, "Model save failed");
                        self.view.last_error = Some(e.to_string());
                    }
                }
            }
            WorkerReport::Crashed { kind, message } => {
                warn!(%kind, %message, "Worker context crashed; model discarded");
                self.model_characters = None;
                let err = TrainerError::Worker(message);
                match kind {
                    WorkerKind::Training => {
                        let (job_id, started_at, iterations) = match self.active_job.take() {
                            Some(job) => {
                                (job.id, job.started_at, job.progress.load(Ordering::SeqCst))
                            }
                            None => (Uuid::nil(), Utc::now(), 0),
                        };
                        self.finish_job(JobOutcome {
                            job_id,
                            reason: OutcomeReason::Failed(err.to_string()),
                            iterations,
                            best_error: None,
                            last_error: None,
                            started_at,
                            finished_at: Utc::now(),
                        });
                        if self.pending_evaluation.take().is_some() {
                            self.finish_evaluation(Err(TrainerError::evaluation(
                                "model was lost while training",
                            )));
                        }
                    }
                    WorkerKind::Evaluation => self.finish_evaluation(Err(err)),
                    WorkerKind::Persistence => self.view.last_error = Some(err.to_string()),
                }
            }
        }

        self.refresh_view();
    }

    fn finish_job(&mut self, outcome: JobOutcome) {
        self.state = match &outcome.reason {
            OutcomeReason::UserCancelled => TrainingState::Idle,
            OutcomeReason::Diverged | OutcomeReason::Completed => TrainingState::Completed,
            OutcomeReason::Failed(message) => {
                self.view.last_error = Some(message.clone());
                TrainingState::Failed
            }
        };
        self.active_job = None;
        info!(
            job_id = %outcome.job_id,
            reason = ?outcome.reason,
            iterations = outcome.iterations,
            state = ?self.state,
            "Training job settled"
        );
        self.view.last_outcome = Some(outcome);
    }

    fn run_pending_evaluation(&mut self) {
        if let Some(held_out) = self.pending_evaluation.take() {
            if let Err(e) = self.launch_evaluation(held_out) {
                self.finish_evaluation(Err(e));
            }
        }
    }

    fn launch_evaluation(&mut self, held_out: Arc<Vec<LabeledSample>>) -> Result<(), TrainerError> {
        let model = self
            .model
            .take()
            .ok_or_else(|| TrainerError::config("no trained model to evaluate"))?;
        self.view.accuracy_label = Some(TESTING_LABEL.to_string());
        self.spawn_worker(WorkerKind::Evaluation, move || {
            let result = ResultSink::evaluate(model.as_ref(), &held_out);
            WorkerReport::Evaluation { model, result }
        });
        self.refresh_view();
        info!("Evaluation started");
        Ok(())
    }

    fn finish_evaluation(&mut self, result: Result<Accuracy, TrainerError>) {
        match result {
            Ok(accuracy) => {
                self.view.accuracy = Some(accuracy);
                self.view.accuracy_label = Some(accuracy_label(accuracy));
            }
            Err(e) => {
                warn!(error = %e, "Evaluation failed");
                self.view.accuracy = None;
                self.view.accuracy_label = Some(format!("Evaluation failed: {e}"));
            }
        }
    }

    /// Take the held model if it was built for this request's characters.
    /// Otherwise the held model is dropped and the worker builds a fresh one.
    fn take_reusable(&mut self, request: &TrainingRequest) -> Option<Box<dyn Network>> {
        let model = self.model.take()?;
        if model.output_len() == request.network().outputs
            && self.model_characters.as_ref() == Some(request.characters())
        {
            Some(model)
        } else {
            debug!("Held network does not match the request; discarding");
            None
        }
    }

    /// Run `work` on the blocking pool and post its report once it has returned.
    fn spawn_worker<F>(&mut self, kind: WorkerKind, work: F)
    where
        F: FnOnce() -> WorkerReport + Send + 'static,
    {
        self.worker = Some(kind);
        let reports = self.reports.clone();
        let handle = tokio::task::spawn_blocking(work);
        tokio::spawn(async move {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => WorkerReport::Crashed {
                    kind,
                    message: e.to_string(),
                },
            };
            if reports.send(report).is_err() {
                debug!(%kind, "Reporting context closed; dropping worker report");
            }
        });
    }

    fn refresh_view(&mut self) {
        let active = self.state.is_active();
        self.view.state = self.state;
        self.view.is_training = active;
        self.view.progress_animating = active;
        self.view.start_button = if active {
            ButtonLabel::StopTraining
        } else {
            ButtonLabel::StartTraining
        };
        self.view.worker = self.worker;
    }
}

/// A dropped supervisor can no longer receive the job's report, so the job is stopped.
impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a network on the worker context; factories may allocate and initialise large weight sets.
fn build_network(
    factory: &dyn NetworkFactory,
    request: &TrainingRequest,
) -> Result<Box<dyn Network>, TrainerError> {
    let spec = request.network();
    let characters = request.characters();
    let model = factory.build(spec, characters)?;
    info!(
        inputs = spec.inputs,
        hidden = spec.hidden,
        outputs = spec.outputs,
        characters = %characters.as_string(),
        "Built new network"
    );
    Ok(model)
}
