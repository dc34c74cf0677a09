//! # glyphtrain-core: Training supervision for OCR networks
//!
//! Runs an external character-recognition network through a long iterative
//! training job on a worker context, stops it with a plateau/divergence
//! guard or on cooperative cancellation, and reports outcomes and held-out
//! accuracy back to a single reporting context.
//!
//! Components, leaves first:
//! - [`policy`]: the per-iteration stopping decision
//! - [`job`]: the training loop
//! - [`supervisor`]: job lifecycle, cancellation and model hand-off
//! - [`result_sink`]: held-out evaluation
//! - [`reporting`]: the task that owns the supervisor and publishes its view

// Foundation
pub mod config;
pub mod error;

// Inputs
pub mod model;
pub mod request;
pub mod selection;

// Core
pub mod job;
pub mod policy;
pub mod reporting;
pub mod result_sink;
pub mod supervisor;

// Test doubles
pub mod mock;

// Re-exports
pub use config::{TrainerConfig, load_config};
pub use error::TrainerError;
pub use job::{IterationResult, JobOutcome, OutcomeReason, TrainingJob};
pub use model::{LabeledSample, ModelStore, Network, NetworkFactory};
pub use policy::{RunningMinimum, StopReason, StoppingDecision, StoppingPolicy};
pub use reporting::{ReportingContext, SupervisorHandle};
pub use request::{CharacterSet, NetworkSpec, TrainingRequest};
pub use result_sink::{Accuracy, ResultSink};
pub use selection::FontSelection;
pub use supervisor::{
    ButtonLabel, EvaluationStart, ReportingView, Supervisor, ToggleAction, TrainingState,
    WorkerKind, WorkerReport,
};
