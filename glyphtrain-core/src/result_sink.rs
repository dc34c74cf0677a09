//! Held-out evaluation of a trained network.

use crate::error::TrainerError;
use crate::model::{LabeledSample, Network};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Fraction of correctly recognized samples, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Accuracy(f64);

impl Accuracy {
    /// Clamps into `[0, 1]`.
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Percentage rounded to one decimal place.
    pub fn percent(self) -> f64 {
        (self.0 * 1000.0).round() / 10.0
    }
}

/// Formats as `85.7%`.
impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percent())
    }
}

/// Runs an evaluation pass. Executed on the worker context with exclusive
/// access to the network.
pub struct ResultSink;

impl ResultSink {
    pub fn evaluate(
        model: &dyn Network,
        held_out: &[LabeledSample],
    ) -> Result<Accuracy, TrainerError> {
        if held_out.is_empty() {
            return Err(TrainerError::evaluation("held-out set is empty"));
        }

        let mut correct = 0usize;
        for sample in held_out {
            if model.recognize(sample)? == sample.expected {
                correct += 1;
            }
        }

        let accuracy = Accuracy::new(correct as f64 / held_out.len() as f64);
        info!(
            samples = held_out.len(),
            correct,
            accuracy = %accuracy,
            "Evaluation finished"
        );
        Ok(accuracy)
    }
}

/// Label text shown after an evaluation pass.
pub fn accuracy_label(accuracy: Accuracy) -> String {
    format!("Accuracy: {accuracy}")
}
