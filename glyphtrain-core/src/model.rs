//! Seams to the external network implementation and to model persistence.

use crate::error::TrainerError;
use crate::request::{CharacterSet, NetworkSpec, TrainingRequest};
use serde::{Deserialize, Serialize};

/// One held-out glyph with the character it depicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub expected: char,
    pub input: Vec<f32>,
}

/// A trainable character-recognition network.
///
/// The supervisor never shares a network: it is moved to the worker context for
/// training, evaluation or export and moved back when the worker finishes.
pub trait Network: Send + 'static {
    /// Run one optimization pass over the request's fonts and characters,
    /// updating weights in place. Returns the error metric of that pass.
    fn train_iteration(&mut self, request: &TrainingRequest, iteration: u64)
    -> Result<f64, TrainerError>;

    /// Recognize a single glyph.
    fn recognize(&self, sample: &LabeledSample) -> Result<char, TrainerError>;

    /// Number of output classes.
    fn output_len(&self) -> usize;

    /// Opaque serialized weights for a [`ModelStore`].
    fn export(&self) -> Result<Vec<u8>, TrainerError>;
}

/// Builds fresh networks when none exists yet or the character set changed.
pub trait NetworkFactory: Send + Sync {
    /// `characters` maps output index to character.
    fn build(
        &self,
        spec: &NetworkSpec,
        characters: &CharacterSet,
    ) -> Result<Box<dyn Network>, TrainerError>;
}

/// Persists exported network weights. The format is owned by the implementation.
pub trait ModelStore: Send + Sync {
    fn save(&self, weights: &[u8]) -> Result<(), TrainerError>;
}
