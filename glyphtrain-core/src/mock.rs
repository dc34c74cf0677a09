//! Scripted test doubles for the network, factory and model store seams.

use crate::error::TrainerError;
use crate::model::{LabeledSample, ModelStore, Network, NetworkFactory};
use crate::request::{CharacterSet, NetworkSpec, TrainingRequest};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Network that replays a fixed error sequence.
///
/// Once the script is exhausted the last error repeats forever. Recognition is
/// driven by the sample itself: a first input value above 0.5 means the glyph
/// is recognized correctly, anything else yields `'?'`.
#[derive(Clone)]
pub struct ScriptedNetwork {
    errors: Vec<f64>,
    outputs: usize,
    fail_at: Option<u64>,
    delay: Option<Duration>,
    hook: Option<(u64, Hook)>,
    iterations: Arc<AtomicU64>,
}

impl ScriptedNetwork {
    pub fn new(errors: Vec<f64>) -> Self {
        Self {
            errors,
            outputs: 0,
            fail_at: None,
            delay: None,
            hook: None,
            iterations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Constant error on every iteration.
    pub fn constant(error: f64) -> Self {
        Self::new(vec![error])
    }

    pub fn with_outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    /// Report a failure instead of an error metric at this iteration index.
    pub fn failing_at(mut self, iteration: u64) -> Self {
        self.fail_at = Some(iteration);
        self
    }

    /// Sleep this long inside every iteration.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook` inside the given iteration, before its error is returned.
    pub fn on_iteration(mut self, iteration: u64, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some((iteration, Arc::new(hook)));
        self
    }

    /// Shared counter of iterations executed by this network and its clones.
    pub fn iteration_counter(&self) -> Arc<AtomicU64> {
        self.iterations.clone()
    }
}

impl Network for ScriptedNetwork {
    fn train_iteration(
        &mut self,
        _request: &TrainingRequest,
        iteration: u64,
    ) -> Result<f64, TrainerError> {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some((at, hook)) = &self.hook {
            if *at == iteration {
                hook();
            }
        }
        if self.fail_at == Some(iteration) {
            return Err(TrainerError::iteration(iteration, "scripted failure"));
        }
        let index = usize::try_from(iteration).unwrap_or(usize::MAX);
        Ok(self
            .errors
            .get(index)
            .or(self.errors.last())
            .copied()
            .unwrap_or(1.0))
    }

    fn recognize(&self, sample: &LabeledSample) -> Result<char, TrainerError> {
        match sample.input.first() {
            Some(v) if *v > 0.5 => Ok(sample.expected),
            _ => Ok('?'),
        }
    }

    fn output_len(&self) -> usize {
        self.outputs
    }

    fn export(&self) -> Result<Vec<u8>, TrainerError> {
        Ok(format!("scripted:{}", self.iterations.load(Ordering::SeqCst)).into_bytes())
    }
}

/// Factory that clones a template network, sized to the requested outputs.
pub struct ScriptedFactory {
    template: ScriptedNetwork,
    builds: AtomicUsize,
    build_delay: Option<Duration>,
    failure: Option<String>,
}

impl ScriptedFactory {
    pub fn new(template: ScriptedNetwork) -> Self {
        Self {
            template,
            builds: AtomicUsize::new(0),
            build_delay: None,
            failure: None,
        }
    }

    /// Sleep this long inside every build.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Fail every build with this message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl NetworkFactory for ScriptedFactory {
    fn build(
        &self,
        spec: &NetworkSpec,
        _characters: &CharacterSet,
    ) -> Result<Box<dyn Network>, TrainerError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.failure {
            return Err(TrainerError::config(message.clone()));
        }
        Ok(Box::new(self.template.clone().with_outputs(spec.outputs)))
    }
}

/// Model store that keeps every saved payload in memory.
#[derive(Default)]
pub struct MemoryModelStore {
    saved: Mutex<Vec<Vec<u8>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<Vec<u8>> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, weights: &[u8]) -> Result<(), TrainerError> {
        self.saved
            .lock()
            .map_err(|_| TrainerError::persistence("store lock poisoned"))?
            .push(weights.to_vec());
        Ok(())
    }
}
