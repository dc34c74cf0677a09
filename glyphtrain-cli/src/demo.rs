//! Demonstration network: a single-layer softmax classifier over synthetic glyph features.
//!
//! Stands in for a real OCR network so the supervisor can be exercised from
//! the terminal. The hidden size and activation in the `NetworkSpec` are not
//! used; `error_function` only selects which loss figure is reported.

use glyphtrain_core::config::ErrorFunction;
use glyphtrain_core::{
    CharacterSet, LabeledSample, Network, NetworkFactory, NetworkSpec, TrainerError,
    TrainingRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const NOISE: f32 = 0.15;
const FONT_BIAS: f32 = 0.05;
/// Separates held-out variants from anything a training iteration renders.
const HELD_OUT_VARIANT_BASE: u64 = 1 << 40;

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Renders noisy feature vectors for (font, character) pairs.
#[derive(Debug, Clone)]
pub struct GlyphSampler {
    inputs: usize,
    seed: u64,
}

impl GlyphSampler {
    pub fn new(inputs: usize, seed: u64) -> Self {
        Self { inputs, seed }
    }

    fn prototype(&self, c: char) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ u64::from(c).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        (0..self.inputs).map(|_| rng.r#gen::<f32>()).collect()
    }

    /// One rendering of `c` in `font`. The same `variant` always yields the same vector.
    pub fn render(&self, font: &str, c: char, variant: u64) -> Vec<f32> {
        let font_hash = fnv1a(font);
        let bias = (font_hash % 1000) as f32 / 1000.0 * 2.0 * FONT_BIAS - FONT_BIAS;
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ font_hash ^ u64::from(c).rotate_left(17) ^ variant.wrapping_mul(31),
        );
        self.prototype(c)
            .into_iter()
            .map(|v| v + bias + rng.gen_range(-NOISE..NOISE))
            .collect()
    }

    /// `per_character` unseen renderings of every character in every font.
    pub fn held_out(
        &self,
        fonts: &[String],
        characters: &CharacterSet,
        per_character: usize,
    ) -> Vec<LabeledSample> {
        let mut samples = Vec::with_capacity(fonts.len() * characters.len() * per_character);
        for font in fonts {
            for &c in characters.chars() {
                for n in 0..per_character as u64 {
                    samples.push(LabeledSample {
                        expected: c,
                        input: self.render(font, c, HELD_OUT_VARIANT_BASE + n),
                    });
                }
            }
        }
        samples
    }
}

#[derive(Serialize)]
struct Snapshot<'a> {
    spec: &'a NetworkSpec,
    characters: String,
    weights: &'a [f64],
}

/// Softmax classifier with momentum SGD. Weights are `outputs × (inputs + 1)`, bias last.
pub struct SoftmaxNetwork {
    spec: NetworkSpec,
    characters: CharacterSet,
    weights: Vec<f64>,
    velocity: Vec<f64>,
    sampler: GlyphSampler,
}

impl SoftmaxNetwork {
    pub fn new(spec: NetworkSpec, characters: CharacterSet, sampler: GlyphSampler) -> Self {
        let len = spec.outputs * (spec.inputs + 1);
        Self {
            spec,
            characters,
            weights: vec![0.0; len],
            velocity: vec![0.0; len],
            sampler,
        }
    }

    fn forward(&self, x: &[f32]) -> Vec<f64> {
        let stride = self.spec.inputs + 1;
        let logits: Vec<f64> = (0..self.spec.outputs)
            .map(|k| {
                let row = &self.weights[k * stride..(k + 1) * stride];
                let dot: f64 = row[..self.spec.inputs]
                    .iter()
                    .zip(x)
                    .map(|(w, v)| w * f64::from(*v))
                    .sum();
                dot + row[self.spec.inputs]
            })
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / total).collect()
    }
}

impl Network for SoftmaxNetwork {
    fn train_iteration(
        &mut self,
        request: &TrainingRequest,
        iteration: u64,
    ) -> Result<f64, TrainerError> {
        if request.characters() != &self.characters {
            return Err(TrainerError::iteration(
                iteration,
                "request characters differ from the network's outputs",
            ));
        }

        let inputs = self.spec.inputs;
        let stride = inputs + 1;
        let mut grad = vec![0.0; self.weights.len()];
        let mut cross_entropy = 0.0;
        let mut squared = 0.0;
        let mut count = 0usize;

        for font in request.fonts() {
            for (target, &c) in self.characters.chars().iter().enumerate() {
                let x = self.sampler.render(font, c, iteration);
                let probs = self.forward(&x);
                cross_entropy -= probs[target].max(1e-12).ln();

                for (k, p) in probs.iter().enumerate() {
                    let delta = p - if k == target { 1.0 } else { 0.0 };
                    squared += delta * delta;
                    let row = &mut grad[k * stride..(k + 1) * stride];
                    for (g, v) in row[..inputs].iter_mut().zip(&x) {
                        *g += delta * f64::from(*v);
                    }
                    row[inputs] += delta;
                }
                count += 1;
            }
        }

        // Mean gradient, step scaled down by the input width.
        let step = self.spec.learning_rate / (count as f64 * inputs.max(1) as f64);
        for ((w, v), g) in self.weights.iter_mut().zip(&mut self.velocity).zip(&grad) {
            *v = self.spec.momentum * *v - step * g;
            *w += *v;
        }

        let n = count.max(1) as f64;
        Ok(match self.spec.error_function {
            ErrorFunction::CrossEntropy { average: false } => cross_entropy,
            ErrorFunction::CrossEntropy { average: true } => cross_entropy / n,
            ErrorFunction::MeanSquared => squared / n,
        })
    }

    fn recognize(&self, sample: &LabeledSample) -> Result<char, TrainerError> {
        if sample.input.len() != self.spec.inputs {
            return Err(TrainerError::evaluation(format!(
                "sample has {} features, network expects {}",
                sample.input.len(),
                self.spec.inputs
            )));
        }
        let probs = self.forward(&sample.input);
        let best = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .ok_or_else(|| TrainerError::evaluation("network has no outputs"))?;
        self.characters
            .chars()
            .get(best)
            .copied()
            .ok_or_else(|| TrainerError::evaluation("output index outside character set"))
    }

    fn output_len(&self) -> usize {
        self.spec.outputs
    }

    fn export(&self) -> Result<Vec<u8>, TrainerError> {
        let snapshot = Snapshot {
            spec: &self.spec,
            characters: self.characters.as_string(),
            weights: &self.weights,
        };
        serde_json::to_vec(&snapshot).map_err(|e| TrainerError::persistence(e.to_string()))
    }
}

/// Builds [`SoftmaxNetwork`]s sharing one glyph generator seed.
pub struct SoftmaxFactory {
    seed: u64,
}

impl SoftmaxFactory {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl NetworkFactory for SoftmaxFactory {
    fn build(
        &self,
        spec: &NetworkSpec,
        characters: &CharacterSet,
    ) -> Result<Box<dyn Network>, TrainerError> {
        if spec.inputs == 0 {
            return Err(TrainerError::config("network needs at least one input"));
        }
        Ok(Box::new(SoftmaxNetwork::new(
            spec.clone(),
            characters.clone(),
            GlyphSampler::new(spec.inputs, self.seed),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glyphtrain_core::ResultSink;
    use glyphtrain_core::config::NetworkConfig;

    fn request(characters: &str) -> TrainingRequest {
        let config = NetworkConfig {
            inputs: 32,
            ..NetworkConfig::default()
        };
        TrainingRequest::new(
            vec!["Helvetica".into(), "Courier".into()],
            CharacterSet::from_text(characters),
            &config,
        )
        .unwrap()
    }

    fn network(request: &TrainingRequest) -> Box<dyn Network> {
        SoftmaxFactory::new(3)
            .build(request.network(), request.characters())
            .unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let sampler = GlyphSampler::new(16, 1);
        assert_eq!(sampler.render("Menlo", 'a', 4), sampler.render("Menlo", 'a', 4));
        assert_ne!(sampler.render("Menlo", 'a', 4), sampler.render("Menlo", 'a', 5));
        assert_ne!(sampler.render("Menlo", 'a', 4), sampler.render("Menlo", 'b', 4));
    }

    #[test]
    fn test_held_out_size() {
        let sampler = GlyphSampler::new(8, 1);
        let fonts = vec!["A".to_string(), "B".to_string()];
        let samples = sampler.held_out(&fonts, &CharacterSet::from_text("xyz"), 4);
        assert_eq!(samples.len(), 24);
        assert!(samples.iter().all(|s| s.input.len() == 8));
    }

    #[test]
    fn test_training_lowers_error_and_learns() {
        let request = request("abcd");
        let mut net = network(&request);
        let first = net.train_iteration(&request, 0).unwrap();
        let mut last = first;
        for i in 1..300 {
            last = net.train_iteration(&request, i).unwrap();
        }
        assert!(last < first, "error went from {first} to {last}");

        let sampler = GlyphSampler::new(32, 3);
        let held_out = sampler.held_out(request.fonts(), request.characters(), 5);
        let accuracy = ResultSink::evaluate(net.as_ref(), &held_out).unwrap();
        assert!(accuracy.value() > 0.9, "accuracy {accuracy}");
    }

    #[test]
    fn test_mismatched_characters_fail_iteration() {
        let trained_for = request("ab");
        let mut net = network(&trained_for);
        let err = net.train_iteration(&request("xy"), 0).unwrap_err();
        assert!(matches!(err, TrainerError::Iteration { .. }));
    }

    #[test]
    fn test_recognize_rejects_wrong_width() {
        let request = request("ab");
        let net = network(&request);
        let sample = LabeledSample {
            expected: 'a',
            input: vec![0.0; 3],
        };
        assert!(net.recognize(&sample).is_err());
    }

    #[test]
    fn test_export_is_json() {
        let request = request("ab");
        let net = network(&request);
        let bytes = net.export().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["characters"], "ab");
        assert_eq!(value["weights"].as_array().unwrap().len(), 2 * 33);
    }
}
