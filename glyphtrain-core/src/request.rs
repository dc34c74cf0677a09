//! Training request snapshot and the character set it trains.

use crate::config::{Activation, ErrorFunction, NetworkConfig};
use crate::error::TrainerError;
use serde::{Deserialize, Serialize};

/// Ordered set of distinct characters. Repeats are dropped, keeping the first
/// occurrence, the same way the character field of the training tool behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSet {
    chars: Vec<char>,
}

impl CharacterSet {
    pub fn from_text(text: &str) -> Self {
        let mut chars = Vec::new();
        for c in text.chars() {
            if !chars.contains(&c) {
                chars.push(c);
            }
        }
        Self { chars }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Position of `c` in the set, which is also its output index in the network.
    pub fn index_of(&self, c: char) -> Option<usize> {
        self.chars.iter().position(|&x| x == c)
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Full network shape handed to a [`NetworkFactory`](crate::model::NetworkFactory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub inputs: usize,
    pub hidden: usize,
    pub outputs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub activation: Activation,
    pub error_function: ErrorFunction,
}

impl NetworkSpec {
    /// Network shape for `config` with one output per trained character.
    pub fn for_characters(config: &NetworkConfig, characters: &CharacterSet) -> Self {
        Self {
            inputs: config.inputs,
            hidden: config.hidden,
            outputs: characters.len(),
            learning_rate: config.learning_rate,
            momentum: config.momentum,
            activation: config.activation,
            error_function: config.error_function,
        }
    }
}

/// Immutable snapshot of what to train, captured once when training starts.
///
/// Later edits to the live font selection or character field never reach a
/// running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    fonts: Vec<String>,
    characters: CharacterSet,
    network: NetworkSpec,
}

impl TrainingRequest {
    /// Build a request whose network output size follows the character set.
    pub fn new(
        fonts: Vec<String>,
        characters: CharacterSet,
        network: &NetworkConfig,
    ) -> Result<Self, TrainerError> {
        let spec = NetworkSpec::for_characters(network, &characters);
        Self::with_spec(fonts, characters, spec)
    }

    /// Build a request from an explicit network shape.
    pub fn with_spec(
        fonts: Vec<String>,
        characters: CharacterSet,
        network: NetworkSpec,
    ) -> Result<Self, TrainerError> {
        let request = Self {
            fonts,
            characters,
            network,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check the start-time preconditions.
    pub fn validate(&self) -> Result<(), TrainerError> {
        if self.fonts.is_empty() {
            return Err(TrainerError::config("no fonts selected for training"));
        }
        if self.characters.is_empty() {
            return Err(TrainerError::config("character set is empty"));
        }
        if self.network.outputs != self.characters.len() {
            return Err(TrainerError::config(format!(
                "network has {} outputs but {} characters are trained",
                self.network.outputs,
                self.characters.len()
            )));
        }
        Ok(())
    }

    pub fn fonts(&self) -> &[String] {
        &self.fonts
    }

    pub fn characters(&self) -> &CharacterSet {
        &self.characters
    }

    pub fn network(&self) -> &NetworkSpec {
        &self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_set_drops_repeats_in_order() {
        let set = CharacterSet::from_text("abcabxa");
        assert_eq!(set.chars(), &['a', 'b', 'c', 'x']);
        assert_eq!(set.as_string(), "abcx");
        assert_eq!(set.index_of('x'), Some(3));
        assert_eq!(set.index_of('z'), None);
    }

    #[test]
    fn test_request_outputs_follow_characters() {
        let request = TrainingRequest::new(
            vec!["Helvetica".into()],
            CharacterSet::from_text("0123456789"),
            &NetworkConfig::default(),
        )
        .unwrap();
        assert_eq!(request.network().outputs, 10);
        assert_eq!(request.network().inputs, 321);
    }

    #[test]
    fn test_empty_fonts_rejected() {
        let err = TrainingRequest::new(
            Vec::new(),
            CharacterSet::from_text("ab"),
            &NetworkConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_characters_rejected() {
        let err = TrainingRequest::new(
            vec!["Courier".into()],
            CharacterSet::from_text(""),
            &NetworkConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainerError::Config(_)));
    }

    #[test]
    fn test_mismatched_output_size_rejected() {
        let characters = CharacterSet::from_text("abc");
        let mut spec = NetworkSpec::for_characters(&NetworkConfig::default(), &characters);
        spec.outputs = 5;
        let err = TrainingRequest::with_spec(vec!["Courier".into()], characters, spec).unwrap_err();
        assert!(err.to_string().contains("5 outputs"));
    }
}
