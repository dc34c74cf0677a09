//! Configuration system for glyphtrain.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> workspace config
//! -> environment -> explicit overrides. Configuration is loaded from
//! `~/.config/glyphtrain/config.toml` and/or `.glyphtrain/config.toml` in the workspace.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level trainer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Early-stopping policy parameters.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Network hyperparameters handed to the network factory.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Training loop behaviour.
    #[serde(default)]
    pub job: JobConfig,
    /// Reporting context sizing.
    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// Plateau / divergence guard parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Callbacks to observe before divergence may stop a run.
    #[serde(default = "default_patience")]
    pub patience: u64,
    /// Tolerance above the best error seen before an error counts as divergence.
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Stop with `Completed` after this many iterations. Unbounded when unset.
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            patience: default_patience(),
            margin: default_margin(),
            max_iterations: None,
        }
    }
}

fn default_patience() -> u64 {
    150
}

fn default_margin() -> f64 {
    2.0
}

/// Activation function of the hidden and output layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
    Linear,
}

/// Error function minimised during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorFunction {
    CrossEntropy { average: bool },
    MeanSquared,
}

/// Network hyperparameters. The output size is not configured here: it always
/// equals the size of the character set being trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_inputs")]
    pub inputs: usize,
    #[serde(default = "default_hidden")]
    pub hidden: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_activation")]
    pub activation: Activation,
    #[serde(default = "default_error_function")]
    pub error_function: ErrorFunction,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            inputs: default_inputs(),
            hidden: default_hidden(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            activation: default_activation(),
            error_function: default_error_function(),
        }
    }
}

fn default_inputs() -> usize {
    321
}

fn default_hidden() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    0.7
}

fn default_momentum() -> f64 {
    0.4
}

fn default_activation() -> Activation {
    Activation::Sigmoid
}

fn default_error_function() -> ErrorFunction {
    ErrorFunction::CrossEntropy { average: false }
}

/// Training loop behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Emit a progress log line every N iterations (0 disables).
    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            log_every: default_log_every(),
        }
    }
}

fn default_log_every() -> u64 {
    50
}

/// Reporting context sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Capacity of the command channel into the reporting context.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_command_buffer() -> usize {
    32
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "glyphtrain", "glyphtrain")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".glyphtrain").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `GLYPHTRAIN_`)
/// 3. Workspace-local config (`.glyphtrain/config.toml`)
/// 4. User config (`~/.config/glyphtrain/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TrainerConfig>,
) -> Result<TrainerConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainerConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // GLYPHTRAIN_POLICY__PATIENCE, GLYPHTRAIN_NETWORK__HIDDEN, etc.
    figment = figment.merge(Env::prefixed("GLYPHTRAIN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_stable() {
        let config = TrainerConfig::default();
        assert_eq!(config.policy.patience, 150);
        assert_eq!(config.policy.margin, 2.0);
        assert_eq!(config.policy.max_iterations, None);
        assert_eq!(config.network.inputs, 321);
        assert_eq!(config.network.hidden, 100);
        assert_eq!(config.network.learning_rate, 0.7);
        assert_eq!(config.network.momentum, 0.4);
        assert_eq!(config.network.activation, Activation::Sigmoid);
        assert_eq!(
            config.network.error_function,
            ErrorFunction::CrossEntropy { average: false }
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TrainerConfig = toml_from_str(
            r#"
            [policy]
            patience = 20

            [network]
            activation = "tanh"
            error_function = { kind = "mean_squared" }
            "#,
        );
        assert_eq!(config.policy.patience, 20);
        assert_eq!(config.policy.margin, 2.0);
        assert_eq!(config.network.activation, Activation::Tanh);
        assert_eq!(config.network.error_function, ErrorFunction::MeanSquared);
        assert_eq!(config.network.hidden, 100);
        assert_eq!(config.job.log_every, 50);
    }

    #[test]
    fn test_workspace_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[policy]\nmargin = 0.5\nmax_iterations = 400\n").unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.policy.margin, 0.5);
        assert_eq!(config.policy.max_iterations, Some(400));
    }

    #[test]
    fn test_overrides_take_priority() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = TrainerConfig::default();
        overrides.job.log_every = 7;
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.job.log_every, 7);
    }

    fn toml_from_str(source: &str) -> TrainerConfig {
        Figment::from(Toml::string(source)).extract().unwrap()
    }
}
