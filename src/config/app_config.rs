use serde::Deserialize;
use std::path::Path;

use crate::domain::RetryConfig;
use crate::infrastructure::experiment::{
    RecommendationConfig, DEFAULT_CONFIDENCE_LEVEL, DEFAULT_PER_ARM_FLOOR,
};
use crate::infrastructure::services::{
    EarlyStopDispatch, RegistryConfig, DEFAULT_SAMPLE_SIZE_FLOOR,
};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub experiment: ExperimentConfig,
    pub learning: RecommendationConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Smallest accepted minimum sample size
    pub sample_size_floor: u64,
    /// Smallest planned sample per arm
    pub per_arm_floor: u64,
    /// Confidence level of reported intervals
    pub confidence_level: f64,
    pub early_stop_dispatch: EarlyStopDispatch,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub retry: RetryConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            sample_size_floor: DEFAULT_SAMPLE_SIZE_FLOOR,
            per_arm_floor: DEFAULT_PER_ARM_FLOOR,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            early_stop_dispatch: EarlyStopDispatch::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Load `default` and `local` from `dir`, then `APP__*` environment overrides
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let file = |name: &str| {
            config::File::with_name(&dir.as_ref().join(name).to_string_lossy()).required(false)
        };

        let config = config::Config::builder()
            .add_source(file("default"))
            .add_source(file("local"))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Registry settings derived from the experiment, learning and persistence sections
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            sample_size_floor: self.experiment.sample_size_floor,
            per_arm_floor: self.experiment.per_arm_floor,
            confidence_level: self.experiment.confidence_level,
            early_stop_dispatch: self.experiment.early_stop_dispatch,
            recommendation: self.learning.clone(),
            persistence_retry: self.persistence.retry.clone(),
        }
    }
}
