mod app_config;

pub use app_config::{AppConfig, ExperimentConfig, LogFormat, LoggingConfig, PersistenceConfig};
