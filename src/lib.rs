//! PMP Learning Optimizer
//!
//! An experimentation and continuous-learning engine:
//! - A/B experiments with power-analysis sample sizing
//! - Concurrent interaction recording with per-experiment locking
//! - Chi-square and Welch significance tests with early stopping
//! - Learned insights that feed optimization recommendations

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{Clock, DomainError, ManualClock, SystemClock};
pub use infrastructure::services::{
    CreateExperimentRequest, CreateVariantRequest, EarlyStopDispatch, ExperimentRegistry,
    RegistryConfig,
};
