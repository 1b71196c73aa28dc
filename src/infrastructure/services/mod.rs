//! Infrastructure services

mod experiment_registry;

pub use experiment_registry::{
    CreateExperimentRequest, CreateVariantRequest, EarlyStopDispatch, ExperimentRegistry,
    RegistryConfig, DEFAULT_SAMPLE_SIZE_FLOOR,
};
