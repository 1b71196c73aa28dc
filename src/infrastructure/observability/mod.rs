//! Observability infrastructure - Metrics

mod metrics;

pub use metrics::{
    record_completion, record_evaluation, record_interaction, record_learning_record,
    record_persistence_failure, register_info,
};
