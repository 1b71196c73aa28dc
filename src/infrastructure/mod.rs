//! Infrastructure layer - Engine implementations and collaborator plumbing

pub mod experiment;
pub mod logging;
pub mod observability;
pub mod persistence;
pub mod services;
pub mod task;
