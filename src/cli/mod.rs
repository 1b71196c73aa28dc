//! CLI module for the learning optimizer
//!
//! Provides subcommands for exercising the engine offline:
//! - `plan`: size an experiment before running it
//! - `simulate`: run a seeded synthetic experiment end to end

pub mod plan;
pub mod simulate;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// PMP Learning Optimizer - A/B experiments and learned recommendations
#[derive(Parser)]
#[command(name = "pmp-learning-optimizer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute the minimum sample size of an experiment
    Plan(plan::PlanArgs),

    /// Run a synthetic experiment and print its report
    Simulate(simulate::SimulateArgs),
}

/// Load `.env`, the layered configuration and the logging subscriber
///
/// A malformed configuration source fails the command.
fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);
    crate::infrastructure::observability::register_info();

    Ok(config)
}
