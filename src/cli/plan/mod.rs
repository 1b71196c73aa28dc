//! Plan command - prints the sample size plan of an experiment

use clap::Args;
use tracing::info;

use crate::infrastructure::experiment::{SampleSizeParams, SampleSizePlan, SampleSizePlanner};

/// Arguments for the plan command
#[derive(Args, Clone, Debug)]
pub struct PlanArgs {
    /// Two-sided significance level
    #[arg(long, default_value_t = 0.05)]
    pub significance_level: f64,

    /// Desired statistical power
    #[arg(long, default_value_t = 0.8)]
    pub power: f64,

    /// Relative lift to detect, e.g. 0.2 for +20%
    #[arg(long, default_value_t = 0.2)]
    pub minimum_detectable_effect: f64,

    /// Expected control conversion rate
    #[arg(long, default_value_t = 0.1)]
    pub baseline_rate: f64,

    /// Number of arms including control
    #[arg(long, default_value_t = 2)]
    pub arms: usize,
}

impl PlanArgs {
    fn params(&self) -> SampleSizeParams {
        SampleSizeParams {
            significance_level: self.significance_level,
            power: self.power,
            minimum_detectable_effect: self.minimum_detectable_effect,
            baseline_rate: self.baseline_rate,
        }
    }
}

/// Run the plan command
pub async fn run(args: PlanArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let plan = build_plan(&args, config.experiment.per_arm_floor)?;
    info!(per_arm = plan.per_arm, total = plan.total, "Sample size planned");

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn build_plan(args: &PlanArgs, per_arm_floor: u64) -> anyhow::Result<SampleSizePlan> {
    anyhow::ensure!(args.arms >= 2, "an experiment needs at least 2 arms, got {}", args.arms);

    Ok(SampleSizePlanner::new(per_arm_floor).plan(&args.params(), args.arms)?)
}
