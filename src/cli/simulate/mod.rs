//! Simulate command - runs a seeded synthetic experiment end to end

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Args, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::domain::experiment::{
    ContinuousMetric, ExperimentId, ExperimentStatusReport, InteractionEvent, LearningSummary,
    MetricKind, StopReason, VariantId,
};
use crate::domain::ManualClock;
use crate::infrastructure::experiment::OptimizationRecommendations;
use crate::infrastructure::persistence::InMemoryPersistence;
use crate::infrastructure::services::{
    CreateExperimentRequest, CreateVariantRequest, EarlyStopDispatch, ExperimentRegistry,
};

const CONTROL_ID: &str = "control";
const TREATMENT_ID: &str = "treatment";

/// Primary metric selectable from the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricArg {
    ConversionRate,
    TimeOnPage,
    ScrollDepth,
    RevenuePerVisitor,
}

impl From<MetricArg> for MetricKind {
    fn from(metric: MetricArg) -> Self {
        match metric {
            MetricArg::ConversionRate => MetricKind::Proportion,
            MetricArg::TimeOnPage => MetricKind::continuous(ContinuousMetric::TimeOnPage),
            MetricArg::ScrollDepth => MetricKind::continuous(ContinuousMetric::ScrollDepth),
            MetricArg::RevenuePerVisitor => {
                MetricKind::continuous(ContinuousMetric::RevenuePerVisitor)
            }
        }
    }
}

/// Arguments for the simulate command
#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Visitors per simulated day across both arms
    #[arg(long, default_value_t = 1000)]
    pub daily_visitors: u64,

    /// Days to simulate unless the experiment stops earlier
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// True conversion rate of the control
    #[arg(long, default_value_t = 0.10)]
    pub control_rate: f64,

    /// True conversion rate of the treatment
    #[arg(long, default_value_t = 0.13)]
    pub treatment_rate: f64,

    #[arg(long, value_enum, default_value_t = MetricArg::ConversionRate)]
    pub metric: MetricArg,

    #[arg(long, default_value_t = 7)]
    pub minimum_duration_days: u32,

    #[arg(long, default_value_t = 30)]
    pub maximum_duration_days: u32,

    /// Seed of the visitor generator
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Everything the simulate command prints
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub simulated_days: u32,
    pub report: ExperimentStatusReport,
    pub learning_summary: LearningSummary,
    pub recommendations: OptimizationRecommendations,
}

/// Run the simulate command
pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let report = simulate(&args, &config, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Drive one experiment through a synthetic visitor stream
///
/// Time is simulated with a manual clock, so early stopping runs inline after
/// every visitor and the day sweep catches the maximum duration.
pub async fn simulate(
    args: &SimulateArgs,
    config: &AppConfig,
    start: DateTime<Utc>,
) -> anyhow::Result<SimulationReport> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.control_rate) && (0.0..=1.0).contains(&args.treatment_rate),
        "conversion rates must be within [0, 1]"
    );

    let clock = Arc::new(ManualClock::new(start));
    let mut registry = ExperimentRegistry::new(
        config
            .registry_config()
            .with_early_stop_dispatch(EarlyStopDispatch::Inline),
    )
    .with_clock(clock.clone());
    if config.persistence.enabled {
        registry = registry.with_persistence(Arc::new(InMemoryPersistence::new()));
    }

    let metric = MetricKind::from(args.metric);
    let id = registry.create(CreateExperimentRequest {
        name: "Landing page headline".to_string(),
        description: Some("Synthetic simulation".to_string()),
        metric,
        baseline_rate: args.control_rate.clamp(0.001, 0.999),
        minimum_duration_days: args.minimum_duration_days,
        maximum_duration_days: args.maximum_duration_days,
        control: CreateVariantRequest::new(CONTROL_ID, "Original", 0.5)
            .with_payload_entry("headline", "Welcome to our product")
            .with_payload_entry("cta_buttons", serde_json::json!(["Sign up"])),
        treatments: vec![CreateVariantRequest::new(TREATMENT_ID, "Urgent", 0.5)
            .with_payload_entry("headline", "Start saving today")
            .with_payload_entry("cta_buttons", serde_json::json!(["Sign up", "See pricing"]))
            .with_payload_entry("mobile_optimized", true)],
        ..Default::default()
    })?;
    registry.start(&id)?;
    info!(experiment_id = %id, seed = args.seed, "Simulation started");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let control = VariantId::new(CONTROL_ID)?;
    let treatment = VariantId::new(TREATMENT_ID)?;
    let visitor_spacing = Duration::seconds(86_400 / args.daily_visitors.max(1) as i64);

    let mut simulated_days = 0;
    'days: for day in 0..args.days {
        for _ in 0..args.daily_visitors {
            let (variant, rate) = if rng.gen_bool(0.5) {
                (&control, args.control_rate)
            } else {
                (&treatment, args.treatment_rate)
            };

            let event = synthetic_visitor(&mut rng, rate);
            if !record(&registry, &id, variant, event).await? {
                break 'days;
            }
            clock.advance(visitor_spacing);
        }

        simulated_days = day + 1;
        clock.set(start + Duration::days(i64::from(simulated_days)));
        registry.check_all().await?;

        if registry.get_status(&id)?.experiment.status().is_terminal() {
            break;
        }
        debug!(experiment_id = %id, day = simulated_days, "Simulated day finished");
    }

    let status = registry.get_status(&id)?;
    if !status.experiment.status().is_terminal() {
        registry.stop(&id, StopReason::Manual)?;
    }

    let report = registry.get_status(&id)?;
    let recommendations = registry
        .get_optimization_recommendations(report.experiment.control(), metric)
        .await?;

    info!(
        experiment_id = %id,
        status = %report.experiment.status(),
        visitors = report.experiment.total_visitors(),
        "Simulation finished"
    );

    Ok(SimulationReport {
        simulated_days,
        learning_summary: registry.get_learning_summary()?,
        report,
        recommendations,
    })
}

/// Record one visitor; `false` once the experiment no longer accepts traffic
async fn record(
    registry: &ExperimentRegistry,
    id: &ExperimentId,
    variant: &VariantId,
    event: InteractionEvent,
) -> anyhow::Result<bool> {
    match registry.record_interaction(id, variant, event).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_invalid_state() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Synthetic visitor whose engagement follows its conversion
fn synthetic_visitor(rng: &mut StdRng, conversion_rate: f64) -> InteractionEvent {
    let converted = rng.gen_bool(conversion_rate);
    let engaged = converted || rng.gen_bool(0.5);

    let time_on_page = if engaged {
        rng.gen_range(60.0..300.0)
    } else {
        rng.gen_range(2.0..45.0)
    };
    let scroll_depth = if engaged {
        rng.gen_range(0.4..1.0)
    } else {
        rng.gen_range(0.0..0.4)
    };

    let mut event = InteractionEvent::new(converted)
        .with_time_on_page(time_on_page)
        .with_scroll_depth(scroll_depth)
        .with_bounced(!engaged && rng.gen_bool(0.6));
    if converted {
        event = event.with_revenue(rng.gen_range(20.0..120.0));
    }
    event
}
