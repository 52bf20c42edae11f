//! Prints the coverage path for the stored survey plan without flying it.

use anyhow::{Context, Result};
use clap::Parser;
use flight_software::config::ConfigArgs;
use shared::SurveyPlan;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Write the built-in default survey plan before planning
    #[arg(long)]
    save_default: bool,

    /// Print waypoints as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let storage = args
        .config
        .storage()
        .context("Failed to initialize config storage")?;

    if args.save_default {
        let path = storage
            .save_survey_plan(&SurveyPlan::default())
            .context("Failed to save survey plan")?;
        info!("Saved default survey plan to {}", path.display());
    }

    let survey = storage
        .survey_plan_or_default()
        .context("Failed to load survey plan")?;
    let plan = survey.plan().context("Invalid survey plan")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan.waypoints())?);
        return Ok(());
    }

    println!(
        "{} waypoints, {} steps, {:.1} m at {} m/s",
        plan.len(),
        plan.step_count(),
        plan.path_length(),
        survey.velocity
    );
    for (index, waypoint) in plan.iter().enumerate() {
        println!(
            "{:>3}  x={:>9.2}  y={:>9.2}  alt={:>6.2}",
            index + 1,
            waypoint.x,
            waypoint.y,
            waypoint.altitude
        );
    }
    Ok(())
}
