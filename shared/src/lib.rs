//! Shared, I/O-free building blocks for the aerial inspection pipeline.
//!
//! - [`geometry`]: planar vector helpers on `nalgebra` types
//! - [`coverage`]: boustrophedon coverage planner for a four-corner survey area
//! - [`survey_plan`]: serializable survey description feeding the planner
//! - [`config_storage`]: JSON configuration files under `~/.inspection_config/`

pub mod coverage;
pub mod geometry;
pub mod survey_plan;

#[cfg(feature = "config-storage")]
pub mod config_storage;

pub use coverage::{plan, CoveragePlan, PlanningConfig, PlanningError, SurveyArea, Waypoint};
pub use survey_plan::SurveyPlan;
