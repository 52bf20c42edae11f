//! Serializable survey description.
//!
//! A [`SurveyPlan`] is what gets stored in `survey_plan.json`: the four raw
//! corners plus the sweep parameters. It is validated lazily, when turned into
//! a [`SurveyArea`] / [`PlanningConfig`] pair for planning.

use serde::{Deserialize, Serialize};

use crate::coverage::{self, CoveragePlan, PlanningConfig, PlanningResult, SurveyArea};

/// Corners, spacing, altitude and velocity of one survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPlan {
    /// Corner points `[x, y]` in any order (meters, local frame)
    pub corners: [[f64; 2]; 4],
    /// Distance between sweep legs (meters)
    pub spacing: f64,
    /// Flight altitude (NED, negative is up)
    pub altitude: f64,
    /// Ground speed (m/s)
    pub velocity: f64,
}

impl Default for SurveyPlan {
    fn default() -> Self {
        Self {
            corners: [[0.0, 0.0], [-100.0, 0.0], [0.0, -80.0], [-100.0, -80.0]],
            spacing: 17.0,
            altitude: -1.0,
            velocity: 10.0,
        }
    }
}

impl SurveyPlan {
    /// Validated survey area.
    pub fn area(&self) -> PlanningResult<SurveyArea> {
        SurveyArea::from_xy(self.corners.map(|[x, y]| (x, y)))
    }

    /// Sweep parameters.
    pub fn planning_config(&self) -> PlanningConfig {
        PlanningConfig {
            spacing: self.spacing,
            altitude: self.altitude,
            velocity: self.velocity,
        }
    }

    /// Validate and plan in one go.
    pub fn plan(&self) -> PlanningResult<CoveragePlan> {
        coverage::plan(&self.area()?, &self.planning_config())
    }
}
