//! Boustrophedon ("lawnmower") coverage planning over a four-corner survey area.
//!
//! # Algorithm
//!
//! 1. Sort the corners by ascending x, ties broken by ascending y. The first
//!    corner is the anchor; the second and third corners give the two edges
//!    leaving it.
//! 2. The longer of those two edges is the step axis, the other one the leg
//!    axis. Legs run parallel to the leg axis and are `spacing` apart along
//!    the step axis.
//! 3. `steps = floor(step_axis_length / spacing)`. A partial final strip is not
//!    flown: a 100 m span at 17 m spacing gives 5 steps.
//! 4. The path is seeded with the anchor and the far end of its leg edge. Each
//!    step appends a point advanced by `spacing` along the step axis, then a
//!    point that crosses back over the leg, alternating direction with the
//!    parity of the step.
//! 5. The point list is reversed so the sweep starts at its last strip, then a
//!    return leg to the origin is appended.
//!
//! ```text
//!  anchor+leg  s0 ─── s1      s4 ─── s5
//!      │        │      │       │
//!      │        │      │       │
//!    anchor ── s0'    s1' ─── s2' ...
//! ```

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::geometry::{self, GeometryError};

/// Relative tolerance under which two corners count as the same point or
/// three corners count as collinear.
const DEGENERACY_TOLERANCE: f64 = 1e-9;

/// Absorbs floating point rounding when the span is an exact multiple of the
/// spacing (e.g. 0.3 / 0.1).
const STEP_COUNT_TOLERANCE: f64 = 1e-9;

/// Errors that make a survey impossible to plan.
///
/// Planning is pure and cheap: callers fix the configuration and plan again,
/// nothing here is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    /// A corner coordinate is NaN or infinite.
    #[error("corner {index} is not finite: ({x}, {y})")]
    NonFiniteCorner { index: usize, x: f64, y: f64 },

    /// Two corners coincide.
    #[error("corners {first} and {second} coincide")]
    DuplicateCorner { first: usize, second: usize },

    /// Three corners lie on one line, so no simple quadrilateral exists.
    #[error("corners {0:?} are collinear")]
    CollinearCorners([usize; 3]),

    /// Sweep spacing must be finite and strictly positive.
    #[error("spacing must be > 0, got {0}")]
    InvalidSpacing(f64),

    /// Leg velocity must be finite and strictly positive.
    #[error("velocity must be > 0, got {0}")]
    InvalidVelocity(f64),

    /// Altitude must be finite.
    #[error("altitude must be finite, got {0}")]
    InvalidAltitude(f64),

    /// Edge vector could not be normalized.
    #[error("degenerate survey edge: {0}")]
    Geometry(#[from] GeometryError),
}

/// Result type for planning operations.
pub type PlanningResult<T> = Result<T, PlanningError>;

/// Four corner points of the area to survey, in the local planar frame.
///
/// Construction validates that the corners can form a simple quadrilateral:
/// all coordinates are finite, no two corners coincide and no three are
/// collinear. Any four points passing these checks can be joined into a
/// non-self-intersecting quadrilateral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurveyArea {
    corners: [Point2<f64>; 4],
}

impl SurveyArea {
    /// Validate and wrap four corners given in any order.
    pub fn new(corners: [Point2<f64>; 4]) -> PlanningResult<Self> {
        for (index, c) in corners.iter().enumerate() {
            if !c.x.is_finite() || !c.y.is_finite() {
                return Err(PlanningError::NonFiniteCorner {
                    index,
                    x: c.x,
                    y: c.y,
                });
            }
        }

        let extent = max_pairwise_distance(&corners);
        for first in 0..4 {
            for second in (first + 1)..4 {
                let d = geometry::length(&geometry::vector_between(
                    &corners[first],
                    &corners[second],
                ));
                if d <= DEGENERACY_TOLERANCE * extent.max(1.0) {
                    return Err(PlanningError::DuplicateCorner { first, second });
                }
            }
        }

        for triple in [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]] {
            let a = geometry::vector_between(&corners[triple[0]], &corners[triple[1]]);
            let b = geometry::vector_between(&corners[triple[0]], &corners[triple[2]]);
            let sine = geometry::cross(&a, &b) / (geometry::length(&a) * geometry::length(&b));
            if sine.abs() <= DEGENERACY_TOLERANCE {
                return Err(PlanningError::CollinearCorners(triple));
            }
        }

        Ok(Self { corners })
    }

    /// Convenience constructor from `(x, y)` tuples.
    pub fn from_xy(corners: [(f64, f64); 4]) -> PlanningResult<Self> {
        Self::new(corners.map(|(x, y)| Point2::new(x, y)))
    }

    /// Corners in the order they were supplied.
    pub fn corners(&self) -> &[Point2<f64>; 4] {
        &self.corners
    }

    /// Corners sorted by ascending x, ties by ascending y.
    pub fn sorted_corners(&self) -> [Point2<f64>; 4] {
        let mut sorted = self.corners;
        sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        sorted
    }
}

fn max_pairwise_distance(points: &[Point2<f64>; 4]) -> f64 {
    let mut max = 0.0_f64;
    for i in 0..4 {
        for j in (i + 1)..4 {
            max = max.max(geometry::length(&geometry::vector_between(
                &points[i], &points[j],
            )));
        }
    }
    max
}

/// Sweep parameters shared by every waypoint of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Lateral distance between adjacent legs (meters, > 0)
    pub spacing: f64,
    /// Flight altitude in the actuator's convention (NED: negative is up)
    pub altitude: f64,
    /// Ground speed for each leg (m/s, > 0)
    pub velocity: f64,
}

impl PlanningConfig {
    /// Check that spacing and velocity are positive and every value is finite.
    pub fn validate(&self) -> PlanningResult<()> {
        if !self.spacing.is_finite() || self.spacing <= 0.0 {
            return Err(PlanningError::InvalidSpacing(self.spacing));
        }
        if !self.velocity.is_finite() || self.velocity <= 0.0 {
            return Err(PlanningError::InvalidVelocity(self.velocity));
        }
        if !self.altitude.is_finite() {
            return Err(PlanningError::InvalidAltitude(self.altitude));
        }
        Ok(())
    }
}

/// One commanded position of the coverage path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub altitude: f64,
    pub velocity: f64,
}

impl Waypoint {
    /// Planar position of the waypoint.
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Ordered waypoint sequence produced by [`plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoveragePlan {
    waypoints: Vec<Waypoint>,
    step_count: usize,
}

impl CoveragePlan {
    /// Waypoints in flight order; the last one is the return leg to the origin.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Number of lateral steps the sweep performs.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Number of waypoints including the return leg.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Always false for a plan built by [`plan`].
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Point the sweep starts from.
    pub fn start(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    /// Sum of the leg lengths between consecutive waypoints, return leg included.
    pub fn path_length(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| {
                geometry::length(&geometry::vector_between(
                    &pair[0].position(),
                    &pair[1].position(),
                ))
            })
            .sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Waypoint> {
        self.waypoints.iter()
    }
}

impl<'a> IntoIterator for &'a CoveragePlan {
    type Item = &'a Waypoint;
    type IntoIter = std::slice::Iter<'a, Waypoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.waypoints.iter()
    }
}

/// Plan a boustrophedon sweep over `area`.
///
/// The result starts at the last strip of the sweep, works back to the anchor
/// corner and finishes with a return leg to the origin `(0, 0)`. Every waypoint
/// carries `config.altitude` and `config.velocity`.
///
/// # Errors
/// Returns a [`PlanningError`] for invalid spacing, velocity or altitude.
pub fn plan(area: &SurveyArea, config: &PlanningConfig) -> PlanningResult<CoveragePlan> {
    config.validate()?;

    let corners = area.sorted_corners();
    let anchor = corners[0];
    let first_edge = geometry::vector_between(&anchor, &corners[1]);
    let second_edge = geometry::vector_between(&anchor, &corners[2]);

    // Step along the longer edge; legs run along the other one.
    let (step_axis, leg_axis, leg_end) =
        if geometry::length(&second_edge) > geometry::length(&first_edge) {
            (second_edge, first_edge, corners[1])
        } else {
            (first_edge, second_edge, corners[2])
        };

    let span = geometry::length(&step_axis);
    let step = geometry::scale(&geometry::unit(&step_axis)?, config.spacing);
    let step_count = (span / config.spacing + STEP_COUNT_TOLERANCE).floor() as usize;

    let mut points = Vec::with_capacity(2 + 2 * step_count);
    points.push(anchor);
    points.push(leg_end);

    for i in 0..step_count {
        let advanced = points[points.len() - 1] + step;
        let direction = if i % 2 == 0 { -1.0 } else { 1.0 };
        points.push(advanced);
        points.push(advanced + geometry::scale(&leg_axis, direction));
    }

    points.reverse();

    let mut waypoints: Vec<Waypoint> = points
        .iter()
        .map(|p| Waypoint {
            x: p.x,
            y: p.y,
            altitude: config.altitude,
            velocity: config.velocity,
        })
        .collect();

    waypoints.push(Waypoint {
        x: 0.0,
        y: 0.0,
        altitude: config.altitude,
        velocity: config.velocity,
    });

    debug!(
        "Planned {} waypoints ({} steps) over a {:.1} m span",
        waypoints.len(),
        step_count,
        span
    );

    Ok(CoveragePlan {
        waypoints,
        step_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(spacing: f64) -> PlanningConfig {
        PlanningConfig {
            spacing,
            altitude: -1.0,
            velocity: 10.0,
        }
    }

    /// Sweep points in generation order (return leg dropped, reversal undone).
    fn generated_points(plan: &CoveragePlan) -> Vec<Point2<f64>> {
        let wps = plan.waypoints();
        wps[..wps.len() - 1].iter().rev().map(|w| w.position()).collect()
    }

    #[test]
    fn test_reference_scenario_shape() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (-100.0, 0.0), (0.0, -80.0), (-100.0, -80.0)])
            .unwrap();
        let plan = plan(&area, &config(17.0)).unwrap();

        assert_eq!(plan.step_count(), 5);
        // 2 seed points + 2 per step + return leg
        assert_eq!(plan.len(), 2 + 2 * 5 + 1);

        let last = plan.waypoints().last().unwrap();
        assert_eq!((last.x, last.y), (0.0, 0.0));

        for wp in &plan {
            assert_eq!(wp.altitude, -1.0);
            assert_eq!(wp.velocity, 10.0);
        }
    }

    #[test]
    fn test_reference_scenario_coordinates() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (-100.0, 0.0), (0.0, -80.0), (-100.0, -80.0)])
            .unwrap();
        let plan = plan(&area, &config(17.0)).unwrap();
        let points = generated_points(&plan);

        assert_eq!(points[0], Point2::new(-100.0, -80.0));
        assert_eq!(points[1], Point2::new(-100.0, 0.0));
        assert_relative_eq!(points[2].x, -83.0);
        assert_relative_eq!(points[2].y, 0.0);
        assert_relative_eq!(points[3].y, -80.0);

        let start = plan.start().unwrap();
        assert_relative_eq!(start.x, -15.0, epsilon = 1e-9);
        assert_relative_eq!(start.y, -80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_first_point_is_last_generated_point() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 60.0), (40.0, 0.0), (40.0, 60.0)]).unwrap();
        let plan = plan(&area, &config(7.0)).unwrap();
        let points = generated_points(&plan);

        assert_eq!(plan.start().unwrap().position(), *points.last().unwrap());
    }

    #[test]
    fn test_partial_strip_is_not_flown() {
        // Step axis (0,0)->(0,100) is the longer edge.
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 100.0), (60.0, 0.0), (60.0, 100.0)])
            .unwrap();
        let plan = plan(&area, &config(17.0)).unwrap();

        assert_eq!(plan.step_count(), 5);
        assert_eq!(plan.len(), 13);
    }

    #[test]
    fn test_exact_multiple_spacing() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 0.3), (0.2, 0.0), (0.2, 0.3)]).unwrap();
        let plan = plan(&area, &config(0.1)).unwrap();
        assert_eq!(plan.step_count(), 3);
    }

    #[test]
    fn test_spacing_larger_than_area_only_flies_seed_edge() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 10.0), (5.0, 0.0), (5.0, 10.0)]).unwrap();
        let plan = plan(&area, &config(50.0)).unwrap();

        assert_eq!(plan.step_count(), 0);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_leg_offsets_alternate() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (-100.0, 0.0), (0.0, -80.0), (-100.0, -80.0)])
            .unwrap();
        let plan = plan(&area, &config(17.0)).unwrap();
        let points = generated_points(&plan);

        let offsets: Vec<_> = (0..plan.step_count())
            .map(|i| points[3 + 2 * i] - points[2 + 2 * i])
            .collect();

        for pair in offsets.windows(2) {
            assert_relative_eq!(pair[0].x, -pair[1].x, epsilon = 1e-9);
            assert_relative_eq!(pair[0].y, -pair[1].y, epsilon = 1e-9);
        }
        // First crossing goes back towards the anchor edge.
        assert_relative_eq!(offsets[0].y, -80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_steps_advance_by_spacing() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 50.0), (30.0, 0.0), (30.0, 50.0)]).unwrap();
        let plan = plan(&area, &config(12.0)).unwrap();
        let points = generated_points(&plan);

        for i in 0..plan.step_count() {
            let advance = points[2 + 2 * i] - points[1 + 2 * i];
            assert_relative_eq!(advance.norm(), 12.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rotated_area() {
        // Square of side 50 rotated by 30 degrees.
        let (s, c) = 30f64.to_radians().sin_cos();
        let corner = |x: f64, y: f64| (x * c - y * s, x * s + y * c);
        let area = SurveyArea::from_xy([
            corner(0.0, 0.0),
            corner(50.0, 0.0),
            corner(0.0, 50.0),
            corner(50.0, 50.0),
        ])
        .unwrap();
        let plan = plan(&area, &config(10.0)).unwrap();

        assert_eq!(plan.step_count(), 5);
        assert!(plan.waypoints().iter().all(|w| w.x.is_finite() && w.y.is_finite()));
    }

    #[test]
    fn test_path_length_of_reference_scenario() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (-100.0, 0.0), (0.0, -80.0), (-100.0, -80.0)])
            .unwrap();
        let plan = plan(&area, &config(17.0)).unwrap();

        // 6 legs of 80 m, 5 steps of 17 m, then from (-100,-80) back to origin.
        let expected = 6.0 * 80.0 + 5.0 * 17.0 + (100f64.powi(2) + 80f64.powi(2)).sqrt();
        assert_relative_eq!(plan.path_length(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_length_edge_is_rejected() {
        let result = SurveyArea::from_xy([(0.0, 0.0), (0.0, 0.0), (0.0, -1.0), (0.0, 1.0)]);
        assert!(matches!(result, Err(PlanningError::DuplicateCorner { .. })));
    }

    #[test]
    fn test_collinear_corners_are_rejected() {
        let result = SurveyArea::from_xy([(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (0.0, 5.0)]);
        assert!(matches!(result, Err(PlanningError::CollinearCorners(_))));
    }

    #[test]
    fn test_non_finite_corner_is_rejected() {
        let result = SurveyArea::from_xy([(0.0, 0.0), (f64::NAN, 1.0), (2.0, 0.0), (2.0, 1.0)]);
        assert!(matches!(
            result,
            Err(PlanningError::NonFiniteCorner { index: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let area = SurveyArea::from_xy([(0.0, 0.0), (0.0, 10.0), (5.0, 0.0), (5.0, 10.0)]).unwrap();

        assert_eq!(
            plan(&area, &config(0.0)),
            Err(PlanningError::InvalidSpacing(0.0))
        );
        assert_eq!(
            plan(&area, &config(-3.0)),
            Err(PlanningError::InvalidSpacing(-3.0))
        );

        let slow = PlanningConfig {
            velocity: 0.0,
            ..config(1.0)
        };
        assert_eq!(plan(&area, &slow), Err(PlanningError::InvalidVelocity(0.0)));

        let lost = PlanningConfig {
            altitude: f64::INFINITY,
            ..config(1.0)
        };
        assert!(matches!(
            plan(&area, &lost),
            Err(PlanningError::InvalidAltitude(_))
        ));
    }
}
