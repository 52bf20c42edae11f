//! Flies the boustrophedon survey path.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use hardware::{ActuatorError, FlightActuator};
use shared::{CoveragePlan, SurveyPlan};
use tracing::{debug, error, info, warn};

use super::{wait_for_control, WorkerResult};
use crate::shutdown::ShutdownSignal;

/// How a flight ended when no error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightOutcome {
    /// Every waypoint was reached
    Completed { waypoints: usize },
    /// Control was taken away before the path was finished
    ControlLost { reached: usize, remaining: usize },
    /// Shutdown was requested
    Cancelled { reached: usize },
}

/// Holds the actuator while the vehicle is flying and puts it back into a
/// safe state when dropped, whichever way the flight ends.
struct ControlGuard<'a, A: FlightActuator> {
    actuator: &'a mut A,
}

impl<'a, A: FlightActuator> ControlGuard<'a, A> {
    fn new(actuator: &'a mut A) -> Self {
        Self { actuator }
    }
}

impl<A: FlightActuator> Deref for ControlGuard<'_, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.actuator
    }
}

impl<A: FlightActuator> DerefMut for ControlGuard<'_, A> {
    fn deref_mut(&mut self) -> &mut A {
        self.actuator
    }
}

impl<A: FlightActuator> Drop for ControlGuard<'_, A> {
    fn drop(&mut self) {
        info!("Ending flight: hover, disarm, reset, release control");
        // Every step runs even if an earlier one fails.
        if let Err(e) = self.actuator.hover() {
            warn!("Hover failed during cleanup: {e}");
        }
        if let Err(e) = self.actuator.arm(false) {
            warn!("Disarm failed during cleanup: {e}");
        }
        if let Err(e) = self.actuator.reset() {
            warn!("Reset failed during cleanup: {e}");
        }
        if let Err(e) = self.actuator.enable_control(false) {
            warn!("Releasing control failed during cleanup: {e}");
        }
    }
}

pub struct FlightWorker<A> {
    actuator: A,
    survey: SurveyPlan,
    control_poll: Duration,
    shutdown: ShutdownSignal,
}

impl<A: FlightActuator> FlightWorker<A> {
    pub fn new(actuator: A, survey: SurveyPlan) -> Self {
        Self {
            actuator,
            survey,
            control_poll: Duration::from_secs(1),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_control_poll(mut self, poll: Duration) -> Self {
        self.control_poll = poll;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Wait for control, then fly the planned path once.
    ///
    /// A failed leg aborts the rest of the path and is returned as an error;
    /// the vehicle is always hovered, disarmed, reset and released.
    pub fn run(mut self) -> WorkerResult<FlightOutcome> {
        let plan = self.survey.plan()?;
        info!(
            "Planned {} waypoints over {} steps, {:.1} m",
            plan.len(),
            plan.step_count(),
            plan.path_length()
        );

        self.actuator.confirm_connection()?;
        if !wait_for_control(&mut self.actuator, self.control_poll, &self.shutdown)? {
            return Ok(FlightOutcome::Cancelled { reached: 0 });
        }

        let mut guard = ControlGuard::new(&mut self.actuator);
        guard.arm(true)?;
        info!("Taking off");
        guard.takeoff()?;

        fly(&mut *guard, &plan, &self.shutdown)
    }
}

fn fly<A: FlightActuator>(
    actuator: &mut A,
    plan: &CoveragePlan,
    shutdown: &ShutdownSignal,
) -> WorkerResult<FlightOutcome> {
    let total = plan.len();
    for (index, waypoint) in plan.iter().enumerate() {
        if shutdown.is_triggered() {
            info!("Shutdown requested after {index} of {total} waypoints");
            return Ok(FlightOutcome::Cancelled { reached: index });
        }
        if !actuator.is_control_enabled()? {
            info!("Control released after {index} of {total} waypoints");
            return Ok(FlightOutcome::ControlLost {
                reached: index,
                remaining: total - index,
            });
        }

        debug!(
            "Leg {}/{total} to ({:.1}, {:.1}, {:.1})",
            index + 1,
            waypoint.x,
            waypoint.y,
            waypoint.altitude
        );
        match actuator.move_to(waypoint.x, waypoint.y, waypoint.altitude, waypoint.velocity) {
            Ok(()) => {}
            Err(ActuatorError::ControlDisabled) => {
                info!("Control lost during leg {}", index + 1);
                return Ok(FlightOutcome::ControlLost {
                    reached: index,
                    remaining: total - index,
                });
            }
            Err(e) => {
                error!("Leg {} failed, aborting path: {e}", index + 1);
                return Err(e.into());
            }
        }
    }

    info!("Survey complete: {total} waypoints");
    Ok(FlightOutcome::Completed { waypoints: total })
}
