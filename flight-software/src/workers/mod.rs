//! The three inspection workers.

use std::time::{Duration, Instant};

use hardware::{ActuatorError, FlightActuator};
use shared::PlanningError;
use thiserror::Error;
use tracing::info;

use crate::gate::GateError;
use crate::metrics::MetricsError;
use crate::shutdown::ShutdownSignal;

pub mod capture;
pub mod flight;
pub mod telemetry;

pub use capture::{CaptureConfig, CaptureReport, CaptureWorker};
pub use flight::{FlightOutcome, FlightWorker};
pub use telemetry::{TelemetryConfig, TelemetryReport, TelemetrySample, TelemetryWorker};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Session gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Poll until the actuator accepts control input.
///
/// Returns `false` if shutdown was requested first.
pub(crate) fn wait_for_control<A: FlightActuator>(
    actuator: &mut A,
    poll: Duration,
    shutdown: &ShutdownSignal,
) -> Result<bool, ActuatorError> {
    let mut announced = false;
    loop {
        if actuator.is_control_enabled()? {
            return Ok(true);
        }
        if !announced {
            info!("Waiting for control to be enabled");
            announced = true;
        }
        if !shutdown.sleep_until(Instant::now() + poll) {
            return Ok(false);
        }
    }
}

/// Fixed-rate loop timing that does not accumulate drift.
///
/// If an iteration overruns, the schedule restarts from now instead of
/// bursting to catch up.
pub(crate) struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Sleep until the next tick. Returns `false` on shutdown.
    pub(crate) fn wait(&mut self, shutdown: &ShutdownSignal) -> bool {
        self.next += self.period;
        let now = Instant::now();
        if self.next < now {
            self.next = now;
        }
        shutdown.sleep_until(self.next)
    }
}
