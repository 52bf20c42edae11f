//! Flight actuator interface for inspection workflows.
//!
//! Positions use the NED convention of the flight controller: x north, y east,
//! z down (meters), so a negative altitude is above the ground.

use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;

/// Errors reported by a flight actuator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    /// The controller could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Control input is not accepted (handed back, mode change, crash).
    #[error("Control is not enabled")]
    ControlDisabled,

    /// The vehicle must be armed for this command.
    #[error("Vehicle is not armed")]
    NotArmed,

    /// The controller rejected or failed the command.
    #[error("Command {command} failed: {reason}")]
    CommandFailed {
        command: &'static str,
        reason: String,
    },

    /// Camera returned no usable frame.
    #[error("Capture failed: {0}")]
    Capture(String),
}

/// Result type for actuator operations.
pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Geodetic position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: f64,
}

/// Ground-truth environment around the vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    /// Pascal
    pub air_pressure: f64,
    /// Kelvin
    pub temperature: f64,
    /// kg/m³
    pub air_density: f64,
    /// m/s², NED
    pub gravity: Vector3<f64>,
}

/// Snapshot of the vehicle state used for telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    /// NED position relative to home (meters)
    pub position: Vector3<f64>,
    /// NED velocity (m/s)
    pub linear_velocity: Vector3<f64>,
    /// NED acceleration (m/s²)
    pub linear_acceleration: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub gps: GeoPoint,
    pub environment: Environment,
    /// Body-frame magnetic field (gauss)
    pub magnetic_field: Vector3<f64>,
}

/// Pose of a camera relative to the vehicle body.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    /// Camera name as known by the controller
    pub camera: String,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl CameraPose {
    /// Camera looking straight down (pitch -90°).
    pub fn nadir(camera: &str) -> Self {
        Self {
            camera: camera.to_string(),
            position: Vector3::zeros(),
            orientation: UnitQuaternion::from_euler_angles(0.0, -std::f64::consts::FRAC_PI_2, 0.0),
        }
    }
}

/// One uncompressed RGB8 camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8 pixels, `width * height * 3` bytes
    pub data: Vec<u8>,
}

impl CapturedFrame {
    /// Byte length implied by the dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Check that the pixel buffer matches the dimensions.
    pub fn validate(&self) -> ActuatorResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ActuatorError::Capture(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.data.len() != self.expected_len() {
            return Err(ActuatorError::Capture(format!(
                "frame {}x{} has {} bytes, expected {}",
                self.width,
                self.height,
                self.data.len(),
                self.expected_len()
            )));
        }
        Ok(())
    }
}

/// Interface for flight control.
///
/// Abstracts the flight controller for testability. Each worker owns its own
/// connection; all of them observe the same vehicle.
pub trait FlightActuator {
    /// Verify the controller is reachable.
    fn confirm_connection(&mut self) -> ActuatorResult<()>;

    /// Take (`true`) or hand back (`false`) control input.
    fn enable_control(&mut self, enabled: bool) -> ActuatorResult<()>;

    /// Whether control input is currently accepted.
    fn is_control_enabled(&mut self) -> ActuatorResult<bool>;

    fn arm(&mut self, armed: bool) -> ActuatorResult<()>;

    /// Blocks until the vehicle is airborne.
    fn takeoff(&mut self) -> ActuatorResult<()>;

    /// Fly to `(x, y, altitude)` at `velocity`, blocking until the leg completes.
    fn move_to(&mut self, x: f64, y: f64, altitude: f64, velocity: f64) -> ActuatorResult<()>;

    /// Stop and hold position, blocking until stationary.
    fn hover(&mut self) -> ActuatorResult<()>;

    /// Return the vehicle to its initial state.
    fn reset(&mut self) -> ActuatorResult<()>;

    fn capture_frame(&mut self) -> ActuatorResult<CapturedFrame>;

    fn get_state(&mut self) -> ActuatorResult<VehicleState>;

    fn set_camera_pose(&mut self, pose: &CameraPose) -> ActuatorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nadir_pose_points_down() {
        let pose = CameraPose::nadir("1");
        let forward = pose.orientation * Vector3::x();
        // NED: looking down means +z.
        assert_relative_eq!(forward.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(forward.x, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_validation() {
        let frame = CapturedFrame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        };
        assert!(frame.validate().is_ok());

        let short = CapturedFrame {
            data: vec![0; 11],
            ..frame.clone()
        };
        assert!(matches!(short.validate(), Err(ActuatorError::Capture(_))));

        let empty = CapturedFrame {
            width: 0,
            height: 0,
            data: vec![],
        };
        assert!(empty.validate().is_err());
    }
}
