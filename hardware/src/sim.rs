//! Kinematic multirotor simulator.
//!
//! [`SimVehicle`] holds the state of one simulated vehicle. Every worker gets
//! its own [`SimulatedMultirotor`] connection to it, the same way each worker
//! would open its own RPC connection to a real flight controller.
//!
//! Moves are straight-line legs at the commanded velocity. With a
//! `time_scale` of zero every command completes instantly, which is what
//! tests use; the offline pipeline binary runs at a reduced but non-zero scale
//! so the telemetry and capture workers see the vehicle move.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

use crate::actuator::{
    ActuatorError, ActuatorResult, CameraPose, CapturedFrame, Environment, FlightActuator,
    GeoPoint, VehicleState,
};

/// Meters per degree of latitude (spherical approximation).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Standard gravity (m/s²).
const STANDARD_GRAVITY: f64 = 9.80665;

/// Wall-clock slice used to advance the vehicle during a leg.
const SIM_TICK: Duration = Duration::from_millis(20);

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Geodetic position of the NED origin
    pub home: GeoPoint,
    /// Wall-clock seconds per simulated second; 0 completes commands instantly
    pub time_scale: f64,
    /// NED altitude reached by `takeoff`
    pub takeoff_altitude: f64,
    /// Climb rate used for takeoff (m/s)
    pub climb_rate: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            home: GeoPoint {
                latitude: 47.641468,
                longitude: -122.140165,
                altitude: 122.0,
            },
            time_scale: 0.0,
            takeoff_altitude: -3.0,
            climb_rate: 2.0,
            frame_width: 64,
            frame_height: 48,
        }
    }
}

/// Command accepted by the simulator, recorded for inspection in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    EnableControl(bool),
    Arm(bool),
    Takeoff,
    MoveTo { x: f64, y: f64, z: f64, velocity: f64 },
    Hover,
    Reset,
    SetCameraPose(String),
    CaptureFrame,
}

#[derive(Debug)]
struct SimState {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    acceleration: Vector3<f64>,
    yaw: f64,
    armed: bool,
    control_enabled: bool,
    airborne: bool,
    camera_pose: Option<CameraPose>,
    frames_captured: u64,
    moves_started: usize,
    failing_moves: BTreeSet<usize>,
    refused_connections: usize,
    commands: Vec<SimCommand>,
}

impl SimState {
    fn new() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            yaw: 0.0,
            armed: false,
            control_enabled: false,
            airborne: false,
            camera_pose: None,
            frames_captured: 0,
            moves_started: 0,
            failing_moves: BTreeSet::new(),
            refused_connections: 0,
            commands: Vec::new(),
        }
    }

    fn require_control(&self) -> ActuatorResult<()> {
        if !self.control_enabled {
            return Err(ActuatorError::ControlDisabled);
        }
        Ok(())
    }

    fn require_armed(&self) -> ActuatorResult<()> {
        self.require_control()?;
        if !self.armed {
            return Err(ActuatorError::NotArmed);
        }
        Ok(())
    }
}

/// Shared state of one simulated vehicle.
///
/// Cloning yields another handle to the same vehicle.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    state: Arc<Mutex<SimState>>,
    config: Arc<SimConfig>,
}

impl SimVehicle {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
            config: Arc::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection to the vehicle.
    ///
    /// Fails while refusals set by [`refuse_connections`](Self::refuse_connections)
    /// remain, mimicking a simulator that is still starting up.
    pub fn connect(&self) -> ActuatorResult<SimulatedMultirotor> {
        let mut state = self.lock();
        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(ActuatorError::Connection(
                "simulator is not ready yet".to_string(),
            ));
        }
        Ok(SimulatedMultirotor {
            vehicle: self.clone(),
        })
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.lock().refused_connections = count;
    }

    /// Make the `index`-th `move_to` (0-based, counted since creation) fail.
    pub fn fail_move(&self, index: usize) {
        self.lock().failing_moves.insert(index);
    }

    /// Take control away from the pipeline, as an operator or failsafe would.
    pub fn revoke_control(&self) {
        let mut state = self.lock();
        state.control_enabled = false;
        info!("Simulator: control revoked externally");
    }

    pub fn is_control_enabled(&self) -> bool {
        self.lock().control_enabled
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn is_airborne(&self) -> bool {
        self.lock().airborne
    }

    /// Last pose applied with `set_camera_pose`.
    pub fn camera_pose(&self) -> Option<CameraPose> {
        self.lock().camera_pose.clone()
    }

    /// Current NED position.
    pub fn position(&self) -> Vector3<f64> {
        self.lock().position
    }

    pub fn frames_captured(&self) -> u64 {
        self.lock().frames_captured
    }

    /// Every command accepted so far, in order.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().commands.clone()
    }

    /// Target positions of all `move_to` commands so far.
    pub fn move_targets(&self) -> Vec<(f64, f64, f64)> {
        self.lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                SimCommand::MoveTo { x, y, z, .. } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect()
    }

    fn sleep_sim(&self, sim_seconds: f64) {
        if self.config.time_scale > 0.0 && sim_seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(sim_seconds * self.config.time_scale));
        }
    }

    /// Fly a straight leg, releasing the lock between ticks so that other
    /// connections can observe the vehicle while it moves.
    fn fly_leg(&self, target: Vector3<f64>, speed: f64) -> ActuatorResult<()> {
        let start = {
            let mut state = self.lock();
            state.require_armed()?;
            let delta = target - state.position;
            let distance = delta.norm();
            if distance > 0.0 {
                state.velocity = delta / distance * speed;
                if delta.x != 0.0 || delta.y != 0.0 {
                    state.yaw = delta.y.atan2(delta.x);
                }
            }
            state.position
        };

        let distance = (target - start).norm();
        let sim_seconds = distance / speed;
        let wall = sim_seconds * self.config.time_scale;

        if wall > 0.0 {
            let ticks = (wall / SIM_TICK.as_secs_f64()).ceil().max(1.0) as usize;
            for tick in 1..=ticks {
                std::thread::sleep(Duration::from_secs_f64(wall / ticks as f64));
                let mut state = self.lock();
                if !state.control_enabled {
                    state.velocity = Vector3::zeros();
                    return Err(ActuatorError::ControlDisabled);
                }
                state.position = start + (target - start) * (tick as f64 / ticks as f64);
            }
        }

        let mut state = self.lock();
        state.require_control()?;
        state.position = target;
        state.velocity = Vector3::zeros();
        state.acceleration = Vector3::zeros();
        Ok(())
    }

    fn snapshot(&self) -> VehicleState {
        let state = self.lock();
        let home = self.config.home;

        let latitude = home.latitude + state.position.x / METERS_PER_DEGREE;
        let longitude = home.longitude
            + state.position.y / (METERS_PER_DEGREE * home.latitude.to_radians().cos());
        let altitude = home.altitude - state.position.z;

        VehicleState {
            position: state.position,
            linear_velocity: state.velocity,
            linear_acceleration: state.acceleration,
            orientation: UnitQuaternion::from_euler_angles(0.0, 0.0, state.yaw),
            gps: GeoPoint {
                latitude,
                longitude,
                altitude,
            },
            environment: standard_atmosphere(altitude),
            magnetic_field: Vector3::new(0.2, 0.0, 0.45),
        }
    }

    fn synthetic_frame(&self) -> CapturedFrame {
        let mut state = self.lock();
        state.frames_captured += 1;
        let (width, height) = (self.config.frame_width, self.config.frame_height);
        let offset_x = state.position.x.rem_euclid(256.0) as u32;
        let offset_y = state.position.y.rem_euclid(256.0) as u32;
        let shade = (state.frames_captured % 256) as u8;

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for row in 0..height {
            for col in 0..width {
                data.push(((col + offset_y) % 256) as u8);
                data.push(((row + offset_x) % 256) as u8);
                data.push(shade);
            }
        }

        CapturedFrame {
            width,
            height,
            data,
        }
    }

    fn record(&self, command: SimCommand) {
        self.lock().commands.push(command);
    }
}

/// International Standard Atmosphere (troposphere) at `altitude` meters.
fn standard_atmosphere(altitude: f64) -> Environment {
    let temperature = 288.15 - 0.0065 * altitude;
    let air_pressure = 101_325.0 * (1.0 - 2.25577e-5 * altitude).powf(5.25588);
    let air_density = air_pressure / (287.05 * temperature);
    Environment {
        air_pressure,
        temperature,
        air_density,
        gravity: Vector3::new(0.0, 0.0, STANDARD_GRAVITY),
    }
}

/// One connection to a [`SimVehicle`].
#[derive(Debug, Clone)]
pub struct SimulatedMultirotor {
    vehicle: SimVehicle,
}

impl SimulatedMultirotor {
    /// The vehicle this connection controls.
    pub fn vehicle(&self) -> &SimVehicle {
        &self.vehicle
    }
}

impl FlightActuator for SimulatedMultirotor {
    fn confirm_connection(&mut self) -> ActuatorResult<()> {
        debug!("Simulator: connection confirmed");
        Ok(())
    }

    fn enable_control(&mut self, enabled: bool) -> ActuatorResult<()> {
        self.vehicle.lock().control_enabled = enabled;
        self.vehicle.record(SimCommand::EnableControl(enabled));
        Ok(())
    }

    fn is_control_enabled(&mut self) -> ActuatorResult<bool> {
        Ok(self.vehicle.is_control_enabled())
    }

    fn arm(&mut self, armed: bool) -> ActuatorResult<()> {
        {
            let mut state = self.vehicle.lock();
            if armed {
                state.require_control()?;
            }
            state.armed = armed;
        }
        self.vehicle.record(SimCommand::Arm(armed));
        Ok(())
    }

    fn takeoff(&mut self) -> ActuatorResult<()> {
        let climb = {
            let mut state = self.vehicle.lock();
            state.require_armed()?;
            let climb = (self.vehicle.config.takeoff_altitude - state.position.z).abs();
            state.position.z = self.vehicle.config.takeoff_altitude;
            state.airborne = true;
            climb
        };
        self.vehicle.record(SimCommand::Takeoff);
        self.vehicle.sleep_sim(climb / self.vehicle.config.climb_rate);
        Ok(())
    }

    fn move_to(&mut self, x: f64, y: f64, altitude: f64, velocity: f64) -> ActuatorResult<()> {
        let failing = {
            let mut state = self.vehicle.lock();
            state.require_armed()?;
            let index = state.moves_started;
            state.moves_started += 1;
            state.failing_moves.remove(&index)
        };
        if failing {
            return Err(ActuatorError::CommandFailed {
                command: "move_to",
                reason: "injected failure".to_string(),
            });
        }
        if !velocity.is_finite() || velocity <= 0.0 {
            return Err(ActuatorError::CommandFailed {
                command: "move_to",
                reason: format!("invalid velocity {velocity}"),
            });
        }

        self.vehicle.record(SimCommand::MoveTo {
            x,
            y,
            z: altitude,
            velocity,
        });
        self.vehicle.fly_leg(Vector3::new(x, y, altitude), velocity)
    }

    fn hover(&mut self) -> ActuatorResult<()> {
        {
            let mut state = self.vehicle.lock();
            state.velocity = Vector3::zeros();
            state.acceleration = Vector3::zeros();
        }
        self.vehicle.record(SimCommand::Hover);
        Ok(())
    }

    fn reset(&mut self) -> ActuatorResult<()> {
        {
            let mut state = self.vehicle.lock();
            state.position = Vector3::zeros();
            state.velocity = Vector3::zeros();
            state.acceleration = Vector3::zeros();
            state.yaw = 0.0;
            state.armed = false;
            state.airborne = false;
        }
        self.vehicle.record(SimCommand::Reset);
        Ok(())
    }

    fn capture_frame(&mut self) -> ActuatorResult<CapturedFrame> {
        self.vehicle.record(SimCommand::CaptureFrame);
        Ok(self.vehicle.synthetic_frame())
    }

    fn get_state(&mut self) -> ActuatorResult<VehicleState> {
        Ok(self.vehicle.snapshot())
    }

    fn set_camera_pose(&mut self, pose: &CameraPose) -> ActuatorResult<()> {
        self.vehicle.lock().camera_pose = Some(pose.clone());
        self.vehicle
            .record(SimCommand::SetCameraPose(pose.camera.clone()));
        Ok(())
    }
}
