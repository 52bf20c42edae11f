//! Flight actuator interface and drivers.
//!
//! The inspection pipeline never talks to a flight controller directly: it
//! goes through the [`FlightActuator`] trait, which covers control handover,
//! arming, blocking position moves, state snapshots and the downward camera.
//!
//! # Features
//!
//! - `sim` - Kinematic multirotor simulator ([`sim::SimVehicle`]), used by the
//!   offline pipeline binary and by tests (no hardware needed)

pub mod actuator;

#[cfg(feature = "sim")]
pub mod sim;

pub use actuator::{
    ActuatorError, ActuatorResult, CameraPose, CapturedFrame, Environment, FlightActuator,
    GeoPoint, VehicleState,
};
