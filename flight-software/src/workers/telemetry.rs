//! Publishes vehicle state to the metrics sink while the vehicle is under
//! control.

use std::time::Duration;

use chrono::Utc;
use hardware::{FlightActuator, VehicleState};
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use super::{wait_for_control, Pacer, WorkerResult};
use crate::metrics::line_protocol::encode_point;
use crate::metrics::{MetricsResult, MetricsSink};
use crate::shutdown::ShutdownSignal;

/// Flattened vehicle state: named numeric fields in a fixed order.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    fields: Vec<(&'static str, f64)>,
}

impl TelemetrySample {
    pub fn from_state(state: &VehicleState) -> Self {
        let mut fields = Vec::with_capacity(29);

        push_vector(&mut fields, ["speed_x", "speed_y", "speed_z"], &state.linear_velocity);
        fields.push(("speed", state.linear_velocity.norm()));
        push_vector(
            &mut fields,
            ["acceleration_x", "acceleration_y", "acceleration_z"],
            &state.linear_acceleration,
        );
        fields.push(("acceleration", state.linear_acceleration.norm()));

        fields.push(("altitude", state.gps.altitude));
        fields.push(("latitude", state.gps.latitude));
        fields.push(("longitude", state.gps.longitude));

        let q = state.orientation.quaternion();
        fields.push(("orientation_quaternion_w", q.w));
        fields.push(("orientation_quaternion_x", q.i));
        fields.push(("orientation_quaternion_y", q.j));
        fields.push(("orientation_quaternion_z", q.k));

        fields.push(("x_coordinate", state.position.x));
        fields.push(("y_coordinate", state.position.y));
        // NED z is down; report height.
        fields.push(("z_coordinate", -state.position.z));

        let env = &state.environment;
        fields.push(("air_pressure", env.air_pressure));
        fields.push(("temperature", env.temperature));
        fields.push(("air_density", env.air_density));
        push_vector(
            &mut fields,
            [
                "gravitational_force_x",
                "gravitational_force_y",
                "gravitational_force_z",
            ],
            &env.gravity,
        );
        fields.push(("gravitational_force", env.gravity.norm()));

        push_vector(
            &mut fields,
            [
                "magnetic_field_strength_x",
                "magnetic_field_strength_y",
                "magnetic_field_strength_z",
            ],
            &state.magnetic_field,
        );
        fields.push(("magnetic_field_strength", state.magnetic_field.norm()));

        Self { fields }
    }

    pub fn fields(&self) -> &[(&'static str, f64)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }

    pub fn to_line_protocol(&self, measurement: &str, client_id: &str) -> MetricsResult<String> {
        encode_point(measurement, &[("clientId", client_id)], &self.fields, Utc::now())
    }
}

fn push_vector(fields: &mut Vec<(&'static str, f64)>, names: [&'static str; 3], v: &Vector3<f64>) {
    for (name, value) in names.into_iter().zip(v.iter()) {
        fields.push((name, *value));
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub period: Duration,
    pub topic: String,
    pub measurement: String,
    pub client_id: String,
    pub control_poll: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            topic: "iot_center".to_string(),
            measurement: "environment".to_string(),
            client_id: "drone".to_string(),
            control_poll: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryReport {
    pub published: u64,
    pub failed: u64,
}

pub struct TelemetryWorker<A, M> {
    actuator: A,
    sink: M,
    config: TelemetryConfig,
    shutdown: ShutdownSignal,
}

impl<A: FlightActuator, M: MetricsSink> TelemetryWorker<A, M> {
    pub fn new(actuator: A, sink: M, config: TelemetryConfig) -> Self {
        Self {
            actuator,
            sink,
            config,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Publish one sample per period from the moment control is enabled
    /// until it is released.
    pub fn run(mut self) -> WorkerResult<TelemetryReport> {
        let mut report = TelemetryReport::default();
        if !wait_for_control(&mut self.actuator, self.config.control_poll, &self.shutdown)? {
            return Ok(report);
        }
        info!(
            "Publishing telemetry to {} every {:?}",
            self.config.topic, self.config.period
        );

        let mut pacer = Pacer::new(self.config.period);
        while self.actuator.is_control_enabled()? {
            match self.publish_sample() {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Telemetry sample dropped: {e}");
                }
            }
            if !pacer.wait(&self.shutdown) {
                break;
            }
        }

        info!(
            "Telemetry stopped: {} samples published, {} dropped",
            report.published, report.failed
        );
        Ok(report)
    }

    fn publish_sample(&mut self) -> WorkerResult<()> {
        let state = self.actuator.get_state()?;
        let payload = TelemetrySample::from_state(&state)
            .to_line_protocol(&self.config.measurement, &self.config.client_id)?;
        self.sink.publish(&self.config.topic, &payload)?;
        debug!("Telemetry: {payload}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingSink;
    use approx::assert_relative_eq;
    use hardware::sim::{SimConfig, SimVehicle};

    fn state() -> VehicleState {
        let vehicle = SimVehicle::new(SimConfig::default());
        let mut handle = vehicle.connect().unwrap();
        handle.enable_control(true).unwrap();
        handle.arm(true).unwrap();
        handle.takeoff().unwrap();
        handle.get_state().unwrap()
    }

    #[test]
    fn test_sample_field_set() {
        let sample = TelemetrySample::from_state(&state());
        assert_eq!(sample.fields().len(), 29);
        assert_eq!(sample.fields()[0].0, "speed_x");
        assert_eq!(sample.fields()[28].0, "magnetic_field_strength");

        // Takeoff altitude is NED -3.
        assert_relative_eq!(sample.get("z_coordinate").unwrap(), 3.0);
        assert_relative_eq!(sample.get("gravitational_force").unwrap(), 9.80665);
        assert_relative_eq!(sample.get("orientation_quaternion_w").unwrap(), 1.0);
        assert_eq!(sample.get("missing"), None);
    }

    #[test]
    fn test_line_protocol_payload() {
        let payload = TelemetrySample::from_state(&state())
            .to_line_protocol("environment", "drone")
            .unwrap();
        assert!(payload.starts_with("environment,clientId=drone speed_x=0,"));
        assert!(payload.contains(",z_coordinate=3,"));

        let timestamp = payload.rsplit(' ').next().unwrap();
        assert!(timestamp.parse::<i64>().unwrap() > 1_600_000_000_000_000_000);
    }

    #[test]
    fn test_publishes_until_control_released() {
        let vehicle = SimVehicle::new(SimConfig::default());
        let mut pilot = vehicle.connect().unwrap();
        pilot.enable_control(true).unwrap();

        let sink = RecordingSink::new();
        sink.fail_publishes(1);
        let config = TelemetryConfig {
            period: Duration::from_millis(5),
            ..Default::default()
        };
        let worker = TelemetryWorker::new(vehicle.connect().unwrap(), sink.clone(), config);

        let thread = std::thread::spawn(move || worker.run());
        std::thread::sleep(Duration::from_millis(100));
        pilot.enable_control(false).unwrap();
        let report = thread.join().unwrap().unwrap();

        assert!(report.published >= 2);
        assert_eq!(report.failed, 1);
        let messages = sink.messages();
        assert_eq!(messages.len() as u64, report.published);
        assert!(messages.iter().all(|(topic, _)| topic == "iot_center"));
    }
}
