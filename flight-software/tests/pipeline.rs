//! End-to-end inspections on the in-memory broker, recording metrics sink and
//! simulated multirotor.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use flight_software::broker::{MemoryBroker, MessageStream, StartPosition, StreamEntry};
use flight_software::config::PipelineConfig;
use flight_software::metrics::RecordingSink;
use flight_software::record::{is_terminal_entry, FIELD_INSPECTION_ID, FIELD_SEQUENCE};
use flight_software::workers::{
    CaptureReport, CaptureWorker, FlightOutcome, FlightWorker, TelemetryReport, TelemetryWorker,
    WorkerError, WorkerResult,
};
use flight_software::{Connector, Dependency};
use hardware::sim::{SimConfig, SimVehicle};
use shared::SurveyPlan;

struct Rig {
    vehicle: SimVehicle,
    broker: MemoryBroker,
    sink: RecordingSink,
    config: PipelineConfig,
}

struct Workers {
    flight: JoinHandle<WorkerResult<FlightOutcome>>,
    telemetry: JoinHandle<WorkerResult<TelemetryReport>>,
    capture: JoinHandle<WorkerResult<CaptureReport>>,
}

impl Rig {
    fn new(time_scale: f64) -> Self {
        Self {
            vehicle: SimVehicle::new(SimConfig {
                time_scale,
                ..Default::default()
            }),
            broker: MemoryBroker::new(),
            sink: RecordingSink::new(),
            config: PipelineConfig {
                poll_interval_ms: 20,
                retry_delay_ms: 1,
                capture_period_ms: 20,
                telemetry_period_ms: 5,
                control_poll_ms: 2,
                append_backoff_ms: 0,
                ..Default::default()
            },
        }
    }

    /// Start the three workers, each with its own connections.
    fn start(&self) -> Workers {
        let connector = Connector::default();

        let (vehicle, survey, poll) = (
            self.vehicle.clone(),
            SurveyPlan::default(),
            self.config.control_poll(),
        );
        let flight_connector = connector.clone();
        let flight = thread::spawn(move || {
            let actuator = flight_connector
                .connect(Dependency::FlightActuator, || vehicle.connect())
                .unwrap();
            FlightWorker::new(actuator, survey)
                .with_control_poll(poll)
                .run()
        });

        let (vehicle, sink, config) = (
            self.vehicle.clone(),
            self.sink.clone(),
            self.config.telemetry_config(),
        );
        let telemetry_connector = connector.clone();
        let telemetry = thread::spawn(move || {
            let actuator = telemetry_connector
                .connect(Dependency::FlightActuator, || vehicle.connect())
                .unwrap();
            TelemetryWorker::new(actuator, sink, config).run()
        });

        let (vehicle, broker, config) = (
            self.vehicle.clone(),
            self.broker.clone(),
            self.config.capture_config(),
        );
        let capture = thread::spawn(move || {
            let actuator = connector
                .connect(Dependency::FlightActuator, || vehicle.connect())
                .unwrap();
            let stream = connector
                .connect(Dependency::MessageBroker, || broker.connect())
                .unwrap();
            CaptureWorker::new(actuator, stream, config).run()
        });

        Workers {
            flight,
            telemetry,
            capture,
        }
    }

    /// Send a start signal once the capture worker's group exists.
    fn send_signal(&self, inspection_id: &str, extra: &[(&str, &str)]) {
        while !self
            .broker
            .has_group(&self.config.signal_stream, &self.config.group)
        {
            thread::sleep(Duration::from_millis(1));
        }

        let mut fields = vec![(
            FIELD_INSPECTION_ID.to_string(),
            inspection_id.as_bytes().to_vec(),
        )];
        fields.extend(
            extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())),
        );
        Connector::default()
            .connect(Dependency::MessageBroker, || self.broker.connect())
            .unwrap()
            .append(&self.config.signal_stream, &fields, None)
            .unwrap();
    }

    fn data_entries(&self) -> Vec<StreamEntry> {
        self.broker.entries(&self.config.data_stream)
    }
}

fn assert_terminal_last(entries: &[StreamEntry], inspection_id: &str) {
    let (terminal, images) = entries.split_last().expect("data stream is empty");
    assert!(is_terminal_entry(terminal));
    assert!(images.iter().all(|e| !is_terminal_entry(e)));
    assert!(entries
        .iter()
        .all(|e| e.get_str(FIELD_INSPECTION_ID) == Some(inspection_id)));

    let sequences: Vec<u64> = entries
        .iter()
        .map(|e| e.get_str(FIELD_SEQUENCE).unwrap().parse().unwrap())
        .collect();
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_full_inspection() {
    let rig = Rig::new(0.005);
    let workers = rig.start();
    rig.send_signal("inspection-1", &[("windSpeed", "12")]);

    let outcome = workers.flight.join().unwrap().unwrap();
    let capture = workers.capture.join().unwrap().unwrap();
    let telemetry = workers.telemetry.join().unwrap().unwrap();

    assert_eq!(outcome, FlightOutcome::Completed { waypoints: 13 });
    let expected: Vec<_> = SurveyPlan::default()
        .plan()
        .unwrap()
        .iter()
        .map(|w| (w.x, w.y, w.altitude))
        .collect();
    assert_eq!(rig.vehicle.move_targets(), expected);

    assert_eq!(capture.session_id, "inspection-1");
    assert!(capture.frames_appended >= 1);
    assert!(capture.terminal_appended);

    let entries = rig.data_entries();
    assert_eq!(entries.len() as u64, capture.frames_appended + 1);
    assert_terminal_last(&entries, "inspection-1");
    assert!(entries.iter().all(|e| e.get_str("weather") == Some("Sunny")));
    assert!(entries.iter().all(|e| e.get_str("windSpeed") == Some("12")));

    assert!(telemetry.published >= 1);
    let messages = rig.sink.messages();
    assert!(messages
        .iter()
        .all(|(topic, payload)| topic == "iot_center"
            && payload.starts_with("environment,clientId=drone ")));

    assert_eq!(rig.broker.pending("inspection", "InspectionGroup"), 0);
    assert!(!rig.vehicle.is_control_enabled());
    assert!(!rig.vehicle.is_armed());
}

#[test]
fn test_aborted_flight_still_ends_session() {
    let rig = Rig::new(0.005);
    // A group left by an earlier run and dependencies that come up late.
    rig.broker
        .connect()
        .unwrap()
        .create_consumer_group("inspection", "InspectionGroup", StartPosition::NewOnly, true)
        .unwrap();
    rig.vehicle.refuse_connections(2);
    rig.broker.refuse_connections(3);
    rig.vehicle.fail_move(4);

    let workers = rig.start();
    rig.send_signal("inspection-2", &[]);

    let flight = workers.flight.join().unwrap();
    let capture = workers.capture.join().unwrap().unwrap();
    workers.telemetry.join().unwrap().unwrap();

    assert!(matches!(flight, Err(WorkerError::Actuator(_))));
    assert_eq!(rig.vehicle.move_targets().len(), 4);
    assert!(!rig.vehicle.is_armed());

    assert!(capture.terminal_appended);
    assert_terminal_last(&rig.data_entries(), "inspection-2");
}

#[test]
fn test_control_taken_away_mid_survey() {
    let rig = Rig::new(0.01);
    let workers = rig.start();
    rig.send_signal("inspection-3", &[]);

    while rig.vehicle.move_targets().len() < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    rig.vehicle.revoke_control();

    let outcome = workers.flight.join().unwrap().unwrap();
    let capture = workers.capture.join().unwrap().unwrap();
    workers.telemetry.join().unwrap().unwrap();

    assert!(matches!(outcome, FlightOutcome::ControlLost { .. }));
    assert!(rig.vehicle.move_targets().len() < 13);
    assert!(capture.terminal_appended);
    assert_terminal_last(&rig.data_entries(), "inspection-3");
}
