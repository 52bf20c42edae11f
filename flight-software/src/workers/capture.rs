//! Waits for a start signal, then streams camera frames for the session.

use std::time::Duration;

use hardware::{CameraPose, CapturedFrame, FlightActuator};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, info, warn};

use super::{Pacer, WorkerError, WorkerResult};
use crate::broker::MessageStream;
use crate::connector::RetryPolicy;
use crate::gate::{GateConfig, GateError, SessionSignalGate};
use crate::record_stream::{BoundedRecordStream, DEFAULT_APPEND_RETRY};
use crate::session::InspectionSession;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub gate: GateConfig,
    pub group: String,
    pub consumer: String,
    pub data_stream: String,
    pub max_images: usize,
    pub period: Duration,
    pub append_retry: RetryPolicy,
    pub camera: String,
    /// 1-100
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            group: "InspectionGroup".to_string(),
            consumer: "InspectionConsumer".to_string(),
            data_stream: "inspectiondata".to_string(),
            max_images: 50,
            period: Duration::from_secs(2),
            append_retry: DEFAULT_APPEND_RETRY,
            camera: "1".to_string(),
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub session_id: String,
    pub frames_appended: u64,
    pub frames_dropped: u64,
    pub terminal_appended: bool,
}

pub struct CaptureWorker<A, S> {
    actuator: A,
    stream: S,
    config: CaptureConfig,
    shutdown: ShutdownSignal,
}

impl<A: FlightActuator, S: MessageStream> CaptureWorker<A, S> {
    pub fn new(actuator: A, stream: S, config: CaptureConfig) -> Self {
        Self {
            actuator,
            stream,
            config,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run one inspection session from start signal to terminal record.
    ///
    /// Once a session is open its terminal record is appended however the
    /// capture loop ends.
    pub fn run(self) -> WorkerResult<CaptureReport> {
        let Self {
            mut actuator,
            stream,
            config,
            shutdown,
        } = self;

        let mut gate =
            SessionSignalGate::new(stream, config.gate.clone()).with_shutdown(shutdown.clone());
        let mut session = loop {
            match gate.await_session(&config.group, &config.consumer) {
                Ok(session) => break session,
                Err(GateError::MissingSessionId { entry_id }) => {
                    warn!("Ignoring start signal {entry_id} without inspection id");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut records = BoundedRecordStream::new(
            gate.into_inner(),
            config.data_stream.clone(),
            config.max_images,
        )
        .with_retry(config.append_retry);

        let mut report = CaptureReport {
            session_id: session.session_id().to_string(),
            frames_appended: 0,
            frames_dropped: 0,
            terminal_appended: false,
        };

        let result = capture_session(
            &mut actuator,
            &mut records,
            &mut session,
            &config,
            &shutdown,
            &mut report,
        );
        report.terminal_appended = records.complete(&mut session).is_some();

        result.map(|()| report)
    }
}

fn take_control<A: FlightActuator>(actuator: &mut A, camera: &str) -> WorkerResult<()> {
    actuator.confirm_connection()?;
    actuator.enable_control(true)?;
    actuator.arm(true)?;
    actuator.set_camera_pose(&CameraPose::nadir(camera))?;
    info!("Control taken, camera {camera} pointing down");
    Ok(())
}

fn capture_session<A: FlightActuator, S: MessageStream>(
    actuator: &mut A,
    records: &mut BoundedRecordStream<S>,
    session: &mut InspectionSession,
    config: &CaptureConfig,
    shutdown: &ShutdownSignal,
    report: &mut CaptureReport,
) -> WorkerResult<()> {
    take_control(actuator, &config.camera)?;

    let mut pacer = Pacer::new(config.period);
    while actuator.is_control_enabled()? {
        let frame = match actuator.capture_frame().and_then(|f| f.validate().map(|()| f)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame capture failed: {e}");
                if !pacer.wait(shutdown) {
                    break;
                }
                continue;
            }
        };

        let jpeg = encode_jpeg(&frame, config.jpeg_quality)?;
        match records.append_frame(session, jpeg) {
            Ok(_) => report.frames_appended += 1,
            Err(e) => {
                report.frames_dropped += 1;
                warn!("Frame dropped: {e}");
            }
        }

        if !pacer.wait(shutdown) {
            debug!("Capture interrupted by shutdown");
            break;
        }
    }

    info!(
        "Capture finished for {}: {} frames appended, {} dropped",
        session.session_id(),
        report.frames_appended,
        report.frames_dropped
    );
    Ok(())
}

/// Encode an RGB8 frame as baseline JPEG.
pub fn encode_jpeg(frame: &CapturedFrame, quality: u8) -> WorkerResult<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| WorkerError::Encode(e.to_string()))?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MemoryStream};
    use crate::record::{is_terminal_entry, FIELD_IMAGE, FIELD_IMAGE_NAME, FIELD_SEQUENCE};
    use hardware::sim::{SimCommand, SimConfig, SimVehicle, SimulatedMultirotor};

    fn config() -> CaptureConfig {
        CaptureConfig {
            gate: GateConfig {
                poll_interval: Duration::from_millis(10),
                retry_delay: Duration::from_millis(1),
                default_context: vec![("weather".to_string(), "Sunny".to_string())],
                ..Default::default()
            },
            period: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn worker(
        vehicle: &SimVehicle,
        broker: &MemoryBroker,
    ) -> CaptureWorker<SimulatedMultirotor, MemoryStream> {
        CaptureWorker::new(vehicle.connect().unwrap(), broker.connect().unwrap(), config())
    }

    /// Send a start signal once the worker's consumer group exists.
    fn start_signal(broker: &MemoryBroker, id: &str) {
        while !broker.has_group("inspection", "InspectionGroup") {
            std::thread::sleep(Duration::from_millis(1));
        }
        let fields = [("inspectionId".to_string(), id.as_bytes().to_vec())];
        broker
            .connect()
            .unwrap()
            .append("inspection", &fields, None)
            .unwrap();
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = CapturedFrame {
            width: 8,
            height: 8,
            data: vec![128; 8 * 8 * 3],
        };
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xff, 0xd9]);
    }

    #[test]
    fn test_session_streams_frames_then_terminal() {
        let vehicle = SimVehicle::new(SimConfig::default());
        let broker = MemoryBroker::new();
        let worker = worker(&vehicle, &broker);
        let thread = std::thread::spawn(move || worker.run());

        start_signal(&broker, "abc");
        while vehicle.frames_captured() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        vehicle.revoke_control();
        let report = thread.join().unwrap().unwrap();

        assert_eq!(report.session_id, "abc");
        assert!(report.frames_appended >= 3);
        assert!(report.terminal_appended);

        let entries = broker.entries("inspectiondata");
        assert_eq!(entries.len() as u64, report.frames_appended + 1);
        let (terminal, images) = entries.split_last().unwrap();
        assert!(is_terminal_entry(terminal));
        for (index, entry) in images.iter().enumerate() {
            let sequence = (index + 1).to_string();
            assert!(!is_terminal_entry(entry));
            assert_eq!(entry.get_str("weather"), Some("Sunny"));
            assert_eq!(entry.get_str(FIELD_SEQUENCE), Some(sequence.as_str()));
            assert_eq!(
                entry.get_str(FIELD_IMAGE_NAME),
                Some(format!("abc_{sequence}.jpg").as_str())
            );
            assert_eq!(&entry.get(FIELD_IMAGE).unwrap()[..2], &[0xff, 0xd8]);
        }

        let commands = vehicle.commands();
        assert_eq!(commands[0], SimCommand::EnableControl(true));
        assert_eq!(commands[1], SimCommand::Arm(true));
        assert_eq!(commands[2], SimCommand::SetCameraPose("1".to_string()));
    }

    #[test]
    fn test_shutdown_before_signal_appends_nothing() {
        let vehicle = SimVehicle::new(SimConfig::default());
        let broker = MemoryBroker::new();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = worker(&vehicle, &broker).with_shutdown(shutdown).run();
        assert!(matches!(
            result,
            Err(WorkerError::Gate(GateError::Cancelled))
        ));
        assert_eq!(broker.len("inspectiondata"), 0);
        assert!(vehicle.commands().is_empty());
    }

    #[test]
    fn test_terminal_record_written_when_shut_down_mid_session() {
        let vehicle = SimVehicle::new(SimConfig::default());
        let broker = MemoryBroker::new();
        let shutdown = ShutdownSignal::new();
        let worker = worker(&vehicle, &broker).with_shutdown(shutdown.clone());
        let thread = std::thread::spawn(move || worker.run());

        start_signal(&broker, "abc");
        while vehicle.frames_captured() < 1 {
            std::thread::sleep(Duration::from_millis(1));
        }
        shutdown.trigger();
        let report = thread.join().unwrap().unwrap();

        assert!(report.terminal_appended);
        let entries = broker.entries("inspectiondata");
        assert!(is_terminal_entry(entries.last().unwrap()));
    }
}
