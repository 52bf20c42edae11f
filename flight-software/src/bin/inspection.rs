//! Runs one inspection: the flight, telemetry and capture workers against a
//! simulated multirotor.
//!
//! With `--offline` the message broker and metrics sink are in-process and a
//! start signal is sent automatically, so no Redis or MQTT server is needed.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flight_software::broker::{MemoryBroker, MessageStream, RedisStream, StreamResult};
use flight_software::config::{ConfigArgs, EndpointArgs, PipelineConfig};
use flight_software::metrics::{MetricsResult, MetricsSink, MqttMetricsSink, RecordingSink};
use flight_software::record::FIELD_INSPECTION_ID;
use flight_software::workers::{CaptureWorker, FlightWorker, TelemetryWorker};
use flight_software::{Connector, Dependency, RetryPolicy, ShutdownSignal};
use hardware::sim::{SimConfig, SimVehicle};
use shared::SurveyPlan;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    endpoints: EndpointArgs,

    #[command(flatten)]
    config: ConfigArgs,

    /// Use the in-process broker and metrics recorder and start the
    /// inspection automatically
    #[arg(long)]
    offline: bool,

    /// Wall-clock seconds per simulated second
    #[arg(long, default_value_t = 0.05)]
    time_scale: f64,

    /// Give up connecting to a dependency after this many attempts
    /// (default: retry forever)
    #[arg(long)]
    connect_attempts: Option<u32>,

    /// Delay between connection attempts in milliseconds
    #[arg(long, default_value_t = 0)]
    connect_backoff_ms: u64,
}

type WorkerOutcome = (&'static str, Result<String>);

/// Everything a worker thread needs, cloned into each of them.
#[derive(Clone)]
struct WorkerContext {
    pipeline: PipelineConfig,
    survey: SurveyPlan,
    vehicle: SimVehicle,
    connector: Connector,
    shutdown: ShutdownSignal,
}

fn spawn_workers<S, M>(
    workers: &mut JoinSet<WorkerOutcome>,
    ctx: &WorkerContext,
    connect_stream: impl FnMut() -> StreamResult<S> + Send + 'static,
    connect_sink: impl FnMut() -> MetricsResult<M> + Send + 'static,
) where
    S: MessageStream + 'static,
    M: MetricsSink + 'static,
{
    let flight = ctx.clone();
    workers.spawn_blocking(move || {
        let result = (|| -> Result<String> {
            let actuator = flight
                .connector
                .connect(Dependency::FlightActuator, || flight.vehicle.connect())?;
            let outcome = FlightWorker::new(actuator, flight.survey.clone())
                .with_control_poll(flight.pipeline.control_poll())
                .with_shutdown(flight.shutdown.clone())
                .run()?;
            Ok(format!("{outcome:?}"))
        })();
        ("flight", result)
    });

    let telemetry = ctx.clone();
    workers.spawn_blocking(move || {
        let mut connect_sink = connect_sink;
        let result = (|| -> Result<String> {
            let actuator = telemetry
                .connector
                .connect(Dependency::FlightActuator, || telemetry.vehicle.connect())?;
            let sink = telemetry
                .connector
                .connect(Dependency::MetricsSink, &mut connect_sink)?;
            let report = TelemetryWorker::new(actuator, sink, telemetry.pipeline.telemetry_config())
                .with_shutdown(telemetry.shutdown.clone())
                .run()?;
            Ok(format!("{report:?}"))
        })();
        ("telemetry", result)
    });

    let capture = ctx.clone();
    workers.spawn_blocking(move || {
        let mut connect_stream = connect_stream;
        let result = (|| -> Result<String> {
            let actuator = capture
                .connector
                .connect(Dependency::FlightActuator, || capture.vehicle.connect())?;
            let stream = capture
                .connector
                .connect(Dependency::MessageBroker, &mut connect_stream)?;
            let report = CaptureWorker::new(actuator, stream, capture.pipeline.capture_config())
                .with_shutdown(capture.shutdown.clone())
                .run()?;
            Ok(format!("{report:?}"))
        })();
        ("capture", result)
    });
}

/// Send one start signal once the capture worker listens for it.
fn spawn_offline_signal(
    workers: &mut JoinSet<WorkerOutcome>,
    broker: MemoryBroker,
    pipeline: &PipelineConfig,
    shutdown: ShutdownSignal,
) {
    let stream = pipeline.signal_stream.clone();
    let group = pipeline.group.clone();
    workers.spawn_blocking(move || {
        let result = (|| -> Result<String> {
            while !broker.has_group(&stream, &group) {
                if shutdown.is_triggered() {
                    return Ok("cancelled".to_string());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            let id = uuid::Uuid::new_v4().to_string();
            let fields = [(FIELD_INSPECTION_ID.to_string(), id.clone().into_bytes())];
            broker.connect()?.append(&stream, &fields, None)?;
            Ok(format!("sent start signal {id}"))
        })();
        ("signal", result)
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let storage = args
        .config
        .storage()
        .context("Failed to initialize config storage")?;
    let pipeline = PipelineConfig::load(&storage).context("Failed to load pipeline config")?;
    let survey = storage
        .survey_plan_or_default()
        .context("Failed to load survey plan")?;
    // Fail on a bad survey before anything connects.
    let plan = survey.plan().context("Invalid survey plan")?;
    info!(
        "Survey: {} waypoints, {} steps, {:.1} m",
        plan.len(),
        plan.step_count(),
        plan.path_length()
    );

    let policy = match args.connect_attempts {
        Some(attempts) => RetryPolicy::bounded(attempts, Duration::ZERO),
        None => RetryPolicy::unbounded(),
    }
    .with_backoff(Duration::from_millis(args.connect_backoff_ms));

    let shutdown = ShutdownSignal::new();
    let ctx = WorkerContext {
        pipeline: pipeline.clone(),
        survey,
        vehicle: SimVehicle::new(SimConfig {
            time_scale: args.time_scale,
            ..Default::default()
        }),
        connector: Connector::new(policy).with_shutdown(shutdown.clone()),
        shutdown: shutdown.clone(),
    };

    let mut workers = JoinSet::new();
    let offline_broker = if args.offline {
        info!("Offline mode: in-process broker and metrics recorder");
        let broker = MemoryBroker::new();
        let sink = RecordingSink::new();
        let stream_broker = broker.clone();
        spawn_workers(
            &mut workers,
            &ctx,
            move || stream_broker.connect(),
            move || Ok(sink.clone()),
        );
        spawn_offline_signal(&mut workers, broker.clone(), &pipeline, shutdown.clone());
        Some(broker)
    } else {
        let endpoints = args.endpoints.clone();
        info!(
            "Redis at {}:{}, MQTT at {}:{}",
            endpoints.redis_host, endpoints.redis_port, endpoints.mqtt_host, endpoints.mqtt_port
        );
        let redis = endpoints.clone();
        let client_id = format!("{}-telemetry", pipeline.client_id);
        spawn_workers(
            &mut workers,
            &ctx,
            move || RedisStream::connect(&redis.redis_host, redis.redis_port),
            move || MqttMetricsSink::connect(&endpoints.mqtt_host, endpoints.mqtt_port, &client_id),
        );
        None
    };

    let mut failed = false;
    loop {
        tokio::select! {
            joined = workers.join_next() => match joined {
                None => break,
                Some(Ok((name, Ok(summary)))) => info!("{name} worker finished: {summary}"),
                Some(Ok((name, Err(e)))) => {
                    failed = true;
                    error!("{name} worker failed: {e:#}");
                }
                Some(Err(e)) => {
                    failed = true;
                    error!("Worker thread panicked: {e}");
                }
            },
            signal = tokio::signal::ctrl_c(), if !shutdown.is_triggered() => {
                if let Err(e) = signal {
                    warn!("Could not listen for Ctrl-C: {e}");
                }
                warn!("Stopping workers");
                shutdown.trigger();
            }
        }
    }

    if let Some(broker) = offline_broker {
        info!(
            "Offline run produced {} records in {}",
            broker.len(&pipeline.data_stream),
            pipeline.data_stream
        );
    }

    if failed {
        anyhow::bail!("one or more workers failed");
    }
    Ok(())
}
