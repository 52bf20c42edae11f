//! Sends an inspection start signal.
//!
//! ```text
//! start_inspection --context weather=Cloudy --context windSpeed=12
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use flight_software::broker::{MessageStream, RedisStream};
use flight_software::config::{ConfigArgs, EndpointArgs, PipelineConfig};
use flight_software::record::{is_reserved_field, FIELD_INSPECTION_ID};
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    endpoints: EndpointArgs,

    #[command(flatten)]
    config: ConfigArgs,

    /// Inspection id (default: random UUID)
    #[arg(long)]
    inspection_id: Option<String>,

    /// Extra session field as key=value, repeatable
    #[arg(long = "context", value_parser = parse_key_value)]
    context: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    if key == FIELD_INSPECTION_ID {
        return Err(format!("use --inspection-id to set {FIELD_INSPECTION_ID}"));
    }
    if is_reserved_field(key) {
        return Err(format!("{key} is written by the pipeline and cannot be set"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let storage = args
        .config
        .storage()
        .context("Failed to initialize config storage")?;
    let pipeline = PipelineConfig::load(&storage).context("Failed to load pipeline config")?;

    let inspection_id = args
        .inspection_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut fields = vec![(
        FIELD_INSPECTION_ID.to_string(),
        inspection_id.clone().into_bytes(),
    )];
    fields.extend(
        args.context
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes())),
    );

    let endpoints = &args.endpoints;
    let mut redis = RedisStream::connect(&endpoints.redis_host, endpoints.redis_port)
        .with_context(|| {
            format!(
                "Failed to connect to Redis at {}:{}",
                endpoints.redis_host, endpoints.redis_port
            )
        })?;
    let entry_id = redis
        .append(&pipeline.signal_stream, &fields, None)
        .context("Failed to send start signal")?;

    info!(
        "Inspection {inspection_id} requested on {} as {entry_id}",
        pipeline.signal_stream
    );
    println!("{inspection_id}");
    Ok(())
}
